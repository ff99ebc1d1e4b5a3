use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    Disk, DiskSpec, Filesystem, FilesystemSpec, Instance, InstanceSpec, ProvisioningError,
    Provisioner,
};

/// [`Provisioner`] that only logs what it would do and hands out made-up identifiers
#[derive(Debug, Default)]
pub struct DryRunProvisioner {
    next_id: AtomicU64,
}

impl DryRunProvisioner {
    fn id(&self, kind: &str) -> String {
        format!("dry-run-{}-{}", kind, self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Provisioner for DryRunProvisioner {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance, ProvisioningError> {
        let instance = Instance {
            id: self.id("instance"),
            ip: "127.0.0.1".to_string(),
            compute_node: spec
                .compute_node
                .clone()
                .unwrap_or_else(|| "dry-run-node".to_string()),
        };
        tracing::info!("[dry-run] create instance {:?} -> {}", spec, instance.id);
        Ok(instance)
    }

    async fn delete_instance(&self, instance: &Instance) -> Result<(), ProvisioningError> {
        tracing::info!("[dry-run] delete instance {}", instance.id);
        Ok(())
    }

    async fn create_disk(&self, spec: &DiskSpec) -> Result<Disk, ProvisioningError> {
        let disk = Disk {
            id: self.id("disk"),
            size_gib: spec.size_gib,
            type_id: spec.type_id.clone(),
        };
        tracing::info!("[dry-run] create disk {:?} -> {}", spec, disk.id);
        Ok(disk)
    }

    async fn delete_disk(&self, disk: &Disk) -> Result<(), ProvisioningError> {
        tracing::info!("[dry-run] delete disk {}", disk.id);
        Ok(())
    }

    async fn attach_disk(&self, instance: &Instance, disk: &Disk) -> Result<(), ProvisioningError> {
        tracing::info!("[dry-run] attach disk {} to {}", disk.id, instance.id);
        Ok(())
    }

    async fn detach_disk(&self, instance: &Instance, disk: &Disk) -> Result<(), ProvisioningError> {
        tracing::info!("[dry-run] detach disk {} from {}", disk.id, instance.id);
        Ok(())
    }

    async fn create_fs(&self, spec: &FilesystemSpec) -> Result<Filesystem, ProvisioningError> {
        let fs = Filesystem {
            id: self.id("fs"),
            size_gib: spec.size_gib,
            type_id: spec.type_id.clone(),
        };
        tracing::info!("[dry-run] create filesystem {:?} -> {}", spec, fs.id);
        Ok(fs)
    }

    async fn delete_fs(&self, fs: &Filesystem) -> Result<(), ProvisioningError> {
        tracing::info!("[dry-run] delete filesystem {}", fs.id);
        Ok(())
    }

    async fn attach_fs(
        &self,
        instance: &Instance,
        fs: &Filesystem,
        device_name: &str,
    ) -> Result<(), ProvisioningError> {
        tracing::info!(
            "[dry-run] attach filesystem {} to {} as {}",
            fs.id,
            instance.id,
            device_name
        );
        Ok(())
    }

    async fn detach_fs(
        &self,
        instance: &Instance,
        fs: &Filesystem,
    ) -> Result<(), ProvisioningError> {
        tracing::info!("[dry-run] detach filesystem {} from {}", fs.id, instance.id);
        Ok(())
    }

    async fn delete_tmp_instances(&self, ttl_days: u32) -> Result<usize, ProvisioningError> {
        tracing::info!("[dry-run] delete temporary instances older than {ttl_days} day(s)");
        Ok(0)
    }

    async fn turn_off_auto_deletion(&self) -> Result<(), ProvisioningError> {
        tracing::info!("[dry-run] turn off auto-deletion");
        Ok(())
    }
}
