//! Scoped acquisition of cloud resources
//!
//! Every resource is handed to an async closure and released when that closure returns, on the
//! success path as well as on every error path. Scopes nest: a disk scope opened inside an
//! instance scope always closes first, and an attachment scope opened inside a disk scope closes
//! before the disk is deleted.
//!
//! Auto-deletion can be switched off once per run (see [`Cloud::turn_off_auto_deletion`]). From
//! that point on scopes still close, but the resources are left in place for manual inspection.
//! Attachments are the exception: an attachment scope whose body succeeded is still detached, so
//! the next scope never finds a preserved resource attached to the instance.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    Disk, DiskSpec, Filesystem, FilesystemSpec, Instance, InstanceSpec, ProvisioningError,
    Provisioner,
};

/// Scoped-acquisition front end over a [`Provisioner`]
#[derive(Debug)]
pub struct Cloud<P> {
    provisioner: P,
    auto_deletion: AtomicBool,
    preserve_on_failure: bool,
}

/// How a closing scope gives its resource back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    Delete,
    Detach,
}

/// Warns when a scope is dropped without being closed, i.e. its future was cancelled
struct ScopeGuard {
    resource: String,
    armed: bool,
}

impl ScopeGuard {
    fn new(resource: String) -> Self {
        Self {
            resource,
            armed: true,
        }
    }

    fn disarm(mut self) -> String {
        self.armed = false;
        std::mem::take(&mut self.resource)
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(
                "Scope of {} was abandoned before release, the resource needs manual cleanup",
                self.resource
            );
        }
    }
}

impl<P: Provisioner> Cloud<P> {
    pub fn new(provisioner: P) -> Self {
        Self {
            provisioner,
            auto_deletion: AtomicBool::new(true),
            preserve_on_failure: false,
        }
    }

    /// Keep all resources alive when a scope exits with an error (debug mode)
    pub fn preserve_on_failure(mut self, enabled: bool) -> Self {
        self.preserve_on_failure = enabled;
        self
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    pub fn auto_deletion_enabled(&self) -> bool {
        self.auto_deletion.load(Ordering::SeqCst)
    }

    /// Stop releasing resources when their scopes close
    ///
    /// Only the first call has an effect; the backend hook runs exactly once per run. A failing
    /// hook is logged and otherwise ignored.
    pub async fn turn_off_auto_deletion(&self) {
        if !self.auto_deletion.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::warn!("Turning off auto-deletion, resources will be kept for inspection");
        if let Err(error) = self.provisioner.turn_off_auto_deletion().await {
            tracing::error!("Failed to turn off backend auto-deletion: {:#}", error);
        }
    }

    /// Turn off auto-deletion if failed runs are to be preserved
    ///
    /// Returns whether resources are being preserved.
    pub async fn preserve_for_inspection(&self) -> bool {
        if self.preserve_on_failure {
            self.turn_off_auto_deletion().await;
        }
        !self.auto_deletion_enabled()
    }

    /// Best-effort removal of instances abandoned by earlier runs
    ///
    /// Failures are logged and never abort the current run.
    pub async fn delete_tmp_instances(&self, ttl_days: u32) {
        tracing::info!("Deleting temporary instances older than {} day(s)", ttl_days);
        match self.provisioner.delete_tmp_instances(ttl_days).await {
            Ok(0) => tracing::debug!("No stale temporary instances found"),
            Ok(deleted) => tracing::info!("Deleted {} stale temporary instance(s)", deleted),
            Err(error) => tracing::warn!("Failed to delete stale temporary instances: {:#}", error),
        }
    }

    async fn close_scope<T, E>(
        &self,
        guard: ScopeGuard,
        result: Result<T, E>,
        kind: Release,
        release: impl Future<Output = Result<(), ProvisioningError>>,
    ) -> Result<T, E>
    where
        E: From<ProvisioningError>,
    {
        let resource = guard.disarm();
        if result.is_err() {
            self.preserve_for_inspection().await;
        }
        if !self.auto_deletion_enabled() {
            if kind == Release::Delete || result.is_err() {
                tracing::warn!("Auto-deletion is off, leaving {} in place", resource);
                return result;
            }
            // the run goes on, the detached resource itself stays preserved
            tracing::info!("Auto-deletion is off, releasing {} only", resource);
        } else {
            tracing::info!("Releasing {}", resource);
        }
        match (release.await, result) {
            (Ok(()), result) => result,
            (Err(error), Ok(_)) => Err(error.into()),
            (Err(error), Err(original)) => {
                tracing::error!("Failed to release {}: {:#}", resource, error);
                Err(original)
            }
        }
    }

    /// Create an instance, run `body` with it, then delete it
    pub async fn with_instance<T, E>(
        &self,
        spec: &InstanceSpec,
        body: impl AsyncFnOnce(&Instance) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ProvisioningError>,
    {
        tracing::info!(
            "Creating instance: {} cores, {} GiB memory, image {}",
            spec.cores,
            spec.memory_gib,
            spec.image_name
        );
        let instance = self.provisioner.create_instance(spec).await?;
        tracing::info!(
            "Created instance <id={}> with ip {} on compute node <{}>",
            instance.id,
            instance.ip,
            instance.compute_node
        );
        let guard = ScopeGuard::new(format!("instance <id={}>", instance.id));
        let result = body(&instance).await;
        self.close_scope(
            guard,
            result,
            Release::Delete,
            self.provisioner.delete_instance(&instance),
        )
        .await
    }

    /// Create a disk, run `body` with it, then delete it
    pub async fn with_disk<T, E>(
        &self,
        spec: &DiskSpec,
        body: impl AsyncFnOnce(&Disk) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ProvisioningError>,
    {
        tracing::info!(
            "Creating disk: {} GiB of type {}",
            spec.size_gib,
            spec.type_id
        );
        let disk = self.provisioner.create_disk(spec).await?;
        tracing::info!("Created disk <id={}>", disk.id);
        let guard = ScopeGuard::new(format!("disk <id={}>", disk.id));
        let result = body(&disk).await;
        self.close_scope(
            guard,
            result,
            Release::Delete,
            self.provisioner.delete_disk(&disk),
        )
        .await
    }

    /// Attach `disk` to `instance`, run `body`, then detach it
    pub async fn with_attached_disk<T, E>(
        &self,
        instance: &Instance,
        disk: &Disk,
        body: impl AsyncFnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ProvisioningError>,
    {
        tracing::info!(
            "Attaching disk <id={}> to instance <id={}>",
            disk.id,
            instance.id
        );
        self.provisioner.attach_disk(instance, disk).await?;
        let guard = ScopeGuard::new(format!(
            "attachment of disk <id={}> to instance <id={}>",
            disk.id, instance.id
        ));
        let result = body().await;
        self.close_scope(
            guard,
            result,
            Release::Detach,
            self.provisioner.detach_disk(instance, disk),
        )
        .await
    }

    /// Create a filesystem, run `body` with it, then delete it
    pub async fn with_fs<T, E>(
        &self,
        spec: &FilesystemSpec,
        body: impl AsyncFnOnce(&Filesystem) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ProvisioningError>,
    {
        tracing::info!(
            "Creating filesystem: {} GiB of type {}",
            spec.size_gib,
            spec.type_id
        );
        let fs = self.provisioner.create_fs(spec).await?;
        tracing::info!("Created filesystem <id={}>", fs.id);
        let guard = ScopeGuard::new(format!("filesystem <id={}>", fs.id));
        let result = body(&fs).await;
        self.close_scope(
            guard,
            result,
            Release::Delete,
            self.provisioner.delete_fs(&fs),
        )
        .await
    }

    /// Attach `fs` to `instance` as `device_name`, run `body`, then detach it
    pub async fn with_attached_fs<T, E>(
        &self,
        instance: &Instance,
        fs: &Filesystem,
        device_name: &str,
        body: impl AsyncFnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ProvisioningError>,
    {
        tracing::info!(
            "Attaching filesystem <id={}> to instance <id={}> as {}",
            fs.id,
            instance.id,
            device_name
        );
        self.provisioner
            .attach_fs(instance, fs, device_name)
            .await?;
        let guard = ScopeGuard::new(format!(
            "attachment of filesystem <id={}> to instance <id={}>",
            fs.id, instance.id
        ));
        let result = body().await;
        self.close_scope(
            guard,
            result,
            Release::Detach,
            self.provisioner.detach_fs(instance, fs),
        )
        .await
    }
}
