//! Cloud resources used by the corruption test pipeline
//!
//! [`Provisioner`] is the raw capability: create, attach, detach and delete instances, disks and
//! filesystems. Callers never use it directly for lifetimes; they go through [`Cloud`], which
//! hands resources out as nested scopes and guarantees the release of every scope on exit.

pub mod dry_run;
pub mod scope;
pub mod yc;

pub use dry_run::DryRunProvisioner;
pub use scope::Cloud;
pub use yc::{YcConfig, YcProvisioner};

/// Requested shape of the test instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub cores: u32,
    pub memory_gib: u32,
    /// Pin the instance to a specific compute node
    pub compute_node: Option<String>,
    pub image_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub ip: String,
    pub compute_node: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSpec {
    pub size_gib: u64,
    pub type_id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub id: String,
    pub size_gib: u64,
    pub type_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemSpec {
    pub size_gib: u64,
    pub type_id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filesystem {
    pub id: String,
    pub size_gib: u64,
    pub type_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("failed to {operation}: {reason}")]
    Failed { operation: String, reason: String },

    #[error("unexpected response to {operation}: {reason}")]
    BadResponse { operation: String, reason: String },
}

impl ProvisioningError {
    pub fn failed(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ProvisioningError::Failed {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Raw cloud capability
///
/// Implementations only perform the requested operation; ordering of releases and the
/// auto-deletion policy live in [`Cloud`].
#[allow(async_fn_in_trait)]
pub trait Provisioner {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance, ProvisioningError>;
    async fn delete_instance(&self, instance: &Instance) -> Result<(), ProvisioningError>;

    async fn create_disk(&self, spec: &DiskSpec) -> Result<Disk, ProvisioningError>;
    async fn delete_disk(&self, disk: &Disk) -> Result<(), ProvisioningError>;
    async fn attach_disk(&self, instance: &Instance, disk: &Disk) -> Result<(), ProvisioningError>;
    async fn detach_disk(&self, instance: &Instance, disk: &Disk) -> Result<(), ProvisioningError>;

    async fn create_fs(&self, spec: &FilesystemSpec) -> Result<Filesystem, ProvisioningError>;
    async fn delete_fs(&self, fs: &Filesystem) -> Result<(), ProvisioningError>;
    async fn attach_fs(
        &self,
        instance: &Instance,
        fs: &Filesystem,
        device_name: &str,
    ) -> Result<(), ProvisioningError>;
    async fn detach_fs(&self, instance: &Instance, fs: &Filesystem)
    -> Result<(), ProvisioningError>;

    /// Delete temporary instances left behind by earlier runs that are older than `ttl_days`
    ///
    /// Returns the number of deleted instances.
    async fn delete_tmp_instances(&self, ttl_days: u32) -> Result<usize, ProvisioningError>;

    /// Stop any background cleanup the backend runs on its own
    ///
    /// Called once when a failed run is preserved for inspection.
    async fn turn_off_auto_deletion(&self) -> Result<(), ProvisioningError> {
        Ok(())
    }
}
