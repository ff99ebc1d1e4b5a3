//! [`Provisioner`] backed by the `yc` command line tool
//!
//! Every operation is a single `yc compute ... --format json` invocation. Resource names carry a
//! fixed prefix so that instances abandoned by crashed runs can be found and collected later.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    Disk, DiskSpec, Filesystem, FilesystemSpec, Instance, InstanceSpec, ProvisioningError,
    Provisioner,
};

const GIB: &str = "G";

#[derive(Debug, Clone)]
pub struct YcConfig {
    /// Path to the `yc` executable
    pub binary: PathBuf,
    pub profile: Option<String>,
    pub folder_id: String,
    pub zone_id: String,
    pub subnet_id: String,
    /// Public key installed for the default user of new instances
    pub ssh_public_key: Option<PathBuf>,
    pub platform_id: String,
    pub name_prefix: String,
}

impl YcConfig {
    pub fn new(folder_id: String, zone_id: String, subnet_id: String) -> Self {
        Self {
            binary: PathBuf::from("yc"),
            profile: None,
            folder_id,
            zone_id,
            subnet_id,
            ssh_public_key: None,
            platform_id: "standard-v3".to_string(),
            name_prefix: "corruption-test-".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct YcProvisioner {
    config: YcConfig,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InstanceResponse {
    id: String,
    /// Host the instance landed on, when the API reports it
    #[serde(default)]
    host_id: Option<String>,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
struct NetworkInterface {
    primary_v4_address: Option<V4Address>,
}

#[derive(Debug, Deserialize)]
struct V4Address {
    address: String,
    one_to_one_nat: Option<OneToOneNat>,
}

#[derive(Debug, Deserialize)]
struct OneToOneNat {
    address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ListedInstance {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
}

/// Host reported for the instance, else the requested one, else "any"
fn instance_host(response: &InstanceResponse, requested: Option<&str>) -> String {
    response
        .host_id
        .as_deref()
        .filter(|host| !host.is_empty())
        .or(requested)
        .unwrap_or("any")
        .to_string()
}

/// Public address of the instance, falling back to the internal one
fn instance_address(response: &InstanceResponse) -> Option<String> {
    let address = response
        .network_interfaces
        .iter()
        .find_map(|iface| iface.primary_v4_address.as_ref())?;
    let nat = address
        .one_to_one_nat
        .as_ref()
        .and_then(|nat| nat.address.clone())
        .filter(|addr| !addr.is_empty());
    Some(nat.unwrap_or_else(|| address.address.clone()))
}

fn select_stale<'a>(
    instances: &'a [ListedInstance],
    prefix: &str,
    ttl_days: u32,
    now: DateTime<Utc>,
) -> Vec<&'a ListedInstance> {
    let ttl = chrono::Duration::days(i64::from(ttl_days));
    instances
        .iter()
        .filter(|instance| instance.name.starts_with(prefix) && now - instance.created_at > ttl)
        .collect()
}

fn resource_name(prefix: &str, kind: &str, now: DateTime<Utc>) -> String {
    format!("{}{}-{}", prefix, kind, now.format("%Y%m%d-%H%M%S-%9f"))
}

impl YcProvisioner {
    pub fn new(config: YcConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &YcConfig {
        &self.config
    }

    fn name(&self, kind: &str) -> String {
        resource_name(&self.config.name_prefix, kind, Utc::now())
    }

    fn instance_create_args(&self, spec: &InstanceSpec, name: &str) -> Vec<String> {
        let head: [&str; 9] = [
            "compute",
            "instance",
            "create",
            "--name",
            name,
            "--zone",
            &self.config.zone_id,
            "--platform-id",
            &self.config.platform_id,
        ];
        let mut args = args(&head);
        args.extend([
            "--cores".to_string(),
            spec.cores.to_string(),
            "--memory".to_string(),
            format!("{}{}", spec.memory_gib, GIB),
            "--create-boot-disk".to_string(),
            format!("image-name={}", spec.image_name),
            "--network-interface".to_string(),
            format!("subnet-id={},nat-ip-version=ipv4", self.config.subnet_id),
            "--description".to_string(),
            spec.description.clone(),
        ]);
        if let Some(node) = &spec.compute_node {
            args.extend(["--host-id".to_string(), node.clone()]);
        }
        if let Some(key) = &self.config.ssh_public_key {
            args.extend(["--ssh-key".to_string(), key.display().to_string()]);
        }
        args
    }

    fn global_args(&self) -> Vec<String> {
        let mut args = vec![
            "--folder-id".to_string(),
            self.config.folder_id.clone(),
            "--format".to_string(),
            "json".to_string(),
        ];
        if let Some(profile) = &self.config.profile {
            args.extend(["--profile".to_string(), profile.clone()]);
        }
        args
    }

    async fn run(&self, operation: &str, args: Vec<String>) -> Result<String, ProvisioningError> {
        let mut command = tokio::process::Command::new(&self.config.binary);
        command.args(&args).args(self.global_args());
        tracing::debug!("Running {} {}", self.config.binary.display(), args.join(" "));
        let output = command
            .output()
            .await
            .map_err(|error| ProvisioningError::failed(operation, error))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisioningError::failed(
                operation,
                format!("yc exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        args: Vec<String>,
    ) -> Result<T, ProvisioningError> {
        let stdout = self.run(operation, args).await?;
        serde_json::from_str(&stdout).map_err(|error| ProvisioningError::BadResponse {
            operation: operation.to_string(),
            reason: error.to_string(),
        })
    }

    async fn delete_instance_by_id(&self, id: &str) -> Result<(), ProvisioningError> {
        self.run(
            "delete instance",
            args(&["compute", "instance", "delete", "--id", id]),
        )
        .await
        .map(|_| ())
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Provisioner for YcProvisioner {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance, ProvisioningError> {
        let name = self.name("vm");
        let response: InstanceResponse = self
            .call("create instance", self.instance_create_args(spec, &name))
            .await?;
        let ip = instance_address(&response).ok_or_else(|| ProvisioningError::BadResponse {
            operation: "create instance".to_string(),
            reason: format!("instance {} has no IPv4 address", response.id),
        })?;
        let compute_node = instance_host(&response, spec.compute_node.as_deref());
        Ok(Instance {
            id: response.id,
            ip,
            compute_node,
        })
    }

    async fn delete_instance(&self, instance: &Instance) -> Result<(), ProvisioningError> {
        self.delete_instance_by_id(&instance.id).await
    }

    async fn create_disk(&self, spec: &DiskSpec) -> Result<Disk, ProvisioningError> {
        let name = self.name("disk");
        let size = format!("{}{}", spec.size_gib, GIB);
        let created: Created = self
            .call(
                "create disk",
                args(&[
                    "compute",
                    "disk",
                    "create",
                    "--name",
                    &name,
                    "--zone",
                    &self.config.zone_id,
                    "--size",
                    &size,
                    "--type",
                    &spec.type_id,
                    "--description",
                    &spec.description,
                ]),
            )
            .await?;
        Ok(Disk {
            id: created.id,
            size_gib: spec.size_gib,
            type_id: spec.type_id.clone(),
        })
    }

    async fn delete_disk(&self, disk: &Disk) -> Result<(), ProvisioningError> {
        self.run(
            "delete disk",
            args(&["compute", "disk", "delete", "--id", &disk.id]),
        )
        .await
        .map(|_| ())
    }

    async fn attach_disk(&self, instance: &Instance, disk: &Disk) -> Result<(), ProvisioningError> {
        self.run(
            "attach disk",
            args(&[
                "compute",
                "instance",
                "attach-disk",
                "--id",
                &instance.id,
                "--disk-id",
                &disk.id,
            ]),
        )
        .await
        .map(|_| ())
    }

    async fn detach_disk(&self, instance: &Instance, disk: &Disk) -> Result<(), ProvisioningError> {
        self.run(
            "detach disk",
            args(&[
                "compute",
                "instance",
                "detach-disk",
                "--id",
                &instance.id,
                "--disk-id",
                &disk.id,
            ]),
        )
        .await
        .map(|_| ())
    }

    async fn create_fs(&self, spec: &FilesystemSpec) -> Result<Filesystem, ProvisioningError> {
        let name = self.name("fs");
        let size = format!("{}{}", spec.size_gib, GIB);
        let created: Created = self
            .call(
                "create filesystem",
                args(&[
                    "compute",
                    "filesystem",
                    "create",
                    "--name",
                    &name,
                    "--zone",
                    &self.config.zone_id,
                    "--size",
                    &size,
                    "--type",
                    &spec.type_id,
                    "--description",
                    &spec.description,
                ]),
            )
            .await?;
        Ok(Filesystem {
            id: created.id,
            size_gib: spec.size_gib,
            type_id: spec.type_id.clone(),
        })
    }

    async fn delete_fs(&self, fs: &Filesystem) -> Result<(), ProvisioningError> {
        self.run(
            "delete filesystem",
            args(&["compute", "filesystem", "delete", "--id", &fs.id]),
        )
        .await
        .map(|_| ())
    }

    async fn attach_fs(
        &self,
        instance: &Instance,
        fs: &Filesystem,
        device_name: &str,
    ) -> Result<(), ProvisioningError> {
        self.run(
            "attach filesystem",
            args(&[
                "compute",
                "instance",
                "attach-filesystem",
                "--id",
                &instance.id,
                "--filesystem-id",
                &fs.id,
                "--device-name",
                device_name,
            ]),
        )
        .await
        .map(|_| ())
    }

    async fn detach_fs(
        &self,
        instance: &Instance,
        fs: &Filesystem,
    ) -> Result<(), ProvisioningError> {
        self.run(
            "detach filesystem",
            args(&[
                "compute",
                "instance",
                "detach-filesystem",
                "--id",
                &instance.id,
                "--filesystem-id",
                &fs.id,
            ]),
        )
        .await
        .map(|_| ())
    }

    async fn delete_tmp_instances(&self, ttl_days: u32) -> Result<usize, ProvisioningError> {
        let listed: Vec<ListedInstance> = self
            .call("list instances", args(&["compute", "instance", "list"]))
            .await?;
        let stale = select_stale(&listed, &self.config.name_prefix, ttl_days, Utc::now());
        let mut deleted = 0;
        for instance in stale {
            tracing::info!(
                "Deleting stale instance {} <id={}> created at {}",
                instance.name,
                instance.id,
                instance.created_at
            );
            match self.delete_instance_by_id(&instance.id).await {
                Ok(()) => deleted += 1,
                Err(error) => tracing::warn!("{:#}", error),
            }
        }
        Ok(deleted)
    }
}
