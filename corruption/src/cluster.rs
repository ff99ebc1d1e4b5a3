//! Cluster test configuration
//!
//! The configuration file lists every cluster the suite can run against:
//!
//! ```toml
//! [[cluster]]
//! name = "preprod"
//! disk_types = { network-ssd-nonreplicated = "network-ssd-nonreplicated-v2" }
//!
//! [cluster.zones.ru-central1-b]
//! subnet_id = "e2l0aaaaaaaaaaaaaaaa"
//!
//! [cluster.folders.grpc]
//! folder_id = "b1g0aaaaaaaaaaaaaaaa"
//! image_name = "ubuntu1604-stable"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfigFile {
    #[serde(rename = "cluster", default)]
    pub clusters: Vec<ClusterEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterEntry {
    pub name: String,
    #[serde(default)]
    pub zones: BTreeMap<String, ZoneEntry>,
    /// Folder to create resources in, per ipc type
    #[serde(default)]
    pub folders: BTreeMap<String, FolderDesc>,
    /// Logical storage type -> provisioner type id
    #[serde(default)]
    pub disk_types: BTreeMap<String, String>,
    /// Storage types the cluster does not offer; test cases using them are skipped
    #[serde(default)]
    pub excluded_storage_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneEntry {
    pub subnet_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FolderDesc {
    pub folder_id: String,
    pub image_name: String,
}

/// Configuration of one cluster resolved for one zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTestConfig {
    pub name: String,
    pub zone_id: String,
    pub subnet_id: String,
    pub folders: BTreeMap<String, FolderDesc>,
    pub disk_types: BTreeMap<String, String>,
    pub excluded_storage_types: Vec<String>,
}

impl ClusterConfigFile {
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::parse(&content, path)
    }

    /// Look up `cluster` and resolve it for `zone_id`
    pub fn get_cluster_test_config(
        &self,
        cluster: &str,
        zone_id: &str,
    ) -> Result<ClusterTestConfig, ConfigError> {
        let entry = self
            .clusters
            .iter()
            .find(|entry| entry.name == cluster)
            .ok_or_else(|| ConfigError::UnknownCluster(cluster.to_string()))?;
        let zone = entry
            .zones
            .get(zone_id)
            .ok_or_else(|| ConfigError::UnknownZone {
                cluster: cluster.to_string(),
                zone: zone_id.to_string(),
            })?;
        Ok(ClusterTestConfig {
            name: entry.name.clone(),
            zone_id: zone_id.to_string(),
            subnet_id: zone.subnet_id.clone(),
            folders: entry.folders.clone(),
            disk_types: entry.disk_types.clone(),
            excluded_storage_types: entry.excluded_storage_types.clone(),
        })
    }
}

impl ClusterTestConfig {
    pub fn ipc_type_to_folder_desc(&self, ipc_type: &str) -> Result<&FolderDesc, ConfigError> {
        self.folders
            .get(ipc_type)
            .ok_or_else(|| ConfigError::UnknownIpcType {
                cluster: self.name.clone(),
                ipc_type: ipc_type.to_string(),
            })
    }

    /// Concrete disk type id for a logical storage type; unmapped types pass through unchanged
    pub fn translate_disk_type(&self, storage_type: &str) -> String {
        self.disk_types
            .get(storage_type)
            .cloned()
            .unwrap_or_else(|| storage_type.to_string())
    }

    pub fn offers(&self, storage_type: &str) -> bool {
        !self
            .excluded_storage_types
            .iter()
            .any(|excluded| excluded == storage_type)
    }
}
