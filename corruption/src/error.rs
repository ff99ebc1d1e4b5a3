use cloud::ProvisioningError;
use remote::TransportError;
use remote::deploy::DeployError;

/// Invalid or missing run configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read cluster config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse cluster config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("cluster <{0}> is not configured")]
    UnknownCluster(String),

    #[error("zone <{zone}> is not configured for cluster <{cluster}>")]
    UnknownZone { cluster: String, zone: String },

    #[error("ipc type <{ipc_type}> has no folder in cluster <{cluster}>")]
    UnknownIpcType { cluster: String, ipc_type: String },

    #[error("unknown test suite <{0}>")]
    UnknownSuite(String),

    #[error("test suite <{suite}> has no test cases for cluster <{cluster}>")]
    EmptySuite { suite: String, cluster: String },
}

/// Terminal failure of a corruption test run
///
/// Any of these aborts the remaining test cases. A failed verification is only surfaced here in
/// fail-fast mode; with a results sink it is recorded instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error("failed to mount fs with exit code {exit_code}")]
    Mount { exit_code: i32 },

    #[error("verify-test execution failed with exit code {exit_code}")]
    Verification { exit_code: i32 },

    #[error("failed to start test, problem with ssh connection: {0}")]
    Unreachable(#[source] TransportError),

    #[error("block device {device} did not appear on instance <id={instance_id}> after {attempts} attempt(s)")]
    DeviceNotFound {
        instance_id: String,
        device: String,
        attempts: u32,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to stage verify-test: {0}")]
    Staging(#[from] DeployError),

    #[error("failed to publish test report to {path}: {source}")]
    Report {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
