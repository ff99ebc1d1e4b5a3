//! Corruption test orchestration
//!
//! A run provisions one test instance, stages the `verify-test` tool on it and then walks the
//! test-case matrix of the selected suite. Each test case gets a fresh block disk or network
//! filesystem, attached for the duration of that case only. The outcome of every case is either
//! recorded in a results sink or, without one, aborts the run on the first failure.

pub mod cluster;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod test_cases;

pub use error::{ConfigError, Error};
pub use pipeline::{PipelineConfig, RunSummary, run_corruption_test};
pub use report::{FsResultsSink, ReportingMode, ResultsSink, TestReport};
pub use test_cases::{TestCase, generate_test_cases};

/// Where the verification tool is installed on the test instance
pub const VERIFY_TEST_REMOTE_PATH: &str = "/usr/bin/verify-test";
pub const TEST_INSTANCE_CORES: u32 = 4;
/// The 64MB-bs suite needs at least 8 GiB of RAM on the instance
pub const TEST_INSTANCE_MEMORY_GIB: u32 = 16;
pub const DEFAULT_ZONE_ID: &str = "ru-central1-b";
/// Block size reported for every test case
pub const DISK_BLOCK_SIZE: u64 = 4096;

pub const BLOCK_DEVICE_PATH: &str = "/dev/vdb";
pub const FS_DEVICE_NAME: &str = "nfs";
pub const FS_MOUNT_PATH: &str = "/test";

/// Storage service under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Service {
    /// Network block storage, tested through an attached disk
    Nbs,
    /// Network filesystem, tested through a virtiofs mount
    Nfs,
}

impl Service {
    pub fn as_str(self) -> &'static str {
        match self {
            Service::Nbs => "nbs",
            Service::Nfs => "nfs",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
