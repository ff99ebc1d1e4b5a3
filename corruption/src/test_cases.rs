//! Built-in test suites
//!
//! A suite is a list of verify-test invocations. Each one is expanded over the storage types of the
//! service under test, giving the ordered test-case matrix of a run.

use crate::Service;
use crate::cluster::ClusterTestConfig;
use crate::error::ConfigError;

/// One corruption scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    /// Storage size in GiB
    pub size: u64,
    /// Logical storage type, translated per cluster for block storage
    pub storage_type: String,
    /// Arguments passed to verify-test before `--file`
    pub verify_test_cmd_args: String,
}

struct SuiteEntry {
    name: &'static str,
    args: &'static str,
}

pub const TEST_SUITES: &[&str] = &["default", "512bytes-bs", "64MB-bs", "ranges-intersection"];

fn suite_entries(suite: &str) -> Option<&'static [SuiteEntry]> {
    let entries: &'static [SuiteEntry] = match suite {
        "default" => &[
            SuiteEntry {
                name: "sequential-4k",
                args: "--blocksize 4096 --iodepth 64 --filesize 16G",
            },
            SuiteEntry {
                name: "random-4k",
                args: "--blocksize 4096 --iodepth 64 --filesize 16G --random",
            },
        ],
        "512bytes-bs" => &[SuiteEntry {
            name: "512bytes-bs",
            args: "--blocksize 512 --iodepth 64 --filesize 1G",
        }],
        // 128 requests of 64 MiB in flight need 8 GiB of memory on the instance
        "64MB-bs" => &[SuiteEntry {
            name: "64MB-bs",
            args: "--blocksize 67108864 --iodepth 128 --filesize 16G",
        }],
        "ranges-intersection" => &[SuiteEntry {
            name: "ranges-intersection",
            args: "--blocksize 4096 --iodepth 64 --filesize 4G --request-block-count 8 --write-parts 4",
        }],
        _ => return None,
    };
    Some(entries)
}

/// Storage types exercised per service, with the volume size in GiB
fn storage_types(service: Service) -> &'static [(&'static str, u64)] {
    match service {
        Service::Nbs => &[("network-ssd", 32), ("network-ssd-nonreplicated", 93)],
        Service::Nfs => &[("ssd", 32), ("hdd", 32)],
    }
}

/// Expand `suite` into its ordered test-case matrix for `cluster` and `service`
///
/// Storage types the cluster does not offer are left out. A suite that ends up empty is an error,
/// as is an unknown suite name.
pub fn generate_test_cases(
    suite: &str,
    cluster: &ClusterTestConfig,
    service: Service,
) -> Result<Vec<TestCase>, ConfigError> {
    let entries = suite_entries(suite).ok_or_else(|| ConfigError::UnknownSuite(suite.to_string()))?;
    let mut test_cases = Vec::new();
    for entry in entries {
        for &(storage_type, size) in storage_types(service) {
            if !cluster.offers(storage_type) {
                tracing::debug!(
                    "Skipping {} on {}: not offered by cluster <{}>",
                    entry.name,
                    storage_type,
                    cluster.name
                );
                continue;
            }
            test_cases.push(TestCase {
                name: format!("{}-{}", entry.name, storage_type),
                size,
                storage_type: storage_type.to_string(),
                verify_test_cmd_args: entry.args.to_string(),
            });
        }
    }
    if test_cases.is_empty() {
        return Err(ConfigError::EmptySuite {
            suite: suite.to_string(),
            cluster: cluster.name.clone(),
        });
    }
    Ok(test_cases)
}
