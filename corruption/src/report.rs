//! Test reports and where they go

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::Error;

/// Outcome of one test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub compute_node: String,
    pub instance_id: String,
    /// Storage size in GiB
    pub size: u64,
    /// Concrete storage type the case ran against
    pub storage_type: String,
    pub block_size: u64,
    pub extra_params: BTreeMap<String, String>,
    pub test_name: String,
    /// `None` when the case passed
    pub failure: Option<String>,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Destination of test reports
#[allow(async_fn_in_trait)]
pub trait ResultsSink {
    async fn publish(&self, report: &TestReport) -> Result<(), Error>;
}

/// What happens to a failed test case
#[derive(Debug)]
pub enum ReportingMode<S> {
    /// Every outcome goes to the sink and the run moves on to the next case
    Recorded(S),
    /// No sink; the first failure aborts the run
    FailFast,
}

impl<S> ReportingMode<S> {
    pub fn is_recorded(&self) -> bool {
        matches!(self, ReportingMode::Recorded(_))
    }
}

/// Appends reports as JSON lines to
/// `<root>/<service>/<suite>/<cluster>/<YYYY-MM-DD>/results.jsonl`
///
/// Reports already written stay in place when a later case aborts the run.
#[derive(Debug, Clone)]
pub struct FsResultsSink {
    dir: PathBuf,
}

impl FsResultsSink {
    pub const RESULTS_FILE: &'static str = "results.jsonl";
    pub const BUILD_INFO_FILE: &'static str = "build-info.json";

    pub fn new(root: &Path, service: &str, suite: &str, cluster: &str, date: &str) -> Self {
        Self {
            dir: root.join(service).join(suite).join(cluster).join(date),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn results_file(&self) -> PathBuf {
        self.dir.join(Self::RESULTS_FILE)
    }

    fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
        move |source| Error::Report {
            path: path.display().to_string(),
            source,
        }
    }

    /// Create the results directory and record the build that produced the results
    pub async fn prepare(&self, build: &common::version::BuildInfo) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(Self::io_error(&self.dir))?;
        let path = self.dir.join(Self::BUILD_INFO_FILE);
        let json = build.to_json().map_err(|error| Error::Report {
            path: path.display().to_string(),
            source: std::io::Error::other(error),
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(Self::io_error(&path))?;
        tracing::info!("Publishing test results to {}", self.dir.display());
        Ok(())
    }
}

impl ResultsSink for FsResultsSink {
    async fn publish(&self, report: &TestReport) -> Result<(), Error> {
        let path = self.results_file();
        let mut line = serde_json::to_string(report).map_err(|error| Error::Report {
            path: path.display().to_string(),
            source: std::io::Error::other(error),
        })?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(Self::io_error(&path))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(Self::io_error(&path))?;
        file.flush().await.map_err(Self::io_error(&path))?;
        tracing::debug!("Published report of {} to {}", report.test_name, path.display());
        Ok(())
    }
}
