//! Execution of a single test case against an attached storage target

use std::collections::BTreeMap;
use std::time::Duration;

use cloud::{Cloud, Instance, Provisioner};
use remote::{RemoteShell, TransportError};

use crate::error::Error;
use crate::report::{ReportingMode, ResultsSink, TestReport};
use crate::test_cases::TestCase;
use crate::{DISK_BLOCK_SIZE, VERIFY_TEST_REMOTE_PATH};

/// Attached storage a test case runs against
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub instance: &'a Instance,
    /// Concrete storage type, as reported
    pub storage_type: &'a str,
    /// Block device or file verify-test works on
    pub path: &'a str,
}

/// Remote command line of verify-test for `test_case` working on `path`
pub fn verify_test_command(test_case: &TestCase, path: &str) -> String {
    format!(
        "{} {} --file {} 2>&1",
        VERIFY_TEST_REMOTE_PATH,
        test_case.verify_test_cmd_args,
        remote::shell_escape(path)
    )
}

/// Run verify-test for `test_case` and classify the outcome
///
/// A non-zero exit code is a test failure. In [`ReportingMode::Recorded`] mode it is published
/// like any other outcome and the report is returned; in [`ReportingMode::FailFast`] mode it is
/// returned as [`Error::Verification`]. Either way, a failure preserves the cloud resources first
/// when the run is in debug mode. Transport failures are always returned as errors; a verify-test
/// still running after `timeout` is abandoned and reported as [`TransportError::Timeout`].
pub async fn run_test_case<Sh, P, S>(
    shell: &Sh,
    cloud: &Cloud<P>,
    reporting: &ReportingMode<S>,
    test_case: &TestCase,
    target: &Target<'_>,
    timeout: Duration,
) -> Result<TestReport, Error>
where
    Sh: RemoteShell,
    P: Provisioner,
    S: ResultsSink,
{
    let instance = target.instance;
    tracing::info!("Running verify-test at instance <id={}>", instance.id);
    let command = verify_test_command(test_case, target.path);
    let result = match tokio::time::timeout(timeout, shell.exec(&instance.ip, &command)).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::error!(
                "verify-test at instance <id={}> did not finish within {}",
                instance.id,
                humantime::format_duration(timeout)
            );
            cloud.preserve_for_inspection().await;
            return Err(TransportError::Timeout {
                host: instance.ip.clone(),
                timeout,
            }
            .into());
        }
    };
    let failure = if result.success() {
        tracing::info!("{}", result.combined_output());
        None
    } else {
        tracing::error!(
            "Failed to execute verify-test with exit code {}:\n{}",
            result.exit_code,
            result.combined_output()
        );
        cloud.preserve_for_inspection().await;
        Some(Error::Verification {
            exit_code: result.exit_code,
        })
    };
    let report = TestReport {
        compute_node: instance.compute_node.clone(),
        instance_id: instance.id.clone(),
        size: test_case.size,
        storage_type: target.storage_type.to_string(),
        block_size: DISK_BLOCK_SIZE,
        extra_params: BTreeMap::new(),
        test_name: test_case.name.clone(),
        failure: failure.as_ref().map(ToString::to_string),
    };
    match (reporting, failure) {
        (ReportingMode::Recorded(sink), _) => {
            sink.publish(&report).await?;
            Ok(report)
        }
        (ReportingMode::FailFast, Some(error)) => Err(error),
        (ReportingMode::FailFast, None) => Ok(report),
    }
}
