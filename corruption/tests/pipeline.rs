//! End-to-end runs of the orchestration pipeline against an in-memory cloud and shell

mod support;

use std::time::Duration;

use tracing_test::traced_test;

use corruption::pipeline::{RunSummary, run_corruption_test};
use corruption::{Error, ReportingMode, Service};
use remote::TransportError;
use support::{
    FakeProvisioner, FakeShell, Journal, MemorySink, pipeline_config, plan, test_case, tool_binary,
};

fn recorded() -> ReportingMode<MemorySink> {
    ReportingMode::Recorded(MemorySink::default())
}

fn sink(reporting: &ReportingMode<MemorySink>) -> &MemorySink {
    match reporting {
        ReportingMode::Recorded(sink) => sink,
        ReportingMode::FailFast => unreachable!(),
    }
}

#[tokio::test]
async fn block_case_passes() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nbs, false, &tool_binary(dir.path()));
    let plan = plan(vec![test_case("seq-read", 4096, "ssd")]);
    let reporting = recorded();
    let summary = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &FakeShell::new(&journal),
        &reporting,
    )
    .await
    .unwrap();

    assert_eq!(
        summary,
        RunSummary {
            executed: 1,
            passed: 1,
            failed: 0
        }
    );
    let reports = sink(&reporting).reports();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.failure, None);
    assert_eq!(report.test_name, "seq-read");
    assert_eq!(report.size, 4096);
    assert_eq!(report.storage_type, "ssd");
    assert_eq!(report.block_size, 4096);
    assert_eq!(report.instance_id, "i-1");
    assert_eq!(report.compute_node, "node-1");
    assert!(report.extra_params.is_empty());

    assert_eq!(
        journal.events(),
        vec![
            "delete_tmp_instances 7",
            "create_instance i-1 ubuntu2004",
            "exec true",
            "upload /usr/bin/verify-test 17 bytes mode 755",
            "create_disk d-2 ssd 4096",
            "attach_disk d-2",
            "exec test -b /dev/vdb",
            "exec /usr/bin/verify-test --blocksize 4096 --iodepth 64 --file /dev/vdb 2>&1",
            "detach_disk d-2",
            "delete_disk d-2",
            "delete_instance i-1",
        ]
    );
}

#[tokio::test]
async fn block_failure_is_recorded_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nbs, false, &tool_binary(dir.path()));
    let plan = plan(vec![test_case("seq-read", 4096, "ssd")]);
    let shell = FakeShell::new(&journal).verify_outcomes(&[(1, "checksum mismatch\n")]);
    let reporting = recorded();
    let summary = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &shell,
        &reporting,
    )
    .await
    .unwrap();

    assert_eq!(summary.failed, 1);
    let reports = sink(&reporting).reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].failure.as_deref(),
        Some("verify-test execution failed with exit code 1")
    );
    assert_eq!(journal.count("turn_off_auto_deletion"), 0);
    assert_eq!(journal.count("delete_instance"), 1);
}

#[tokio::test]
async fn fail_fast_in_debug_mode_keeps_resources() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nbs, true, &tool_binary(dir.path()));
    let plan = plan(vec![test_case("seq-read", 4096, "ssd")]);
    let shell = FakeShell::new(&journal).verify_outcomes(&[(1, "checksum mismatch\n")]);
    let error = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &shell,
        &ReportingMode::<MemorySink>::FailFast,
    )
    .await
    .unwrap_err();

    assert!(matches!(error, Error::Verification { exit_code: 1 }));
    assert_eq!(journal.count("turn_off_auto_deletion"), 1);
    assert_eq!(journal.count("detach_disk"), 0);
    assert_eq!(journal.count("delete_disk"), 0);
    assert_eq!(journal.count("delete_instance"), 0);
    assert!(
        journal.position("turn_off_auto_deletion").unwrap()
            > journal.position("exec /usr/bin/verify-test").unwrap()
    );
}

#[tokio::test]
async fn mount_failure_aborts_before_verification() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nfs, false, &tool_binary(dir.path()));
    let plan = plan(vec![
        test_case("seq-read-ssd", 32, "ssd"),
        test_case("seq-read-hdd", 32, "hdd"),
    ]);
    let shell = FakeShell::new(&journal).mount_exit_code(1);
    let reporting = recorded();
    let error = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &shell,
        &reporting,
    )
    .await
    .unwrap_err();

    assert!(matches!(error, Error::Mount { exit_code: 1 }));
    assert_eq!(error.to_string(), "failed to mount fs with exit code 1");
    assert_eq!(journal.count("exec /usr/bin/verify-test"), 0);
    assert!(sink(&reporting).reports().is_empty());
    assert_eq!(journal.count("create_fs"), 1);
    assert_eq!(journal.count("turn_off_auto_deletion"), 0);
    let events = journal.events();
    assert_eq!(
        events[events.len() - 3..],
        ["detach_fs f-2", "delete_fs f-2", "delete_instance i-1"]
    );
}

#[tokio::test]
async fn mount_failure_in_debug_mode_keeps_resources() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nfs, true, &tool_binary(dir.path()));
    let plan = plan(vec![test_case("seq-read-ssd", 32, "ssd")]);
    let shell = FakeShell::new(&journal).mount_exit_code(32);
    let error = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &shell,
        &ReportingMode::<MemorySink>::FailFast,
    )
    .await
    .unwrap_err();

    assert!(matches!(error, Error::Mount { exit_code: 32 }));
    assert_eq!(journal.count("turn_off_auto_deletion"), 1);
    assert_eq!(journal.count("detach_fs"), 0);
    assert_eq!(journal.count("delete_fs"), 0);
    assert_eq!(journal.count("delete_instance"), 0);
}

#[tokio::test]
async fn unreachable_instance_creates_no_storage() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nbs, false, &tool_binary(dir.path()));
    let plan = plan(vec![test_case("seq-read", 4096, "ssd")]);
    let error = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &FakeShell::new(&journal).unreachable(),
        &recorded(),
    )
    .await
    .unwrap_err();

    assert!(matches!(error, Error::Unreachable(_)));
    assert!(
        error
            .to_string()
            .starts_with("failed to start test, problem with ssh connection")
    );
    assert_eq!(journal.count("exec true"), 3);
    assert_eq!(journal.count("upload"), 0);
    assert_eq!(journal.count("create_disk"), 0);
    assert_eq!(journal.count("turn_off_auto_deletion"), 0);
    assert_eq!(journal.events().last().unwrap(), "delete_instance i-1");
}

#[tokio::test]
async fn unreachable_instance_in_debug_mode_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nbs, true, &tool_binary(dir.path()));
    let plan = plan(vec![test_case("seq-read", 4096, "ssd")]);
    let error = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &FakeShell::new(&journal).unreachable(),
        &recorded(),
    )
    .await
    .unwrap_err();

    assert!(matches!(error, Error::Unreachable(_)));
    assert_eq!(journal.count("turn_off_auto_deletion"), 1);
    assert_eq!(journal.count("delete_instance"), 0);
}

#[tokio::test]
async fn recorded_mode_runs_every_case() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nbs, false, &tool_binary(dir.path()));
    let plan = plan(vec![
        test_case("a", 32, "network-ssd"),
        test_case("b", 93, "network-ssd-nonreplicated"),
        test_case("c", 32, "network-ssd"),
    ]);
    let shell = FakeShell::new(&journal).verify_outcomes(&[(1, "bad\n"), (0, ""), (2, "bad\n")]);
    let reporting = recorded();
    let summary = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &shell,
        &reporting,
    )
    .await
    .unwrap();

    assert_eq!(journal.count("exec /usr/bin/verify-test"), 3);
    assert_eq!(
        summary,
        RunSummary {
            executed: 3,
            passed: 1,
            failed: 2
        }
    );
    let reports = sink(&reporting).reports();
    let names: Vec<_> = reports.iter().map(|r| r.test_name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    // nonreplicated disks are created with the cluster's concrete type
    assert_eq!(reports[1].storage_type, "network-ssd-nonreplicated-v2");
    assert!(journal.position("create_disk d-3 network-ssd-nonreplicated-v2 93").is_some());
    assert_eq!(
        reports[2].failure.as_deref(),
        Some("verify-test execution failed with exit code 2")
    );
}

#[tokio::test]
async fn fail_fast_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nbs, false, &tool_binary(dir.path()));
    let plan = plan(vec![
        test_case("a", 32, "network-ssd"),
        test_case("b", 32, "network-ssd"),
        test_case("c", 32, "network-ssd"),
    ]);
    let shell = FakeShell::new(&journal).verify_outcomes(&[(0, ""), (1, "bad\n")]);
    let error = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &shell,
        &ReportingMode::<MemorySink>::FailFast,
    )
    .await
    .unwrap_err();

    assert!(matches!(error, Error::Verification { exit_code: 1 }));
    assert_eq!(journal.count("exec /usr/bin/verify-test"), 2);
    assert_eq!(journal.count("create_disk"), 2);
    assert_eq!(journal.count("delete_disk"), 2);
    assert_eq!(journal.count("turn_off_auto_deletion"), 0);
    assert_eq!(journal.events().last().unwrap(), "delete_instance i-1");
}

#[tokio::test]
async fn storage_is_released_before_next_case() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nbs, false, &tool_binary(dir.path()));
    let plan = plan(vec![
        test_case("a", 32, "network-ssd"),
        test_case("b", 32, "network-ssd"),
    ]);
    run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &FakeShell::new(&journal),
        &recorded(),
    )
    .await
    .unwrap();

    let at = |event: &str| journal.position(event).unwrap();
    assert!(at("detach_disk d-2") < at("delete_disk d-2"));
    assert!(at("delete_disk d-2") < at("create_disk d-3"));
    assert!(at("detach_disk d-3") < at("delete_disk d-3"));
    assert!(at("delete_disk d-3") < at("delete_instance i-1"));
}

#[tokio::test]
async fn filesystem_case_mounts_and_unmounts() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nfs, false, &tool_binary(dir.path()));
    let plan = plan(vec![test_case("seq-read-ssd", 32, "ssd")]);
    let reporting = recorded();
    run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &FakeShell::new(&journal),
        &reporting,
    )
    .await
    .unwrap();

    let events = journal.events();
    assert_eq!(
        events[4..],
        [
            "create_fs f-2 ssd 32",
            "attach_fs f-2 nfs",
            "exec mkdir -p /test && mount -t virtiofs nfs /test && touch /test/test.txt",
            "exec /usr/bin/verify-test --blocksize 4096 --iodepth 64 --file /test/test.txt 2>&1",
            "exec umount /test",
            "detach_fs f-2",
            "delete_fs f-2",
            "delete_instance i-1",
        ]
    );
    assert_eq!(sink(&reporting).reports()[0].storage_type, "ssd");
}

#[tokio::test]
async fn debug_mode_turns_off_auto_deletion_once() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nbs, true, &tool_binary(dir.path()));
    let plan = plan(vec![
        test_case("a", 32, "network-ssd"),
        test_case("b", 32, "network-ssd"),
    ]);
    let shell = FakeShell::new(&journal).verify_outcomes(&[(1, "bad\n"), (1, "bad\n")]);
    let summary = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &shell,
        &recorded(),
    )
    .await
    .unwrap();

    assert_eq!(summary.failed, 2);
    assert_eq!(journal.count("turn_off_auto_deletion"), 1);
    assert_eq!(journal.count("delete_disk"), 0);
    assert_eq!(journal.count("delete_instance"), 0);
    // the kept disk is detached before the next one is attached
    let at = |event: &str| journal.position(event).unwrap();
    assert!(at("detach_disk d-2") < at("create_disk d-3"));
    assert!(at("detach_disk d-3") > at("exec /usr/bin/verify-test"));
    assert_eq!(journal.count("detach_disk"), 2);
}

#[tokio::test]
async fn preserved_filesystem_is_unmounted_before_next_case() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nfs, true, &tool_binary(dir.path()));
    let plan = plan(vec![
        test_case("seq-read-ssd", 32, "ssd"),
        test_case("seq-read-hdd", 32, "hdd"),
    ]);
    let shell = FakeShell::new(&journal).verify_outcomes(&[(1, "bad\n")]);
    let summary = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &shell,
        &recorded(),
    )
    .await
    .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(journal.count("turn_off_auto_deletion"), 1);
    assert_eq!(journal.count("exec umount /test"), 2);
    assert_eq!(journal.count("delete_fs"), 0);
    let at = |event: &str| journal.position(event).unwrap();
    assert!(at("exec umount /test") < at("detach_fs f-2"));
    assert!(at("detach_fs f-2") < at("attach_fs f-3 nfs"));
}

#[tokio::test]
async fn hung_verification_times_out_and_releases() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let mut config = pipeline_config(Service::Nbs, false, &tool_binary(dir.path()));
    config.verify_timeout = Duration::from_millis(50);
    let plan = plan(vec![test_case("a", 32, "network-ssd")]);
    let shell = FakeShell::new(&journal).verify_hangs();
    let reporting = ReportingMode::<MemorySink>::FailFast;
    let run = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &shell,
        &reporting,
    );
    let error = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("run must be bounded by the verification timeout")
        .unwrap_err();

    assert!(matches!(
        error,
        Error::Transport(TransportError::Timeout { .. })
    ));
    let events = journal.events();
    assert_eq!(
        events[events.len() - 3..],
        ["detach_disk d-2", "delete_disk d-2", "delete_instance i-1"]
    );
}

#[tokio::test]
async fn hung_verification_in_debug_mode_keeps_resources() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let mut config = pipeline_config(Service::Nbs, true, &tool_binary(dir.path()));
    config.verify_timeout = Duration::from_millis(50);
    let plan = plan(vec![test_case("a", 32, "network-ssd")]);
    let shell = FakeShell::new(&journal).verify_hangs();
    let error = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &shell,
        &recorded(),
    )
    .await
    .unwrap_err();

    assert!(matches!(error, Error::Transport(_)));
    assert_eq!(journal.count("turn_off_auto_deletion"), 1);
    assert_eq!(journal.count("detach_disk"), 0);
    assert_eq!(journal.count("delete_instance"), 0);
}

#[tokio::test]
#[traced_test]
async fn verification_failure_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nbs, false, &tool_binary(dir.path()));
    let plan = plan(vec![test_case("a", 32, "network-ssd")]);
    let shell = FakeShell::new(&journal).verify_outcomes(&[(3, "block 17 checksum mismatch\n")]);
    run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &shell,
        &recorded(),
    )
    .await
    .unwrap();

    assert!(logs_contain("Failed to execute verify-test with exit code 3"));
    assert!(logs_contain("Corruption test suite <custom> finished: 0 passed, 1 failed"));
}

#[tokio::test]
async fn missing_tool_binary_is_a_staging_error() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let config = pipeline_config(Service::Nbs, false, &dir.path().join("missing"));
    let plan = plan(vec![test_case("a", 32, "network-ssd")]);
    let error = run_corruption_test(
        &config,
        &plan,
        FakeProvisioner::new(&journal),
        &FakeShell::new(&journal),
        &recorded(),
    )
    .await
    .unwrap_err();

    assert!(matches!(error, Error::Staging(_)));
    assert_eq!(journal.count("create_disk"), 0);
    assert_eq!(journal.events().last().unwrap(), "delete_instance i-1");
}

#[tokio::test]
async fn stale_instance_collection_on_empty_backend_is_noop() {
    let journal = Journal::default();
    let cloud = cloud::Cloud::new(FakeProvisioner::new(&journal));
    cloud.delete_tmp_instances(0).await;
    assert_eq!(journal.events(), vec!["delete_tmp_instances 0"]);
    assert!(cloud.auto_deletion_enabled());
}
