use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::instrument;

use common::version::BuildInfo;
use corruption::cluster::ClusterConfigFile;
use corruption::pipeline::{self, PipelineConfig, RunSummary};
use corruption::{FsResultsSink, ReportingMode, Service};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "corruption-test",
    version,
    about = "Run a corruption test suite against network block or filesystem storage",
    long_about = "`corruption-test` provisions a short-lived instance, stages verify-test on it and runs
every test case of a suite against a freshly created disk (nbs) or filesystem (nfs).

EXAMPLE:
    # Run the default suite against block storage, recording results
    corruption-test --cluster preprod --cluster-config-path clusters.toml \\
        --test-suite default --verify-test-path ./verify-test --results-path ./results

Without --results-path the run stops at the first failing test case. With --debug the
resources of a failed run are kept for inspection."
)]
struct Args {
    // Test arguments
    /// Cluster to run the test at
    #[arg(long, help_heading = "Test arguments")]
    cluster: String,

    /// Path to the cluster test configuration (TOML)
    #[arg(long, value_name = "PATH", help_heading = "Test arguments")]
    cluster_config_path: PathBuf,

    /// Zone to create resources in
    #[arg(long, default_value = corruption::DEFAULT_ZONE_ID, help_heading = "Test arguments")]
    zone_id: String,

    /// Storage service under test
    #[arg(long, value_enum, default_value_t = Service::Nbs, help_heading = "Test arguments")]
    service: Service,

    /// IPC type, selects the cloud folder and image
    #[arg(long, default_value = "grpc", help_heading = "Test arguments")]
    ipc_type: String,

    /// Test suite to run: default, 512bytes-bs, 64MB-bs or ranges-intersection
    #[arg(long, value_name = "SUITE", help_heading = "Test arguments")]
    test_suite: String,

    /// Local path to the verify-test tool
    #[arg(long, value_name = "PATH", help_heading = "Test arguments")]
    verify_test_path: PathBuf,

    /// Run the test instance on this compute node
    #[arg(long, value_name = "NODE", help_heading = "Test arguments")]
    compute_node: Option<String>,

    /// Age after which temporary instances of earlier runs are deleted
    #[arg(
        long,
        default_value = "7",
        value_name = "DAYS",
        help_heading = "Test arguments"
    )]
    ttl_instance_days: u32,

    /// Longest a single verify-test run may take before the test case is abandoned
    ///
    /// This option accepts a human readable duration, e.g. "45min", "2h" etc.
    #[arg(long, default_value = "2h", value_parser = humantime::parse_duration, value_name = "DURATION", help_heading = "Test arguments")]
    verify_timeout: Duration,

    /// Do not delete the instance and storage if the run fails
    #[arg(long, help_heading = "Test arguments")]
    debug: bool,

    /// Record every test case outcome under this directory instead of stopping at the first failure
    #[arg(long, value_name = "PATH", help_heading = "Test arguments")]
    results_path: Option<PathBuf>,

    // Cloud
    /// Log cloud and remote actions instead of performing them
    #[arg(long, help_heading = "Cloud")]
    dry_run: bool,

    /// yc profile to use, defaults to the cluster name
    #[arg(long, value_name = "NAME", help_heading = "Cloud")]
    profile_name: Option<String>,

    // SSH
    /// Private key for SSH connections; its `.pub` counterpart is installed on the instance
    #[arg(long, value_name = "PATH", help_heading = "SSH")]
    ssh_key_path: Option<PathBuf>,

    /// User for SSH connections
    #[arg(long, value_name = "USER", help_heading = "SSH")]
    ssh_user: Option<String>,

    /// How long to wait for the instance to become reachable via SSH
    ///
    /// This option accepts a human readable duration, e.g. "90s", "5min" etc.
    #[arg(long, default_value = "5min", value_parser = humantime::parse_duration, value_name = "DURATION", help_heading = "SSH")]
    ssh_timeout: Duration,

    /// How long to wait for an attached disk to appear as a block device
    #[arg(long, default_value = "2min", value_parser = humantime::parse_duration, value_name = "DURATION", help_heading = "SSH")]
    device_timeout: Duration,

    // Output
    /// Verbose level: -v DEBUG / -vv TRACE (default: INFO)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Output")]
    summary: bool,

    /// Quiet mode, only report errors
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose", help_heading = "Output")]
    quiet: bool,

    /// Print build information as JSON and exit
    #[arg(long, help_heading = "Output")]
    build_info: bool,
}

const SSH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn public_key_path(private_key: &Path) -> PathBuf {
    let mut path = private_key.as_os_str().to_owned();
    path.push(".pub");
    PathBuf::from(path)
}

#[instrument(skip_all)]
async fn async_main(args: Args) -> Result<RunSummary> {
    let build = BuildInfo::current();
    tracing::info!("corruption-test {}", build);
    let clusters = ClusterConfigFile::load(&args.cluster_config_path).await?;
    let config = PipelineConfig {
        cluster: args.cluster.clone(),
        zone_id: args.zone_id.clone(),
        service: args.service,
        ipc_type: args.ipc_type.clone(),
        test_suite: args.test_suite.clone(),
        verify_test_path: args.verify_test_path.clone(),
        compute_node: args.compute_node.clone(),
        ttl_instance_days: args.ttl_instance_days,
        debug: args.debug,
        reachability: common::RetryPolicy::with_timeout(args.ssh_timeout, SSH_POLL_INTERVAL),
        device_wait: common::RetryPolicy::with_timeout(args.device_timeout, DEVICE_POLL_INTERVAL),
        verify_timeout: args.verify_timeout,
    };
    let plan = pipeline::resolve(&config, &clusters)?;
    let reporting = match &args.results_path {
        Some(root) => {
            let date = chrono::Local::now().format("%Y-%m-%d").to_string();
            let sink = FsResultsSink::new(
                root,
                args.service.as_str(),
                &args.test_suite,
                &plan.cluster.name,
                &date,
            );
            sink.prepare(&build)
                .await
                .context("failed to prepare results directory")?;
            ReportingMode::Recorded(sink)
        }
        None => ReportingMode::FailFast,
    };
    let summary = if args.dry_run {
        pipeline::run_corruption_test(
            &config,
            &plan,
            cloud::DryRunProvisioner::default(),
            &remote::DryRunShell,
            &reporting,
        )
        .await?
    } else {
        let mut yc = cloud::YcConfig::new(
            plan.folder.folder_id.clone(),
            plan.cluster.zone_id.clone(),
            plan.cluster.subnet_id.clone(),
        );
        yc.profile = Some(
            args.profile_name
                .clone()
                .unwrap_or_else(|| plan.cluster.name.clone()),
        );
        yc.ssh_public_key = args.ssh_key_path.as_deref().map(public_key_path);
        let shell = remote::SshShell::new(remote::SshConfig {
            user: args.ssh_user.clone(),
            keyfile: args.ssh_key_path.clone(),
            ..Default::default()
        });
        pipeline::run_corruption_test(
            &config,
            &plan,
            cloud::YcProvisioner::new(yc),
            &shell,
            &reporting,
        )
        .await?
    };
    Ok(summary)
}

fn main() -> Result<()> {
    // handle --build-info before parsing so that it works without the required arguments
    if std::env::args().any(|arg| arg == "--build-info") {
        println!("{}", BuildInfo::current().to_json()?);
        return Ok(());
    }
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let res = common::run(output, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
