//! Orchestration of one corruption test run
//!
//! The instance scope wraps the whole run. Inside it every test case opens its own storage scope
//! (disk or filesystem) with the attachment nested in it, so a case's storage is always detached
//! before the next case provisions its own, and deleted unless the run preserves it.

use std::path::PathBuf;
use std::time::Duration;

use cloud::{
    Cloud, Disk, DiskSpec, Filesystem, FilesystemSpec, Instance, InstanceSpec, Provisioner,
};
use common::RetryPolicy;
use remote::RemoteShell;
use remote::wait::{self, WaitError};

use crate::cluster::{ClusterConfigFile, ClusterTestConfig, FolderDesc};
use crate::error::{ConfigError, Error};
use crate::report::{ReportingMode, ResultsSink, TestReport};
use crate::runner::{self, Target};
use crate::test_cases::{TestCase, generate_test_cases};
use crate::{
    BLOCK_DEVICE_PATH, FS_DEVICE_NAME, FS_MOUNT_PATH, Service, TEST_INSTANCE_CORES,
    TEST_INSTANCE_MEMORY_GIB, VERIFY_TEST_REMOTE_PATH,
};

/// Settings of a run, as given on the command line
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub cluster: String,
    pub zone_id: String,
    pub service: Service,
    pub ipc_type: String,
    pub test_suite: String,
    /// Local verify-test binary staged on the instance
    pub verify_test_path: PathBuf,
    pub compute_node: Option<String>,
    pub ttl_instance_days: u32,
    /// Keep every resource of a failed run for inspection
    pub debug: bool,
    /// Wait for the instance to accept SSH connections
    pub reachability: RetryPolicy,
    /// Wait for an attached disk to show up as a block device
    pub device_wait: RetryPolicy,
    /// Longest a single verify-test run may take
    pub verify_timeout: Duration,
}

/// Everything resolved from configuration before any resource is created
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub cluster: ClusterTestConfig,
    pub folder: FolderDesc,
    pub image_name: String,
    pub test_cases: Vec<TestCase>,
}

/// Storage a test case runs against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    /// Disk attached to the instance and exposed as a block device
    Block { device_path: String },
    /// Filesystem attached over virtiofs and mounted on the instance
    Filesystem { mount_path: String },
}

impl StorageTarget {
    pub fn for_service(service: Service) -> Self {
        match service {
            Service::Nbs => StorageTarget::Block {
                device_path: BLOCK_DEVICE_PATH.to_string(),
            },
            Service::Nfs => StorageTarget::Filesystem {
                mount_path: FS_MOUNT_PATH.to_string(),
            },
        }
    }

    /// Path verify-test is pointed at
    pub fn test_path(&self) -> String {
        match self {
            StorageTarget::Block { device_path } => device_path.clone(),
            StorageTarget::Filesystem { mount_path } => format!("{mount_path}/test.txt"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: usize,
    pub passed: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, report: &TestReport) {
        self.executed += 1;
        if report.passed() {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "test cases executed: {}", self.executed)?;
        writeln!(f, "test cases passed: {}", self.passed)?;
        write!(f, "test cases failed: {}", self.failed)
    }
}

/// Resolve cluster, folder, image and the test-case matrix of a run
pub fn resolve(
    config: &PipelineConfig,
    clusters: &ClusterConfigFile,
) -> Result<RunPlan, ConfigError> {
    let cluster = clusters.get_cluster_test_config(&config.cluster, &config.zone_id)?;
    tracing::info!("Running corruption test suite at cluster <{}>", cluster.name);
    let test_cases = generate_test_cases(&config.test_suite, &cluster, config.service)?;
    tracing::info!(
        "Generated {} test cases for test suite <{}>",
        test_cases.len(),
        config.test_suite
    );
    let folder = cluster.ipc_type_to_folder_desc(&config.ipc_type)?.clone();
    let mut image_name = folder.image_name.clone();
    // the old image has no virtiofs support
    if config.service == Service::Nfs && image_name == "ubuntu1604-stable" {
        image_name = "ubuntu2004".to_string();
    }
    Ok(RunPlan {
        cluster,
        folder,
        image_name,
        test_cases,
    })
}

struct Run<'a, P, Sh, S> {
    config: &'a PipelineConfig,
    plan: &'a RunPlan,
    cloud: &'a Cloud<P>,
    shell: &'a Sh,
    reporting: &'a ReportingMode<S>,
}

impl<P, Sh, S> Run<'_, P, Sh, S>
where
    P: Provisioner,
    Sh: RemoteShell,
    S: ResultsSink,
{
    async fn on_instance(&self, instance: &Instance) -> Result<RunSummary, Error> {
        tracing::info!("Compute node: {}", instance.compute_node);
        tracing::info!(
            "Waiting until instance <id={}> becomes available via ssh",
            instance.id
        );
        if let Err(error) =
            wait::wait_until_reachable(self.shell, &instance.ip, &self.config.reachability).await
        {
            self.cloud.preserve_for_inspection().await;
            return Err(Error::Unreachable(error));
        }
        tracing::info!("Copying verify-test to instance <id={}>", instance.id);
        remote::deploy::stage_tool(
            self.shell,
            &instance.ip,
            &self.config.verify_test_path,
            VERIFY_TEST_REMOTE_PATH,
        )
        .await?;
        let target = StorageTarget::for_service(self.config.service);
        let mut summary = RunSummary::default();
        for test_case in &self.plan.test_cases {
            tracing::info!("Executing test case <{}>", test_case.name);
            let report = match &target {
                StorageTarget::Block { device_path } => {
                    self.block_case(instance, test_case, device_path).await?
                }
                StorageTarget::Filesystem { mount_path } => {
                    self.fs_case(instance, test_case, mount_path, &target.test_path())
                        .await?
                }
            };
            summary.record(&report);
        }
        Ok(summary)
    }

    async fn block_case(
        &self,
        instance: &Instance,
        test_case: &TestCase,
        device_path: &str,
    ) -> Result<TestReport, Error> {
        let disk_type = self.plan.cluster.translate_disk_type(&test_case.storage_type);
        let spec = DiskSpec {
            size_gib: test_case.size,
            type_id: disk_type.clone(),
            description: format!("Corruption test: {}", test_case.name),
        };
        let target = Target {
            instance,
            storage_type: &disk_type,
            path: device_path,
        };
        self.cloud
            .with_disk(&spec, async |disk: &Disk| {
                self.cloud
                    .with_attached_disk(instance, disk, async || {
                        tracing::info!(
                            "Waiting until secondary disk appears as a block device at instance <id={}>",
                            instance.id
                        );
                        wait::wait_for_block_device(
                            self.shell,
                            &instance.ip,
                            device_path,
                            &self.config.device_wait,
                        )
                        .await
                        .map_err(|error| match error {
                            WaitError::Transport(error) => Error::Transport(error),
                            WaitError::DeviceMissing { attempts, .. } => Error::DeviceNotFound {
                                instance_id: instance.id.clone(),
                                device: device_path.to_string(),
                                attempts,
                            },
                        })?;
                        runner::run_test_case(
                            self.shell,
                            self.cloud,
                            self.reporting,
                            test_case,
                            &target,
                            self.config.verify_timeout,
                        )
                        .await
                    })
                    .await
            })
            .await
    }

    async fn fs_case(
        &self,
        instance: &Instance,
        test_case: &TestCase,
        mount_path: &str,
        test_file: &str,
    ) -> Result<TestReport, Error> {
        let spec = FilesystemSpec {
            size_gib: test_case.size,
            type_id: test_case.storage_type.clone(),
            description: format!("Corruption test: {}", test_case.name),
        };
        let target = Target {
            instance,
            storage_type: &test_case.storage_type,
            path: test_file,
        };
        self.cloud
            .with_fs(&spec, async |fs: &Filesystem| {
                self.cloud
                    .with_attached_fs(instance, fs, FS_DEVICE_NAME, async || {
                        self.mount_fs(instance, mount_path, test_file).await?;
                        let result = runner::run_test_case(
                            self.shell,
                            self.cloud,
                            self.reporting,
                            test_case,
                            &target,
                            self.config.verify_timeout,
                        )
                        .await;
                        // a preserved mount of a terminal failure stays in place
                        if result.is_ok() || self.cloud.auto_deletion_enabled() {
                            self.unmount_fs(instance, mount_path).await;
                        }
                        result
                    })
                    .await
            })
            .await
    }

    async fn mount_fs(
        &self,
        instance: &Instance,
        mount_path: &str,
        test_file: &str,
    ) -> Result<(), Error> {
        tracing::info!("Mounting fs");
        let mount_path = remote::shell_escape(mount_path);
        let command = format!(
            "mkdir -p {mount_path} && mount -t virtiofs {FS_DEVICE_NAME} {mount_path} && touch {}",
            remote::shell_escape(test_file)
        );
        let result = self.shell.exec(&instance.ip, &command).await?;
        if !result.success() {
            tracing::error!("Failed to mount fs\n{}", result.combined_output());
            self.cloud.preserve_for_inspection().await;
            return Err(Error::Mount {
                exit_code: result.exit_code,
            });
        }
        Ok(())
    }

    async fn unmount_fs(&self, instance: &Instance, mount_path: &str) {
        let command = format!("umount {}", remote::shell_escape(mount_path));
        match self.shell.exec(&instance.ip, &command).await {
            Ok(result) if result.success() => {}
            Ok(result) => tracing::warn!(
                "Failed to unmount {} with exit code {}: {}",
                mount_path,
                result.exit_code,
                result.combined_output().trim()
            ),
            Err(error) => tracing::warn!("Failed to unmount {}: {:#}", mount_path, error),
        }
    }
}

/// Run the whole test-case matrix of `plan` on one freshly provisioned instance
///
/// Returns once every test case ran, or with the first terminal error. All resources are
/// released on return, unless the run is in debug mode and failed.
pub async fn run_corruption_test<P, Sh, S>(
    config: &PipelineConfig,
    plan: &RunPlan,
    provisioner: P,
    shell: &Sh,
    reporting: &ReportingMode<S>,
) -> Result<RunSummary, Error>
where
    P: Provisioner,
    Sh: RemoteShell,
    S: ResultsSink,
{
    let cloud = Cloud::new(provisioner).preserve_on_failure(config.debug);
    let run = Run {
        config,
        plan,
        cloud: &cloud,
        shell,
        reporting,
    };
    cloud.delete_tmp_instances(config.ttl_instance_days).await;
    let spec = InstanceSpec {
        cores: TEST_INSTANCE_CORES,
        memory_gib: TEST_INSTANCE_MEMORY_GIB,
        compute_node: config.compute_node.clone(),
        image_name: plan.image_name.clone(),
        description: "Corruption test".to_string(),
    };
    let summary = cloud
        .with_instance(&spec, async |instance: &Instance| run.on_instance(instance).await)
        .await?;
    tracing::info!(
        "Corruption test suite <{}> finished: {} passed, {} failed",
        config.test_suite,
        summary.passed,
        summary.failed
    );
    Ok(summary)
}
