//! In-memory cloud, shell and results sink sharing one event journal
//!
//! Every provisioner call and remote command is appended to the journal, so tests can assert on
//! the exact interleaving of resource lifetimes and remote commands.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cloud::{
    Disk, DiskSpec, Filesystem, FilesystemSpec, Instance, InstanceSpec, ProvisioningError,
    Provisioner,
};
use common::RetryPolicy;
use corruption::cluster::{ClusterTestConfig, FolderDesc};
use corruption::pipeline::{PipelineConfig, RunPlan};
use corruption::{Error, ResultsSink, Service, TestCase, TestReport};
use remote::{ExecutionResult, RemoteShell, TransportError};

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }

    /// Index of the first event starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|event| event.starts_with(prefix))
    }
}

pub struct FakeProvisioner {
    journal: Journal,
    next_id: AtomicU32,
}

impl FakeProvisioner {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            next_id: AtomicU32::new(1),
        }
    }

    fn id(&self, kind: &str) -> String {
        format!("{}-{}", kind, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Provisioner for FakeProvisioner {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance, ProvisioningError> {
        let id = self.id("i");
        self.journal
            .push(format!("create_instance {} {}", id, spec.image_name));
        Ok(Instance {
            id,
            ip: "10.0.0.5".to_string(),
            compute_node: "node-1".to_string(),
        })
    }

    async fn delete_instance(&self, instance: &Instance) -> Result<(), ProvisioningError> {
        self.journal.push(format!("delete_instance {}", instance.id));
        Ok(())
    }

    async fn create_disk(&self, spec: &DiskSpec) -> Result<Disk, ProvisioningError> {
        let id = self.id("d");
        self.journal
            .push(format!("create_disk {} {} {}", id, spec.type_id, spec.size_gib));
        Ok(Disk {
            id,
            size_gib: spec.size_gib,
            type_id: spec.type_id.clone(),
        })
    }

    async fn delete_disk(&self, disk: &Disk) -> Result<(), ProvisioningError> {
        self.journal.push(format!("delete_disk {}", disk.id));
        Ok(())
    }

    async fn attach_disk(&self, _: &Instance, disk: &Disk) -> Result<(), ProvisioningError> {
        self.journal.push(format!("attach_disk {}", disk.id));
        Ok(())
    }

    async fn detach_disk(&self, _: &Instance, disk: &Disk) -> Result<(), ProvisioningError> {
        self.journal.push(format!("detach_disk {}", disk.id));
        Ok(())
    }

    async fn create_fs(&self, spec: &FilesystemSpec) -> Result<Filesystem, ProvisioningError> {
        let id = self.id("f");
        self.journal
            .push(format!("create_fs {} {} {}", id, spec.type_id, spec.size_gib));
        Ok(Filesystem {
            id,
            size_gib: spec.size_gib,
            type_id: spec.type_id.clone(),
        })
    }

    async fn delete_fs(&self, fs: &Filesystem) -> Result<(), ProvisioningError> {
        self.journal.push(format!("delete_fs {}", fs.id));
        Ok(())
    }

    async fn attach_fs(
        &self,
        _: &Instance,
        fs: &Filesystem,
        device_name: &str,
    ) -> Result<(), ProvisioningError> {
        self.journal
            .push(format!("attach_fs {} {}", fs.id, device_name));
        Ok(())
    }

    async fn detach_fs(&self, _: &Instance, fs: &Filesystem) -> Result<(), ProvisioningError> {
        self.journal.push(format!("detach_fs {}", fs.id));
        Ok(())
    }

    async fn delete_tmp_instances(&self, ttl_days: u32) -> Result<usize, ProvisioningError> {
        self.journal.push(format!("delete_tmp_instances {ttl_days}"));
        Ok(0)
    }

    async fn turn_off_auto_deletion(&self) -> Result<(), ProvisioningError> {
        self.journal.push("turn_off_auto_deletion".to_string());
        Ok(())
    }
}

/// Remote shell with scripted verify-test and mount outcomes; everything else succeeds
pub struct FakeShell {
    journal: Journal,
    reachable: bool,
    verify_hangs: bool,
    mount_exit_code: i32,
    verify_outcomes: Mutex<VecDeque<(i32, &'static str)>>,
}

impl FakeShell {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            reachable: true,
            verify_hangs: false,
            mount_exit_code: 0,
            verify_outcomes: Mutex::new(VecDeque::new()),
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// verify-test runs never return
    pub fn verify_hangs(mut self) -> Self {
        self.verify_hangs = true;
        self
    }

    pub fn mount_exit_code(mut self, exit_code: i32) -> Self {
        self.mount_exit_code = exit_code;
        self
    }

    /// Exit codes and output of consecutive verify-test runs; runs past the list pass
    pub fn verify_outcomes(self, outcomes: &[(i32, &'static str)]) -> Self {
        self.verify_outcomes
            .lock()
            .unwrap()
            .extend(outcomes.iter().copied());
        self
    }
}

impl RemoteShell for FakeShell {
    async fn exec(&self, host: &str, command: &str) -> Result<ExecutionResult, TransportError> {
        self.journal.push(format!("exec {command}"));
        if !self.reachable {
            return Err(TransportError::Connect {
                host: host.to_string(),
                reason: "Connection timed out".to_string(),
            });
        }
        let (exit_code, stdout) = if command.starts_with("/usr/bin/verify-test ") {
            if self.verify_hangs {
                std::future::pending::<()>().await;
            }
            self.verify_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((0, "verification passed\n"))
        } else if command.contains("mount -t virtiofs") {
            (self.mount_exit_code, "")
        } else {
            (0, "")
        };
        Ok(ExecutionResult {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    async fn upload(
        &self,
        _host: &str,
        contents: &[u8],
        remote_path: &str,
        mode: u32,
    ) -> Result<(), TransportError> {
        self.journal.push(format!(
            "upload {} {} bytes mode {:o}",
            remote_path,
            contents.len(),
            mode
        ));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<TestReport>>,
}

impl MemorySink {
    pub fn reports(&self) -> Vec<TestReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl ResultsSink for MemorySink {
    async fn publish(&self, report: &TestReport) -> Result<(), Error> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        multiplier: 1,
        timeout: Duration::from_secs(5),
    }
}

/// Local stand-in for the verify-test binary
pub fn tool_binary(dir: &Path) -> PathBuf {
    let path = dir.join("verify-test");
    std::fs::write(&path, b"#!/bin/sh\nexit 0\n").unwrap();
    path
}

pub fn pipeline_config(service: Service, debug: bool, tool: &Path) -> PipelineConfig {
    PipelineConfig {
        cluster: "preprod".to_string(),
        zone_id: "ru-central1-b".to_string(),
        service,
        ipc_type: "grpc".to_string(),
        test_suite: "custom".to_string(),
        verify_test_path: tool.to_path_buf(),
        compute_node: None,
        ttl_instance_days: 7,
        debug,
        reachability: fast_policy(),
        device_wait: fast_policy(),
        verify_timeout: Duration::from_secs(5),
    }
}

pub fn test_case(name: &str, size: u64, storage_type: &str) -> TestCase {
    TestCase {
        name: name.to_string(),
        size,
        storage_type: storage_type.to_string(),
        verify_test_cmd_args: "--blocksize 4096 --iodepth 64".to_string(),
    }
}

pub fn plan(test_cases: Vec<TestCase>) -> RunPlan {
    let folder = FolderDesc {
        folder_id: "folder-grpc".to_string(),
        image_name: "ubuntu2004".to_string(),
    };
    RunPlan {
        cluster: ClusterTestConfig {
            name: "preprod".to_string(),
            zone_id: "ru-central1-b".to_string(),
            subnet_id: "subnet-b".to_string(),
            folders: [("grpc".to_string(), folder.clone())].into_iter().collect(),
            disk_types: [(
                "network-ssd-nonreplicated".to_string(),
                "network-ssd-nonreplicated-v2".to_string(),
            )]
            .into_iter()
            .collect(),
            excluded_storage_types: vec![],
        },
        folder,
        image_name: "ubuntu2004".to_string(),
        test_cases,
    }
}
