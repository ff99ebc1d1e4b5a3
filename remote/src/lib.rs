//! Remote command execution for the corruption test tools
//!
//! The pipeline talks to the test instance exclusively through the [`RemoteShell`] trait: run one
//! command and collect its exit code and output, or place a file on the instance. A non-zero exit
//! code is data, not an error; only a broken transport is reported as [`TransportError`].

use std::time::Duration;

pub mod deploy;
pub mod dry_run;
pub mod ssh;
pub mod wait;

pub use dry_run::DryRunShell;
pub use ssh::SshShell;

/// Outcome of one remote command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionResult {
    /// Exit code of the remote command, -1 if it was terminated by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        if self.stdout.is_empty() {
            return self.stderr.clone();
        }
        format!("{}{}", self.stdout, self.stderr)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to establish SSH connection to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("failed to run remote command on {host}: {reason}")]
    Exec { host: String, reason: String },

    #[error("failed to transfer {path} to {host}: {reason}")]
    Transfer {
        host: String,
        path: String,
        reason: String,
    },

    #[error("{host} is not reachable via ssh after {attempts} attempt(s): {last}")]
    Unreachable {
        host: String,
        attempts: u32,
        last: String,
    },

    #[error("remote command on {host} did not finish within {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    #[error(transparent)]
    Deadline(#[from] common::retry::Elapsed),
}

/// SSH connection settings shared by every session opened to the test instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    pub user: Option<String>,
    pub port: Option<u16>,
    /// Private key used for authentication
    pub keyfile: Option<std::path::PathBuf>,
    pub connect_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            port: None,
            keyfile: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Capability to run commands on, and copy files to, a remote host
#[allow(async_fn_in_trait)]
pub trait RemoteShell {
    /// Run `command` through `sh -c` on `host`
    async fn exec(&self, host: &str, command: &str) -> Result<ExecutionResult, TransportError>;

    /// Write `contents` to `remote_path` on `host` and set its permission bits to `mode`
    async fn upload(
        &self,
        host: &str,
        contents: &[u8],
        remote_path: &str,
        mode: u32,
    ) -> Result<(), TransportError>;
}

/// Quote a string for safe use as a single POSIX shell word
pub fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}
