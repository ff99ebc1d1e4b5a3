//! OpenSSH-backed [`RemoteShell`]
//!
//! Every call opens its own multiplexed session and closes it before returning, so a dropped
//! connection only affects the command that was running on it.

use anyhow::Context;

use crate::{ExecutionResult, RemoteShell, SshConfig, TransportError};

#[derive(Debug, Clone)]
pub struct SshShell {
    config: SshConfig,
}

impl SshShell {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    async fn connect(&self, host: &str) -> Result<openssh::Session, TransportError> {
        let mut builder = openssh::SessionBuilder::default();
        builder
            .known_hosts_check(openssh::KnownHosts::Accept)
            .connect_timeout(self.config.connect_timeout);
        if let Some(user) = &self.config.user {
            builder.user(user.clone());
        }
        if let Some(port) = self.config.port {
            builder.port(port);
        }
        if let Some(keyfile) = &self.config.keyfile {
            builder.keyfile(keyfile);
        }
        tracing::debug!("Connecting to SSH destination: {}", host);
        builder
            .connect(host)
            .await
            .map_err(|error| TransportError::Connect {
                host: host.to_string(),
                reason: format!("{error:#}"),
            })
    }
}

async fn close(session: openssh::Session, host: &str) {
    if let Err(error) = session.close().await {
        tracing::debug!("Failed to close SSH session to {}: {:#}", host, error);
    }
}

impl RemoteShell for SshShell {
    async fn exec(&self, host: &str, command: &str) -> Result<ExecutionResult, TransportError> {
        let session = self.connect(host).await?;
        tracing::debug!("Running on {}: {}", host, command);
        let output = session
            .command("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await;
        close(session, host).await;
        let output = output.map_err(|error| TransportError::Exec {
            host: host.to_string(),
            reason: format!("{error:#}"),
        })?;
        Ok(ExecutionResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn upload(
        &self,
        host: &str,
        contents: &[u8],
        remote_path: &str,
        mode: u32,
    ) -> Result<(), TransportError> {
        let session = self.connect(host).await?;
        let result = async {
            transfer_base64(&session, contents, remote_path, mode).await?;
            verify_remote_checksum(&session, remote_path, &crate::deploy::compute_sha256(contents))
                .await
        }
        .await;
        close(session, host).await;
        result.map_err(|error| TransportError::Transfer {
            host: host.to_string(),
            path: remote_path.to_string(),
            reason: format!("{error:#}"),
        })
    }
}

/// Transfer file contents using base64 encoding through SSH stdin
///
/// The data lands in a temporary file next to `remote_path` and is moved into place only after
/// the permission bits are set, so a half-written file is never visible under the final name.
async fn transfer_base64(
    session: &openssh::Session,
    contents: &[u8],
    remote_path: &str,
    mode: u32,
) -> anyhow::Result<()> {
    use base64::Engine;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let encoded = base64::engine::general_purpose::STANDARD.encode(contents);
    let path = std::path::Path::new(remote_path);
    let dir = path
        .parent()
        .context("remote path must have a parent directory")?
        .to_str()
        .context("remote path parent must be valid UTF-8")?;
    let filename = path
        .file_name()
        .context("remote path must have a filename")?
        .to_str()
        .context("remote filename must be valid UTF-8")?;
    // $$ (remote shell PID) keeps concurrent transfers apart
    let temp_path = format!("{}/.{}.tmp.$$", dir, filename);
    let temp_path_escaped = format!("\"{}\"", temp_path);
    let cmd = format!(
        "mkdir -p {dir} && base64 -d > {tmp} && chmod {mode:o} {tmp} && mv -f {tmp} {dst}",
        dir = crate::shell_escape(dir),
        tmp = temp_path_escaped,
        mode = mode,
        dst = crate::shell_escape(remote_path),
    );
    tracing::debug!("Running remote command: mkdir && base64 && chmod && mv");
    let mut child = session
        .command("sh")
        .arg("-c")
        .arg(&cmd)
        .stdin(openssh::Stdio::piped())
        .stdout(openssh::Stdio::piped())
        .stderr(openssh::Stdio::piped())
        .spawn()
        .await
        .context("failed to spawn remote command for file transfer")?;
    let mut stdin = child
        .stdin()
        .take()
        .context("failed to get stdin for remote command")?;
    let mut stdout = child
        .stdout()
        .take()
        .context("failed to get stdout for remote command")?;
    let mut stderr = child
        .stderr()
        .take()
        .context("failed to get stderr for remote command")?;
    stdin
        .write_all(encoded.as_bytes())
        .await
        .context("failed to write base64 data to remote stdin")?;
    // the remote side only finishes once it sees EOF on stdin
    stdin.shutdown().await.context("failed to shutdown stdin")?;
    drop(stdin);
    let stdout_fut = async {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf).await;
        buf
    };
    let stderr_fut = async {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    };
    let (_stdout_data, stderr_data) = tokio::join!(stdout_fut, stderr_fut);
    let status = child
        .wait()
        .await
        .context("failed to wait for remote command completion")?;
    if !status.success() {
        anyhow::bail!(
            "remote install command failed\n\
            \n\
            stderr: {}",
            String::from_utf8_lossy(&stderr_data)
        );
    }
    Ok(())
}

async fn verify_remote_checksum(
    session: &openssh::Session,
    remote_path: &str,
    expected_checksum: &[u8],
) -> anyhow::Result<()> {
    let cmd = format!("sha256sum {}", crate::shell_escape(remote_path));
    tracing::debug!("Verifying checksum of {} on remote host", remote_path);
    let output = session
        .command("sh")
        .arg("-c")
        .arg(&cmd)
        .output()
        .await
        .context("failed to run sha256sum on remote host")?;
    if !output.status.success() {
        anyhow::bail!(
            "failed to compute checksum on remote host\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    crate::deploy::check_sha256sum_output(&stdout, expected_checksum)
}
