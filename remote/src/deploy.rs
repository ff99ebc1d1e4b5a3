//! Staging of the verification tool on the test instance
//!
//! The tool binary is read locally and written to the instance through [`RemoteShell::upload`],
//! which installs it atomically and verifies its SHA-256 checksum on the remote side.

use sha2::Digest;

use crate::{RemoteShell, TransportError};

/// Permission bits of the staged tool
pub const TOOL_MODE: u32 = 0o755;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("failed to read local tool binary {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Copy the local tool at `local_path` to `remote_path` on `host` and make it executable
pub async fn stage_tool<S: RemoteShell>(
    shell: &S,
    host: &str,
    local_path: &std::path::Path,
    remote_path: &str,
) -> Result<(), DeployError> {
    let binary = tokio::fs::read(local_path)
        .await
        .map_err(|source| DeployError::Read {
            path: local_path.display().to_string(),
            source,
        })?;
    tracing::info!(
        "Read tool binary ({} bytes) from {}, SHA-256 {}",
        binary.len(),
        local_path.display(),
        hex::encode(compute_sha256(&binary))
    );
    shell.upload(host, &binary, remote_path, TOOL_MODE).await?;
    tracing::info!("Tool staged at {}:{}", host, remote_path);
    Ok(())
}

/// Compute SHA-256 hash of data
pub fn compute_sha256(data: &[u8]) -> Vec<u8> {
    sha2::Sha256::digest(data).to_vec()
}

/// Compare `sha256sum` output ("checksum  filename") against the expected digest
pub fn check_sha256sum_output(stdout: &str, expected_checksum: &[u8]) -> anyhow::Result<()> {
    let remote_checksum = stdout
        .split_whitespace()
        .next()
        .ok_or_else(|| anyhow::anyhow!("unexpected sha256sum output format: {stdout:?}"))?;
    let expected_hex = hex::encode(expected_checksum);
    if remote_checksum != expected_hex {
        anyhow::bail!(
            "checksum mismatch after transfer\n\
            \n\
            Expected: {}\n\
            Got:      {}",
            expected_hex,
            remote_checksum
        );
    }
    Ok(())
}
