use crate::{ExecutionResult, RemoteShell, TransportError};

/// [`RemoteShell`] that only logs what it would do; every command succeeds with empty output
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunShell;

impl RemoteShell for DryRunShell {
    async fn exec(&self, host: &str, command: &str) -> Result<ExecutionResult, TransportError> {
        tracing::info!("[dry-run] {}: {}", host, command);
        Ok(ExecutionResult::default())
    }

    async fn upload(
        &self,
        host: &str,
        contents: &[u8],
        remote_path: &str,
        mode: u32,
    ) -> Result<(), TransportError> {
        tracing::info!(
            "[dry-run] upload {} bytes to {}:{} (mode {:o})",
            contents.len(),
            host,
            remote_path,
            mode
        );
        Ok(())
    }
}
