//! Bounded waits on the test instance

use common::retry::{Elapsed, RetryPolicy};

use crate::{RemoteShell, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("block device {device} did not appear on {host} after {attempts} attempt(s)")]
    DeviceMissing {
        host: String,
        device: String,
        attempts: u32,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Poll `host` with a no-op command until it answers over SSH
pub async fn wait_until_reachable<S: RemoteShell>(
    shell: &S,
    host: &str,
    policy: &RetryPolicy,
) -> Result<(), TransportError> {
    policy
        .run("ssh reachability probe", |_| async move {
            let result = shell.exec(host, "true").await?;
            if result.success() {
                Ok(())
            } else {
                Err(TransportError::Exec {
                    host: host.to_string(),
                    reason: format!("probe command exited with code {}", result.exit_code),
                })
            }
        })
        .await
        .map_err(|error| TransportError::Unreachable {
            host: host.to_string(),
            attempts: error.attempts(),
            last: error.last().to_string(),
        })
}

#[derive(Debug)]
enum DeviceProbe {
    Absent,
    Transport(TransportError),
}

impl std::fmt::Display for DeviceProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceProbe::Absent => write!(f, "device not present yet"),
            DeviceProbe::Transport(error) => write!(f, "{error}"),
        }
    }
}

impl From<Elapsed> for DeviceProbe {
    fn from(elapsed: Elapsed) -> Self {
        DeviceProbe::Transport(elapsed.into())
    }
}

/// Poll `host` until `device` shows up as a block device
///
/// Transport hiccups while polling are retried like an absent device; if the budget runs out on
/// a transport error, that error is returned instead of [`WaitError::DeviceMissing`].
pub async fn wait_for_block_device<S: RemoteShell>(
    shell: &S,
    host: &str,
    device: &str,
    policy: &RetryPolicy,
) -> Result<(), WaitError> {
    let probe = format!("test -b {}", crate::shell_escape(device));
    let result = policy
        .run("block device probe", |_| {
            let probe = probe.as_str();
            async move {
                match shell.exec(host, probe).await {
                    Ok(result) if result.success() => Ok(()),
                    Ok(_) => Err(DeviceProbe::Absent),
                    Err(error) => Err(DeviceProbe::Transport(error)),
                }
            }
        })
        .await;
    match result {
        Ok(()) => {
            tracing::debug!("Block device {} is present on {}", device, host);
            Ok(())
        }
        Err(error) => {
            let attempts = error.attempts();
            match error.into_last() {
                DeviceProbe::Transport(error) => Err(WaitError::Transport(error)),
                DeviceProbe::Absent => Err(WaitError::DeviceMissing {
                    host: host.to_string(),
                    device: device.to_string(),
                    attempts,
                }),
            }
        }
    }
}
