//! `ssh`/`rsync` backed executor

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::remote::{CommandOutput, RemoteExecutor, Target, Transfer};

/// Executor that shells out to the local OpenSSH client and rsync.
///
/// Every connection to the same `user@host` goes through one control socket,
/// so only the first command of a run pays for the handshake.
#[derive(Debug, Clone, Default)]
pub struct SshExecutor;

impl SshExecutor {
    pub fn new() -> Self {
        Self
    }

    fn ssh(target: &Target, command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(target.ssh_args()).arg(command);
        cmd
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, target: &Target, command: &str) -> Result<CommandOutput, DeployError> {
        debug!("ssh {}: {}", target.destination(), command);
        let output = Self::ssh(target, command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DeployError::RemoteError(format!("Failed to run ssh: {}", e)))?;

        let result = CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        if !result.success {
            debug!("ssh exited with {:?}: {}", result.code, result.stderr.trim());
        }
        Ok(result)
    }

    async fn stream(&self, target: &Target, command: &str) -> Result<bool, DeployError> {
        debug!("ssh (stream) {}: {}", target.destination(), command);
        let status = Self::ssh(target, command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| DeployError::RemoteError(format!("Failed to run ssh: {}", e)))?;
        Ok(status.success())
    }

    async fn sync(&self, target: &Target, transfer: &Transfer) -> Result<bool, DeployError> {
        let mut cmd = Command::new("rsync");
        cmd.arg("-avz").arg("-e").arg(target.rsync_shell());
        if transfer.delete_extraneous {
            cmd.arg("--delete");
        }
        for pattern in &transfer.excludes {
            cmd.arg(format!("--exclude={}", pattern));
        }
        cmd.args(&transfer.sources)
            .arg(target.remote_spec(&transfer.destination));

        debug!("{}", transfer.describe());
        let output = cmd
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DeployError::TransferError(format!("Failed to run rsync: {}", e)))?;

        if !output.status.success() {
            warn!(
                "rsync exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.status.success())
    }

    async fn fetch(&self, target: &Target, command: &str, dest: &Path) -> Result<bool, DeployError> {
        debug!("ssh (fetch to {}) {}: {}", dest.display(), target.destination(), command);
        let file = std::fs::File::create(dest)?;
        let status = Self::ssh(target, command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| DeployError::RemoteError(format!("Failed to run ssh: {}", e)))?;
        Ok(status.success())
    }
}
