//! Remote execution over SSH

pub mod command;
pub mod scripted;
pub mod session;
pub mod ssh;
pub mod target;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::DeployError;

pub use command::{quote, Effect, RemoteCommand, Script, Step};
pub use scripted::ScriptedExecutor;
pub use session::{CommandRecord, RemoteSession};
pub use ssh::SshExecutor;
pub use target::Target;

/// Captured result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Upload of local files into a remote directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub sources: Vec<PathBuf>,

    /// Absolute remote path
    pub destination: String,

    /// Remove remote files absent from the sources
    pub delete_extraneous: bool,

    pub excludes: Vec<String>,
}

impl Transfer {
    pub fn new(sources: Vec<PathBuf>, destination: impl Into<String>) -> Self {
        Self {
            sources,
            destination: destination.into(),
            delete_extraneous: false,
            excludes: Vec::new(),
        }
    }

    pub fn delete_extraneous(mut self, delete: bool) -> Self {
        self.delete_extraneous = delete;
        self
    }

    pub fn excludes(mut self, excludes: Vec<String>) -> Self {
        self.excludes = excludes;
        self
    }

    /// One-line description for logs and the command journal
    pub fn describe(&self) -> String {
        let sources = self
            .sources
            .iter()
            .map(|s| s.display().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let mut line = format!("rsync {} -> {}", sources, self.destination);
        if self.delete_extraneous {
            line.push_str(" --delete");
        }
        for pattern in &self.excludes {
            line.push_str(&format!(" --exclude={}", pattern));
        }
        line
    }
}

/// Transport used to reach a target.
///
/// Commands arrive fully rendered; dry-run handling lives in
/// [`RemoteSession`], not here.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command and capture its output
    async fn execute(&self, target: &Target, command: &str) -> Result<CommandOutput, DeployError>;

    /// Run a command with output forwarded to the terminal
    async fn stream(&self, target: &Target, command: &str) -> Result<bool, DeployError>;

    /// Upload files
    async fn sync(&self, target: &Target, transfer: &Transfer) -> Result<bool, DeployError>;

    /// Run a command and write its stdout to a local file
    async fn fetch(&self, target: &Target, command: &str, dest: &Path) -> Result<bool, DeployError>;
}
