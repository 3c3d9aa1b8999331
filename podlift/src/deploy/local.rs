//! Commands on the operator's machine

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeployError;
use crate::remote::CommandOutput;

/// A local process invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,

    /// Forward output to the terminal instead of capturing it
    pub interactive: bool,
}

impl LocalCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Printable form for logs and the command journal
    pub fn display(&self) -> String {
        let mut parts: Vec<String> = self
            .envs
            .iter()
            .map(|(k, v)| format!("{}={}", k, crate::remote::quote(v)))
            .collect();
        parts.push(self.program.clone());
        parts.extend(self.args.iter().map(|a| crate::remote::quote(a)));
        parts.join(" ")
    }
}

/// Runs local processes
#[async_trait]
pub trait LocalRunner: Send + Sync {
    async fn run(&self, command: &LocalCommand) -> Result<CommandOutput, DeployError>;

    /// Whether an executable is available
    fn has_tool(&self, name: &str) -> bool;
}

/// Runner backed by real processes
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl LocalRunner for SystemRunner {
    async fn run(&self, command: &LocalCommand) -> Result<CommandOutput, DeployError> {
        debug!("[local] {}", command.display());
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        for (key, value) in &command.envs {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }

        if command.interactive {
            let status = cmd
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .await
                .map_err(|e| {
                    DeployError::Precondition(format!("Failed to run {}: {}", command.program, e))
                })?;
            return Ok(CommandOutput {
                success: status.success(),
                code: status.code(),
                ..Default::default()
            });
        }

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DeployError::Precondition(format!("Failed to run {}: {}", command.program, e)))?;
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn has_tool(&self, name: &str) -> bool {
        let Some(path) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path).any(|dir| dir.join(name).is_file())
    }
}

/// Runner with canned responses, for tests and rehearsals.
///
/// Matching works like [`crate::remote::ScriptedExecutor`]: substring of the
/// displayed command, first rule wins, unmatched commands succeed.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
    missing_tools: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, pattern: &str, output: CommandOutput) -> Self {
        self.respond_seq(pattern, vec![output])
    }

    pub fn respond_seq(self, pattern: &str, outputs: Vec<CommandOutput>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push((pattern.to_string(), outputs.into()));
        }
        self
    }

    pub fn without_tool(mut self, name: &str) -> Self {
        self.missing_tools.push(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LocalRunner for ScriptedRunner {
    async fn run(&self, command: &LocalCommand) -> Result<CommandOutput, DeployError> {
        let text = command.display();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.clone());
        }
        let Ok(mut rules) = self.rules.lock() else {
            return Ok(CommandOutput::ok(""));
        };
        let output = match rules.iter_mut().find(|(p, _)| text.contains(p.as_str())) {
            Some((_, responses)) if responses.len() > 1 => responses.pop_front().unwrap_or_default(),
            Some((_, responses)) => responses.front().cloned().unwrap_or_default(),
            None => CommandOutput::ok(""),
        };
        Ok(output)
    }

    fn has_tool(&self, name: &str) -> bool {
        !self.missing_tools.iter().any(|t| t == name)
    }
}

/// Fail with a precondition error naming every missing tool
pub fn require_tools(runner: &dyn LocalRunner, tools: &[&str]) -> Result<(), DeployError> {
    let missing: Vec<&str> = tools.iter().copied().filter(|t| !runner.has_tool(t)).collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(DeployError::Precondition(format!(
        "Required local tools missing: {}",
        missing.join(", ")
    )))
}
