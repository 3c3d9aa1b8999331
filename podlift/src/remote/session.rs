//! Per-run session: executor + target + execution context

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::app::context::ExecContext;
use crate::errors::DeployError;
use crate::remote::{CommandOutput, Effect, RemoteCommand, RemoteExecutor, Target, Transfer};

/// Channel a command went through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Exec,
    Stream,
    Sync,
    Fetch,

    /// Command run on the operator's machine
    Local,
}

/// One entry of the command journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRecord {
    pub channel: Channel,
    pub label: String,
    pub text: String,

    /// `false` when a dry run skipped the command
    pub executed: bool,
}

/// Remote side of one run.
///
/// In dry-run mode only queries execute; mutations and probes are recorded
/// and reported as successful. Every command lands in the journal either way.
pub struct RemoteSession {
    executor: Arc<dyn RemoteExecutor>,
    target: Target,
    ctx: ExecContext,
    journal: Vec<CommandRecord>,
}

impl RemoteSession {
    pub fn new(executor: Arc<dyn RemoteExecutor>, target: Target, ctx: ExecContext) -> Self {
        Self {
            executor,
            target,
            ctx,
            journal: Vec::new(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn ctx(&self) -> &ExecContext {
        &self.ctx
    }

    pub fn journal(&self) -> &[CommandRecord] {
        &self.journal
    }

    pub fn take_journal(&mut self) -> Vec<CommandRecord> {
        std::mem::take(&mut self.journal)
    }

    fn skip(&self, effect: Effect) -> bool {
        self.ctx.dry_run && effect != Effect::Query
    }

    fn record(&mut self, channel: Channel, label: &str, text: String, executed: bool) {
        if executed {
            debug!("[{}] {}", label, text);
        } else {
            info!("[dry-run] {}: {}", label, text);
        }
        self.journal.push(CommandRecord {
            channel,
            label: label.to_string(),
            text,
            executed,
        });
    }

    /// Journal a local command run as part of this operation
    pub fn note_local(&mut self, label: &str, text: String, executed: bool) {
        self.record(Channel::Local, label, text, executed);
    }

    /// Run with captured output. A skipped command reports success.
    pub async fn run(&mut self, command: &RemoteCommand) -> Result<CommandOutput, DeployError> {
        let text = command.render();
        let skip = self.skip(command.effect);
        self.record(Channel::Exec, &command.label, text.clone(), !skip);
        if skip {
            return Ok(CommandOutput::ok(""));
        }
        self.executor.execute(&self.target, &text).await
    }

    /// Run and turn a non-zero exit into an error built by `err`
    pub async fn run_checked<F>(&mut self, command: &RemoteCommand, err: F) -> Result<CommandOutput, DeployError>
    where
        F: FnOnce(String) -> DeployError,
    {
        let output = self.run(command).await?;
        if output.success {
            return Ok(output);
        }
        let detail = if output.stderr.trim().is_empty() {
            format!("{} exited with {:?}", command.label, output.code)
        } else {
            format!("{}: {}", command.label, output.stderr.trim())
        };
        Err(err(detail))
    }

    /// Run with live output
    pub async fn stream(&mut self, command: &RemoteCommand) -> Result<bool, DeployError> {
        let text = command.render();
        let skip = self.skip(command.effect);
        self.record(Channel::Stream, &command.label, text.clone(), !skip);
        if skip {
            return Ok(true);
        }
        self.executor.stream(&self.target, &text).await
    }

    /// Upload files; always a mutation
    pub async fn upload(&mut self, label: &str, transfer: &Transfer) -> Result<bool, DeployError> {
        let skip = self.skip(Effect::Mutate);
        self.record(Channel::Sync, label, transfer.describe(), !skip);
        if skip {
            return Ok(true);
        }
        self.executor.sync(&self.target, transfer).await
    }

    /// Capture stdout of a command into a local file
    pub async fn fetch(&mut self, command: &RemoteCommand, dest: &Path) -> Result<bool, DeployError> {
        let text = command.render();
        let skip = self.skip(command.effect);
        self.record(
            Channel::Fetch,
            &command.label,
            format!("{} > {}", text, dest.display()),
            !skip,
        );
        if skip {
            return Ok(true);
        }
        self.executor.fetch(&self.target, &text, dest).await
    }
}
