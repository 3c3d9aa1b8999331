//! In-memory executor with canned responses

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::remote::session::Channel;
use crate::remote::{CommandOutput, RemoteExecutor, Target, Transfer};

#[derive(Debug)]
struct Rule {
    pattern: String,
    responses: VecDeque<CommandOutput>,
}

/// Executor that never leaves the process.
///
/// Responses are matched by substring, first registered rule wins. A rule
/// with several responses hands them out in order and then keeps repeating
/// the last one. Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    failing_syncs: Vec<String>,
    fetch_payloads: Vec<(String, Vec<u8>)>,
    calls: Mutex<Vec<(Channel, String)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern`
    pub fn respond(self, pattern: &str, output: CommandOutput) -> Self {
        self.respond_seq(pattern, vec![output])
    }

    /// Answer commands containing `pattern` with successive outputs
    pub fn respond_seq(self, pattern: &str, outputs: Vec<CommandOutput>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern: pattern.to_string(),
                responses: outputs.into(),
            });
        }
        self
    }

    /// Fail uploads whose description contains `pattern`
    pub fn fail_sync(mut self, pattern: &str) -> Self {
        self.failing_syncs.push(pattern.to_string());
        self
    }

    /// Bytes written to the local file by fetches matching `pattern`
    pub fn fetch_payload(mut self, pattern: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.fetch_payloads.push((pattern.to_string(), bytes.into()));
        self
    }

    /// Every call in order
    pub fn calls(&self) -> Vec<(Channel, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Texts of executed and streamed commands
    pub fn executed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(channel, _)| matches!(channel, Channel::Exec | Channel::Stream))
            .map(|(_, text)| text)
            .collect()
    }

    /// Index of the first call containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.calls().iter().position(|(_, text)| text.contains(pattern))
    }

    fn record(&self, channel: Channel, text: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((channel, text.to_string()));
        }
    }

    fn answer(&self, command: &str) -> CommandOutput {
        let Ok(mut rules) = self.rules.lock() else {
            return CommandOutput::ok("");
        };
        match rules.iter_mut().find(|r| command.contains(&r.pattern)) {
            Some(rule) if rule.responses.len() > 1 => rule.responses.pop_front().unwrap_or_default(),
            Some(rule) => rule.responses.front().cloned().unwrap_or_default(),
            None => CommandOutput::ok(""),
        }
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, _target: &Target, command: &str) -> Result<CommandOutput, DeployError> {
        self.record(Channel::Exec, command);
        Ok(self.answer(command))
    }

    async fn stream(&self, _target: &Target, command: &str) -> Result<bool, DeployError> {
        self.record(Channel::Stream, command);
        Ok(self.answer(command).success)
    }

    async fn sync(&self, _target: &Target, transfer: &Transfer) -> Result<bool, DeployError> {
        let text = transfer.describe();
        self.record(Channel::Sync, &text);
        Ok(!self.failing_syncs.iter().any(|p| text.contains(p)))
    }

    async fn fetch(&self, _target: &Target, command: &str, dest: &Path) -> Result<bool, DeployError> {
        self.record(Channel::Fetch, command);
        let payload = self
            .fetch_payloads
            .iter()
            .find(|(pattern, _)| command.contains(pattern))
            .map(|(_, bytes)| bytes.clone())
            .unwrap_or_default();
        tokio::fs::write(dest, payload).await?;
        Ok(self.answer(command).success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequenced_responses_repeat_last() {
        let target = Target {
            name: "t".to_string(),
            host: "h".to_string(),
            user: "u".to_string(),
            port: 22,
            identity: None,
            dir: "/d".to_string(),
        };
        let executor = ScriptedExecutor::new().respond_seq(
            "curl",
            vec![CommandOutput::failed(7, "refused"), CommandOutput::ok("ok")],
        );

        assert!(!executor.execute(&target, "curl -sf x").await.unwrap().success);
        assert!(executor.execute(&target, "curl -sf x").await.unwrap().success);
        assert!(executor.execute(&target, "curl -sf x").await.unwrap().success);
        assert!(executor.execute(&target, "ls").await.unwrap().success);
        assert_eq!(executor.position("ls"), Some(3));
    }
}
