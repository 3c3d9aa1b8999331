//! Execution context threaded through every component

use std::sync::Arc;

use tracing::info;

use crate::app::prompt::{Prompter, TerminalPrompter};
use crate::errors::DeployError;

/// Run-wide switches that used to be process globals
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Record mutating commands instead of running them
    pub dry_run: bool,

    /// Forward remote output and log every command
    pub verbose: bool,

    /// Answer "yes" to every confirmation
    pub assume_yes: bool,

    prompter: Arc<dyn Prompter>,
}

impl ExecContext {
    pub fn new(dry_run: bool, verbose: bool, assume_yes: bool) -> Self {
        Self {
            dry_run,
            verbose,
            assume_yes,
            prompter: Arc::new(TerminalPrompter),
        }
    }

    /// Replace the prompt source
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    /// Ask the operator to confirm; dry runs and `--yes` auto-confirm
    pub fn confirm(&self, question: &str) -> Result<bool, DeployError> {
        if self.dry_run || self.assume_yes {
            info!("{} [auto-confirmed]", question);
            return Ok(true);
        }
        self.prompter.confirm(question)
    }

    /// Ask the operator for a value
    pub fn input(&self, question: &str) -> Result<String, DeployError> {
        self.prompter.input(question)
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new(false, false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::prompt::ScriptedPrompter;

    #[test]
    fn test_dry_run_auto_confirms() {
        let prompter = Arc::new(ScriptedPrompter::new().with_confirms([false]));
        let ctx = ExecContext::new(true, false, false).with_prompter(prompter.clone());
        assert!(ctx.confirm("overwrite?").unwrap());
        assert!(prompter.asked().is_empty());
    }

    #[test]
    fn test_real_run_asks_operator() {
        let prompter = Arc::new(ScriptedPrompter::new().with_confirms([false]));
        let ctx = ExecContext::default().with_prompter(prompter.clone());
        assert!(!ctx.confirm("overwrite?").unwrap());
        assert_eq!(prompter.asked(), vec!["overwrite?".to_string()]);
    }
}
