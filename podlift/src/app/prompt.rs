//! Operator prompts

use std::collections::VecDeque;
use std::sync::Mutex;

use dialoguer::{Confirm, Input};

use crate::errors::DeployError;

/// Source of operator answers
pub trait Prompter: Send + Sync + std::fmt::Debug {
    /// Ask a yes/no question; the default answer is "no"
    fn confirm(&self, question: &str) -> Result<bool, DeployError>;

    /// Ask for a line of text
    fn input(&self, question: &str) -> Result<String, DeployError>;
}

/// Interactive prompts on the controlling terminal
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&self, question: &str) -> Result<bool, DeployError> {
        let answer = Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()?;
        Ok(answer)
    }

    fn input(&self, question: &str) -> Result<String, DeployError> {
        let answer: String = Input::new()
            .with_prompt(question)
            .allow_empty(true)
            .interact_text()?;
        Ok(answer.trim().to_string())
    }
}

/// Pre-recorded answers, consumed in order
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    confirms: Mutex<VecDeque<bool>>,
    inputs: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confirms(self, answers: impl IntoIterator<Item = bool>) -> Self {
        if let Ok(mut confirms) = self.confirms.lock() {
            confirms.extend(answers);
        }
        self
    }

    pub fn with_inputs<S: Into<String>>(self, answers: impl IntoIterator<Item = S>) -> Self {
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.extend(answers.into_iter().map(Into::into));
        }
        self
    }

    /// Questions asked so far
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }

    fn record(&self, question: &str) {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(question.to_string());
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, question: &str) -> Result<bool, DeployError> {
        self.record(question);
        let next = self.confirms.lock().ok().and_then(|mut c| c.pop_front());
        // Unscripted questions are declined, like an operator pressing enter.
        Ok(next.unwrap_or(false))
    }

    fn input(&self, question: &str) -> Result<String, DeployError> {
        self.record(question);
        let next = self.inputs.lock().ok().and_then(|mut i| i.pop_front());
        Ok(next.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_prompter_answers_in_order() {
        let prompter = ScriptedPrompter::new()
            .with_confirms([true, false])
            .with_inputs(["v1.2.0"]);

        assert!(prompter.confirm("first?").unwrap());
        assert!(!prompter.confirm("second?").unwrap());
        assert!(!prompter.confirm("unscripted?").unwrap());
        assert_eq!(prompter.input("version").unwrap(), "v1.2.0");
        assert_eq!(prompter.asked().len(), 4);
    }
}
