//! Record of one protocol run

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::deploy::fsm::{Outcome, Stage};
use crate::errors::DeployError;
use crate::remote::CommandRecord;
use crate::utils::generate_run_id;

/// Stages, commands and outcome of one mutation run
#[derive(Debug, Serialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub operation: String,
    pub environment: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Stages entered, in order
    pub stages: Vec<Stage>,
    pub outcome: Option<Outcome>,

    /// Every command issued, including the ones a dry run skipped
    pub commands: Vec<CommandRecord>,

    /// Service log lines captured before a rollback
    pub diagnostics: Option<String>,

    #[serde(skip)]
    pub error: Option<DeployError>,
}

impl PipelineRun {
    pub fn new(operation: &str, environment: &str, dry_run: bool) -> Self {
        Self {
            run_id: generate_run_id(),
            operation: operation.to_string(),
            environment: environment.to_string(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            stages: vec![Stage::Idle],
            outcome: None,
            commands: Vec::new(),
            diagnostics: None,
            error: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Idle)
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == Some(Outcome::Succeeded)
    }

    /// Process exit status for this run
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            Some(Outcome::Succeeded) => 0,
            Some(Outcome::RolledBack) => 2,
            Some(Outcome::Fatal) => 3,
            Some(Outcome::Aborted) | None => 1,
        }
    }

    /// One colored line for the operator
    pub fn summary(&self) -> String {
        let head = format!("{} {} ({})", self.operation, self.environment, self.run_id);
        let prefix = if self.dry_run { "[dry-run] " } else { "" };
        match self.outcome {
            Some(Outcome::Succeeded) => format!("{}{} succeeded", prefix, head).green().to_string(),
            Some(Outcome::RolledBack) => format!(
                "{}{} failed and was rolled back: {}",
                prefix,
                head,
                self.error_text()
            )
            .yellow()
            .to_string(),
            Some(Outcome::Fatal) => format!("{}{} FAILED: {}", prefix, head, self.error_text())
                .red()
                .bold()
                .to_string(),
            Some(Outcome::Aborted) | None => {
                format!("{}{} aborted: {}", prefix, head, self.error_text()).red().to_string()
            }
        }
    }

    fn error_text(&self) -> String {
        self.error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string())
    }

    /// Turn the run into a result for the caller
    pub fn into_result(self) -> Result<(), DeployError> {
        match (self.outcome, self.error) {
            (Some(Outcome::Succeeded), _) => Ok(()),
            (_, Some(err)) => Err(err),
            (outcome, None) => Err(DeployError::Internal(format!(
                "run ended without error in state {:?}",
                outcome
            ))),
        }
    }
}
