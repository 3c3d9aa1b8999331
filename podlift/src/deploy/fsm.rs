//! Finite state machine of the mutation protocol

use serde::{Deserialize, Serialize};

/// Protocol stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Nothing started yet
    Idle,

    /// Local and remote preconditions
    Validating,

    /// Local artifacts; uploads that touch no live file
    Preparing,

    /// Backup of every resource about to change
    BackingUp,

    /// Live remote state is being changed
    Mutating,

    /// Checking the new state works
    Verifying,

    Succeeded,

    /// Restoring the backup after a failure
    RollingBack,

    /// Run finished; see the outcome
    Terminal,
}

impl Stage {
    /// Whether a failure in this stage needs a rollback
    pub fn is_destructive(&self) -> bool {
        matches!(self, Stage::Mutating | Stage::Verifying)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,

    /// Stopped before any live remote write
    Aborted,

    /// Failure after mutation, prior state restored
    RolledBack,

    /// Restore failed; manual intervention required
    Fatal,
}

/// Protocol event
#[derive(Debug, Clone)]
pub enum StageEvent {
    Start,
    Validated,
    Prepared,
    BackedUp,
    Mutated,
    Verified,
    Finish,

    /// Step failure in the current stage
    Failed(String),

    RolledBack,
    RollbackFailed(String),
}

/// Mutation protocol FSM
#[derive(Debug, Clone)]
pub struct MutationFsm {
    stage: Stage,
    history: Vec<Stage>,
    outcome: Option<Outcome>,
    error: Option<String>,
    rollback_attempted: bool,
}

impl MutationFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            stage: Stage::Idle,
            history: vec![Stage::Idle],
            outcome: None,
            error: None,
            rollback_attempted: false,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage entered so far, in order
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// First failure reported to the machine
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn rollback_attempted(&self) -> bool {
        self.rollback_attempted
    }

    /// Whether the backup stage completed
    pub fn backup_taken(&self) -> bool {
        self.history.contains(&Stage::Mutating)
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: StageEvent) -> Result<Stage, String> {
        let new_stage = match (self.stage, &event) {
            (Stage::Idle, StageEvent::Start) => Stage::Validating,
            (Stage::Validating, StageEvent::Validated) => Stage::Preparing,
            (Stage::Preparing, StageEvent::Prepared) => Stage::BackingUp,
            (Stage::BackingUp, StageEvent::BackedUp) => Stage::Mutating,
            (Stage::Mutating, StageEvent::Mutated) => Stage::Verifying,
            (Stage::Verifying, StageEvent::Verified) => Stage::Succeeded,

            (Stage::Succeeded, StageEvent::Finish) => {
                self.outcome = Some(Outcome::Succeeded);
                Stage::Terminal
            }

            // Nothing live has changed yet
            (Stage::Validating | Stage::Preparing | Stage::BackingUp, StageEvent::Failed(err)) => {
                self.record_error(err);
                self.outcome = Some(Outcome::Aborted);
                Stage::Terminal
            }

            (Stage::Mutating | Stage::Verifying, StageEvent::Failed(err)) => {
                if self.rollback_attempted {
                    return Err("Rollback already attempted for this run".to_string());
                }
                self.record_error(err);
                self.rollback_attempted = true;
                Stage::RollingBack
            }

            (Stage::RollingBack, StageEvent::RolledBack) => {
                self.outcome = Some(Outcome::RolledBack);
                Stage::Terminal
            }
            (Stage::RollingBack, StageEvent::RollbackFailed(err)) => {
                self.record_error(err);
                self.outcome = Some(Outcome::Fatal);
                Stage::Terminal
            }

            // Invalid transitions
            (stage, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", stage, event));
            }
        };

        self.stage = new_stage;
        self.history.push(new_stage);
        Ok(new_stage)
    }

    fn record_error(&mut self, err: &str) {
        if self.error.is_none() {
            self.error = Some(err.to_string());
        }
    }
}

impl Default for MutationFsm {
    fn default() -> Self {
        Self::new()
    }
}
