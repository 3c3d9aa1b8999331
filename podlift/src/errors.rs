//! Error types for podlift

use thiserror::Error;

/// Main error type for podlift
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml_ng::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Prompt error: {0}")]
    PromptError(#[from] dialoguer::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Missing tooling, dirty state, service still active
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Local compilation or template failure
    #[error("Build failed: {0}")]
    BuildError(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Backup failed: {0}")]
    BackupError(String),

    #[error("Transfer failed: {0}")]
    TransferError(String),

    /// Remote build/restart failure
    #[error("Activation failed: {0}")]
    ActivationError(String),

    /// Health or active-state check failed after activation
    #[error("Verification failed: {0}")]
    VerificationError(String),

    /// Restoring the backup failed. Both states may be damaged.
    #[error("CRITICAL: rollback failed ({reason}) while recovering from: {cause}. Manual intervention required")]
    RollbackFailed {
        cause: Box<DeployError>,
        reason: String,
    },

    /// The deploy was rolled back; the intent was not fulfilled
    #[error("Rolled back after: {0}")]
    RolledBack(Box<DeployError>),

    /// The operator declined a confirmation
    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Remote error: {0}")]
    RemoteError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification for reporting and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    Build,
    Transfer,
    Backup,
    Activation,
    Verification,
    RollbackFailed,
    RolledBack,
    Aborted,
    Config,
    Other,
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::Precondition(_) => ErrorKind::Precondition,
            DeployError::BuildError(_) | DeployError::TemplateError(_) => ErrorKind::Build,
            DeployError::TransferError(_) => ErrorKind::Transfer,
            DeployError::BackupError(_) => ErrorKind::Backup,
            DeployError::ActivationError(_) => ErrorKind::Activation,
            DeployError::VerificationError(_) => ErrorKind::Verification,
            DeployError::RollbackFailed { .. } => ErrorKind::RollbackFailed,
            DeployError::RolledBack(_) => ErrorKind::RolledBack,
            DeployError::Aborted(_) | DeployError::PromptError(_) => ErrorKind::Aborted,
            DeployError::ConfigError(_) | DeployError::YamlError(_) => ErrorKind::Config,
            _ => ErrorKind::Other,
        }
    }

    /// Whether this error means an operator must intervene by hand
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeployError::RollbackFailed { .. })
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::RollbackFailed { .. } => 3,
            DeployError::RolledBack(_) => 2,
            _ => 1,
        }
    }
}
