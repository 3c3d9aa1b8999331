//! Run options

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the application health endpoint is probed from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// `curl` on the remote host (endpoint is usually bound to localhost there)
    #[default]
    Remote,

    /// HTTP request from the operator's machine
    Local,
}

/// Verification settings for the release path
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Pause after restart before the first status check
    pub settle_delay: Duration,

    /// Health probe attempts before giving up
    pub attempts: u32,

    /// Sleep between health probe attempts
    pub interval: Duration,

    /// Timeout of a single local HTTP probe
    pub request_timeout: Duration,

    pub probe: ProbeMode,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            attempts: 15,
            interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            probe: ProbeMode::Remote,
        }
    }
}

impl VerifyOptions {
    /// No waiting at all; used by rehearsals and tests
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            interval: Duration::ZERO,
            ..Default::default()
        }
    }
}

/// Number of journal lines captured before a rollback
pub const DIAGNOSTIC_LINES: u32 = 50;
