//! Logging setup
//!
//! Everything goes to stderr; stdout is reserved for what a command prints
//! on purpose (`render`, `version`, the dry-run plan).

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::DeployError;

/// Default verbosity, as written in `deploy.yaml`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Filter directive: podlift at this level, dependencies one step quieter
    /// so HTTP client chatter stays out of debug output.
    fn directive(&self) -> String {
        let deps = match self {
            LogLevel::Trace => "debug",
            LogLevel::Debug | LogLevel::Info => "warn",
            LogLevel::Warn | LogLevel::Error => self.as_str(),
        };
        format!("{},podlift={}", deps, self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub log_level: LogLevel,

    /// One JSON object per event instead of human-readable lines
    pub json_format: bool,
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(options: LogOptions) -> Result<(), DeployError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(options.log_level.directive()));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if options.json_format {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| DeployError::ConfigError(format!("logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());

        let level: LogLevel = serde_yaml_ng::from_str("warning").unwrap();
        assert_eq!(level, LogLevel::Warn);
    }

    #[test]
    fn test_dependencies_stay_quieter() {
        assert_eq!(LogLevel::Debug.directive(), "warn,podlift=debug");
        assert_eq!(LogLevel::Error.directive(), "error,podlift=error");
    }
}
