//! `deploy.yaml` schema

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use unitgen::UnitDescriptor;

use crate::app::options::ProbeMode;
use crate::logs::LogLevel;
use crate::models::release::DEFAULT_DOCKERFILE;

/// Top-level config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub app_name: String,

    #[serde(default)]
    pub binary_name: String,

    /// Default log level; `-v` and `RUST_LOG` take precedence
    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub build: BuildSettings,

    #[serde(default)]
    pub artifacts: ArtifactSettings,

    /// Verification defaults for every environment
    #[serde(default)]
    pub verify: VerifySettings,

    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentSettings>,
}

/// Local build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    #[serde(default = "default_arch")]
    pub arch: String,

    #[serde(default)]
    pub ldflags: Option<String>,

    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default)]
    pub cmd: Option<String>,
}

fn default_arch() -> String {
    "amd64".to_string()
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            arch: default_arch(),
            ldflags: None,
            dir: None,
            cmd: None,
        }
    }
}

/// Files shipped next to the binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactSettings {
    /// Empty means the default set
    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Post-restart verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySettings {
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub probe: ProbeMode,
}

fn default_settle_delay() -> u64 {
    2
}

fn default_attempts() -> u32 {
    15
}

fn default_interval() -> u64 {
    2
}

fn default_request_timeout() -> u64 {
    5
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            settle_delay_secs: default_settle_delay(),
            attempts: default_attempts(),
            interval_secs: default_interval(),
            request_timeout_secs: default_request_timeout(),
            probe: ProbeMode::default(),
        }
    }
}

/// One deployment environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Identity file; `~/` is expanded
    #[serde(default)]
    pub ssh_key: Option<String>,

    #[serde(default)]
    pub target_dir: String,

    /// Local file uploaded as `<target_dir>/.env` after confirmation
    #[serde(default)]
    pub sync_env_file: Option<String>,

    /// Number of retained backups per resource; 1 keeps a single `.bak`
    #[serde(default = "default_backups")]
    pub backups: u32,

    #[serde(default)]
    pub quadlet: QuadletSettings,

    #[serde(default)]
    pub database: Option<DatabaseSettings>,

    #[serde(default)]
    pub traefik: TraefikSettings,

    /// Overrides the top-level `verify` block
    #[serde(default)]
    pub verify: Option<VerifySettings>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_backups() -> u32 {
    1
}

/// Container unit plus release-only switches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuadletSettings {
    #[serde(flatten)]
    pub unit: UnitDescriptor,

    /// Stop the unit before any live file is replaced
    #[serde(default)]
    pub stop_on_deploy: bool,

    /// Application health endpoint probed after restart
    #[serde(default)]
    pub health_url: Option<String>,

    #[serde(default)]
    pub dockerfile: Option<String>,
}

impl QuadletSettings {
    pub fn dockerfile(&self) -> String {
        match self.dockerfile.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => DEFAULT_DOCKERFILE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub driver: String,

    /// Path relative to both the local project and the remote working directory
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraefikSettings {
    /// Default certificate resolver for routes of this environment
    #[serde(default)]
    pub cert_resolver: Option<String>,

    #[serde(default)]
    pub network_name: Option<String>,
}
