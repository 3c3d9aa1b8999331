//! Release models

use serde::{Deserialize, Serialize};

/// Artifacts synced when `artifacts.include` is empty
pub const DEFAULT_INCLUDES: [&str; 3] = ["Dockerfile.vps", "migrations/", "files/"];

/// Container build file on the remote host when none is configured
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile.vps";

/// Linker flags used when no template is configured
pub const DEFAULT_LDFLAGS: &str =
    "-s -w -X 'main.buildVersion={{.Version}}' -X 'main.buildDate={{.Date}}'";

/// What gets built and shipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    pub app_name: String,

    /// Output name under `build/` and in the remote working directory
    pub binary_name: String,

    /// GOARCH for the default build
    pub arch: String,

    /// Template with `{{.Name}}` placeholders
    pub ldflags: Option<String>,

    /// Package directory for the default build
    pub source_dir: Option<String>,

    /// Replaces the default build; receives `LDFLAGS` in its environment
    pub build_cmd: Option<String>,

    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ReleaseDescriptor {
    /// Local path of the compiled binary
    pub fn binary_path(&self) -> String {
        format!("build/{}", self.binary_name)
    }

    pub fn ldflags_template(&self) -> &str {
        match self.ldflags.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => DEFAULT_LDFLAGS,
        }
    }
}
