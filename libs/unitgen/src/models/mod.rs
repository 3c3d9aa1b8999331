//! Descriptor models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Backend port used when a route does not declare one
pub const DEFAULT_INTERNAL_PORT: u16 = 8080;

/// Entry point used when a route does not declare any
pub const DEFAULT_ENTRYPOINT: &str = "websecure";

/// Certificate resolver used when neither the route nor the environment names one
pub const FALLBACK_CERT_RESOLVER: &str = "myresolver";

/// Router priority of the primary service; fallback routes register at 1
pub const PRIMARY_ROUTE_PRIORITY: u32 = 100;

/// Rate limit middleware settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    #[serde(default)]
    pub average: u32,
    #[serde(default)]
    pub burst: u32,
}

/// Declarative route exposed through the reverse proxy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteDescriptor {
    /// Hostname used to synthesize a `Host(...)` rule
    pub host: Option<String>,

    /// Explicit match rule, takes precedence over `host`
    pub rule: Option<String>,

    /// Port the container listens on
    pub internal_port: Option<u16>,

    #[serde(rename = "entrypoints")]
    pub entry_points: Vec<String>,

    pub cert_resolver: Option<String>,

    pub path_prefix: Option<String>,
    pub strip_prefix: bool,

    #[serde(rename = "basic_auth_users")]
    pub basic_auth: Vec<String>,
    pub basic_auth_file: Option<String>,

    #[serde(rename = "ip_allowlist")]
    pub ip_allow_list: Vec<String>,

    pub rate_limit: Option<RateLimit>,
    pub compress: bool,

    /// Custom request headers, emitted in key order
    pub headers: BTreeMap<String, String>,
}

impl RouteDescriptor {
    /// Whether the route is exposed at all
    pub fn is_exposed(&self) -> bool {
        non_empty(&self.rule).is_some() || non_empty(&self.host).is_some()
    }

    /// The match rule, explicit or synthesized from the host
    pub fn match_rule(&self) -> Option<String> {
        if let Some(rule) = non_empty(&self.rule) {
            return Some(rule.to_string());
        }
        non_empty(&self.host).map(|host| format!("Host(`{}`)", host))
    }

    pub fn port(&self) -> u16 {
        match self.internal_port {
            Some(port) if port > 0 => port,
            _ => DEFAULT_INTERNAL_PORT,
        }
    }
}

/// Declarative description of the containerized service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitDescriptor {
    pub service_name: String,
    pub description: Option<String>,
    pub image: String,
    pub exec: Option<String>,
    pub network: Option<String>,
    pub timezone: Option<String>,
    pub memory: Option<String>,
    pub cpu: Option<String>,
    pub read_only: bool,
    pub health_cmd: Option<String>,
    pub auto_restart: bool,

    pub ports: Vec<String>,
    pub volumes: Vec<String>,
    pub env_vars: Vec<String>,
    pub podman_args: Vec<String>,

    /// Extra labels appended after the compiled route labels
    pub labels: Vec<String>,

    #[serde(rename = "router")]
    pub route: RouteDescriptor,

    /// Numeric in-container identity used to remap volume ownership
    pub container_uid: u32,
    pub container_gid: u32,
    pub chown_volumes: Vec<String>,
}

impl UnitDescriptor {
    /// File name of the unit inside the supervisor's unit directory
    pub fn unit_file_name(&self) -> String {
        format!("{}.container", self.service_name)
    }

    /// Name of the generated supervisor service
    pub fn service_unit(&self) -> String {
        format!("{}.service", self.service_name)
    }
}

/// Rendered unit text plus the label list it embeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit {
    pub file_name: String,
    pub text: String,
    pub labels: Vec<String>,
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_rule_prefers_explicit_rule() {
        let route = RouteDescriptor {
            host: Some("app.example.com".to_string()),
            rule: Some("PathPrefix(`/x`)".to_string()),
            ..Default::default()
        };
        assert_eq!(route.match_rule().as_deref(), Some("PathPrefix(`/x`)"));
    }

    #[test]
    fn test_blank_host_is_not_exposed() {
        let route = RouteDescriptor {
            host: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(!route.is_exposed());
        assert_eq!(route.port(), DEFAULT_INTERNAL_PORT);
    }
}
