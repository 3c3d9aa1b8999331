//! Config loading and environment resolution

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnet::IpNet;
use tracing::debug;
use unitgen::{RenderContext, UnitDescriptor};
use url::Url;

use crate::app::options::VerifyOptions;
use crate::config::schema::{DeployConfig, EnvironmentSettings, VerifySettings};
use crate::deploy::backup::BackupPolicy;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::release::DEFAULT_INCLUDES;
use crate::models::{DatabaseDescriptor, ReleaseDescriptor};
use crate::remote::Target;
use crate::utils::expand_tilde;

/// Default config file name
pub const CONFIG_FILE: &str = "deploy.yaml";

/// Read and parse a config file
pub async fn load_config(path: &Path) -> Result<DeployConfig, DeployError> {
    let file = File::new(path);
    if !file.exists().await {
        return Err(DeployError::ConfigError(format!(
            "{} not found (run `podlift init` to create one)",
            path.display()
        )));
    }
    let contents = file.read_string().await?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<DeployConfig, DeployError> {
    Ok(serde_yaml_ng::from_str(contents)?)
}

/// Everything a run needs about one environment, validated
#[derive(Debug, Clone)]
pub struct ResolvedEnv {
    pub target: Target,
    pub release: ReleaseDescriptor,
    pub unit: UnitDescriptor,
    pub render: RenderContext,
    pub database: Option<DatabaseDescriptor>,
    pub verify: VerifyOptions,
    pub health_url: Option<Url>,
    pub dockerfile: String,
    pub stop_on_deploy: bool,
    pub sync_env_file: Option<PathBuf>,
    pub backups: BackupPolicy,
}

impl DeployConfig {
    /// Resolve and validate one environment
    pub fn resolve(&self, env_name: &str) -> Result<ResolvedEnv, DeployError> {
        let env = self.environments.get(env_name).ok_or_else(|| {
            let known = self.environments.keys().cloned().collect::<Vec<_>>().join(", ");
            DeployError::ConfigError(format!(
                "Environment '{}' not found (known: {})",
                env_name, known
            ))
        })?;
        debug!("Resolving environment {}", env_name);

        if self.binary_name.trim().is_empty() {
            return Err(DeployError::ConfigError("binary_name is required".to_string()));
        }

        require(&env.host, "host", env_name)?;
        require(&env.user, "user", env_name)?;
        require(&env.target_dir, "target_dir", env_name)?;
        require(&env.quadlet.unit.service_name, "quadlet.service_name", env_name)?;
        require(&env.quadlet.unit.image, "quadlet.image", env_name)?;

        let target = Target {
            name: env_name.to_string(),
            host: env.host.trim().to_string(),
            user: env.user.trim().to_string(),
            port: env.ssh_port,
            identity: env
                .ssh_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(expand_tilde),
            dir: env.target_dir.trim().to_string(),
        };

        let unit = normalize_unit(env)?;
        let health_url = match env.quadlet.health_url.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(Url::parse(raw).map_err(|e| {
                DeployError::ConfigError(format!("Invalid health_url '{}': {}", raw, e))
            })?),
            _ => None,
        };

        Ok(ResolvedEnv {
            release: self.release_descriptor(),
            render: RenderContext {
                target_dir: target.dir().to_string(),
                default_resolver: env.traefik.cert_resolver.clone(),
            },
            database: database_descriptor(env, &target)?,
            verify: verify_options(env.verify.as_ref().unwrap_or(&self.verify)),
            health_url,
            dockerfile: env.quadlet.dockerfile(),
            stop_on_deploy: env.quadlet.stop_on_deploy,
            sync_env_file: env
                .sync_env_file
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(PathBuf::from),
            backups: BackupPolicy::from_count(env.backups),
            unit,
            target,
        })
    }

    pub fn release_descriptor(&self) -> ReleaseDescriptor {
        let include = if self.artifacts.include.is_empty() {
            DEFAULT_INCLUDES.iter().map(|s| s.to_string()).collect()
        } else {
            self.artifacts.include.clone()
        };
        ReleaseDescriptor {
            app_name: self.app_name.clone(),
            binary_name: self.binary_name.clone(),
            arch: self.build.arch.clone(),
            ldflags: self.build.ldflags.clone(),
            source_dir: self.build.dir.clone(),
            build_cmd: self.build.cmd.clone(),
            include,
            exclude: self.artifacts.exclude.clone(),
        }
    }
}

fn require(value: &str, field: &str, env_name: &str) -> Result<(), DeployError> {
    if value.trim().is_empty() {
        return Err(DeployError::ConfigError(format!(
            "environments.{}.{} is required",
            env_name, field
        )));
    }
    Ok(())
}

fn normalize_unit(env: &EnvironmentSettings) -> Result<UnitDescriptor, DeployError> {
    let mut unit = env.quadlet.unit.clone();
    if unit.network.is_none() {
        unit.network = env
            .traefik
            .network_name
            .as_ref()
            .map(|n| format!("{}.network", n));
    }

    for entry in &unit.route.ip_allow_list {
        let entry = entry.trim();
        if entry.parse::<IpNet>().is_err() && entry.parse::<IpAddr>().is_err() {
            return Err(DeployError::ConfigError(format!(
                "Invalid ip_allowlist entry '{}': expected an address or CIDR range",
                entry
            )));
        }
    }

    if let Some(rate) = unit.route.rate_limit.as_mut() {
        if rate.burst == 0 {
            rate.burst = rate.average;
        }
    }
    Ok(unit)
}

fn database_descriptor(
    env: &EnvironmentSettings,
    target: &Target,
) -> Result<Option<DatabaseDescriptor>, DeployError> {
    let Some(db) = env.database.as_ref() else {
        return Ok(None);
    };
    if db.source.trim().is_empty() {
        return Ok(None);
    }
    if !db.driver.is_empty() && db.driver != "sqlite" {
        return Err(DeployError::ConfigError(format!(
            "Unsupported database driver '{}': only sqlite is supported",
            db.driver
        )));
    }
    Ok(Some(DatabaseDescriptor {
        local: PathBuf::from(db.source.trim()),
        remote: target.path(db.source.trim()),
    }))
}

fn verify_options(settings: &VerifySettings) -> VerifyOptions {
    VerifyOptions {
        settle_delay: Duration::from_secs(settings.settle_delay_secs),
        attempts: settings.attempts.max(1),
        interval: Duration::from_secs(settings.interval_secs),
        request_timeout: Duration::from_secs(settings.request_timeout_secs.max(1)),
        probe: settings.probe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::options::ProbeMode;

    const YAML: &str = r#"
app_name: shop
binary_name: shop-server
verify:
  attempts: 5
environments:
  prod:
    host: vps.example.com
    user: deploy
    ssh_port: 2222
    ssh_key: "~/.ssh/id_vps"
    target_dir: /srv/shop/
    backups: 3
    traefik:
      cert_resolver: le
      network_name: traefik-net
    database:
      driver: sqlite
      source: ./data/shop.db
    quadlet:
      service_name: shop
      image: localhost/shop:latest
      health_url: http://localhost:8080/health
      router:
        host: shop.example.com
        ip_allowlist: ["10.0.0.0/8", "192.168.1.10"]
        rate_limit:
          average: 50
    verify:
      probe: local
      interval_secs: 1
  staging:
    host: ""
    user: deploy
    target_dir: /srv/shop
"#;

    #[test]
    fn test_resolve_environment() {
        let config = parse_config(YAML).unwrap();
        let env = config.resolve("prod").unwrap();

        assert_eq!(env.target.port, 2222);
        assert_eq!(env.target.dir(), "/srv/shop");
        assert!(env.target.identity.as_ref().unwrap().ends_with(".ssh/id_vps"));
        assert_eq!(env.render.default_resolver.as_deref(), Some("le"));
        assert_eq!(env.unit.network.as_deref(), Some("traefik-net.network"));
        assert_eq!(env.unit.route.rate_limit.as_ref().unwrap().burst, 50);
        assert_eq!(env.backups, BackupPolicy::History(3));
        assert_eq!(env.release.include, vec!["Dockerfile.vps", "migrations/", "files/"]);

        let db = env.database.unwrap();
        assert_eq!(db.remote, "/srv/shop/data/shop.db");

        // Environment block replaces the global one
        assert_eq!(env.verify.probe, ProbeMode::Local);
        assert_eq!(env.verify.attempts, 15);
        assert_eq!(env.verify.interval, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let config = parse_config(YAML).unwrap();
        let err = config.resolve("staging").unwrap_err();
        assert!(err.to_string().contains("environments.staging.host"));

        let err = config.resolve("qa").unwrap_err();
        assert!(err.to_string().contains("known: prod, staging"));
    }

    #[test]
    fn test_blank_binary_name_is_rejected() {
        let yaml = YAML.replace("binary_name: shop-server", "binary_name: \"  \"");
        let err = parse_config(&yaml).unwrap().resolve("prod").unwrap_err();
        assert!(matches!(err, DeployError::ConfigError(msg) if msg.contains("binary_name")));
    }

    #[test]
    fn test_invalid_allowlist_entry() {
        let yaml = YAML.replace("192.168.1.10", "not-an-ip");
        let err = parse_config(&yaml).unwrap().resolve("prod").unwrap_err();
        assert!(matches!(err, DeployError::ConfigError(msg) if msg.contains("not-an-ip")));
    }
}
