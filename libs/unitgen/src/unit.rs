//! Quadlet unit rendering

use std::fmt::{self, Write};

use crate::labels::compile_labels;
use crate::models::{non_empty, CompiledUnit, UnitDescriptor};

/// Environment-level inputs to rendering
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    /// Remote working directory; relative volume sources resolve against it
    pub target_dir: String,

    /// Environment-level certificate resolver
    pub default_resolver: Option<String>,
}

/// Rewrite a `./relative` path against the remote working directory
pub fn absolutize(path: &str, target_dir: &str) -> String {
    match path.strip_prefix("./") {
        Some(rel) => format!("{}/{}", target_dir.trim_end_matches('/'), rel),
        None => path.to_string(),
    }
}

/// Rewrite the host side of a `source:dest[:opts]` volume spec
pub fn absolutize_volume(volume: &str, target_dir: &str) -> String {
    match volume.split_once(':') {
        Some((source, rest)) => format!("{}:{}", absolutize(source, target_dir), rest),
        None => absolutize(volume, target_dir),
    }
}

/// Render the unit file and its labels.
///
/// Output is a pure function of the descriptor and context; repeated fields
/// keep their declaration order.
pub fn render_unit(unit: &UnitDescriptor, ctx: &RenderContext) -> CompiledUnit {
    let mut labels = compile_labels(
        &unit.service_name,
        &unit.route,
        ctx.default_resolver.as_deref(),
    );
    labels.extend(unit.labels.iter().cloned());

    let description = non_empty(&unit.description)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} Service", unit.service_name));

    let mut text = String::new();
    if write_unit(&mut text, unit, ctx, &description, &labels).is_err() {
        text.clear();
    }

    CompiledUnit {
        file_name: unit.unit_file_name(),
        text,
        labels,
    }
}

fn write_unit(
    out: &mut String,
    unit: &UnitDescriptor,
    ctx: &RenderContext,
    description: &str,
    labels: &[String],
) -> fmt::Result {
    writeln!(out, "[Unit]")?;
    writeln!(out, "Description={}", description)?;
    writeln!(out, "Requires=traefik.service")?;
    writeln!(out, "After=network-online.target traefik.service")?;
    writeln!(out, "Wants=network-online.target")?;
    writeln!(out)?;

    writeln!(out, "[Container]")?;
    writeln!(out, "Image={}", unit.image)?;
    optional(out, "Exec", &unit.exec)?;
    optional(out, "Network", &unit.network)?;
    optional(out, "Timezone", &unit.timezone)?;
    optional(out, "Memory", &unit.memory)?;
    optional(out, "CPUQuota", &unit.cpu)?;
    if unit.read_only {
        writeln!(out, "ReadOnly=true")?;
    }
    if let Some(cmd) = non_empty(&unit.health_cmd) {
        writeln!(out, "HealthCmd={}", cmd)?;
        writeln!(out, "HealthInterval=60s")?;
        writeln!(out, "HealthRetries=3")?;
    }
    for port in &unit.ports {
        writeln!(out, "PublishPort={}", port)?;
    }
    for volume in &unit.volumes {
        writeln!(out, "Volume={}", absolutize_volume(volume, &ctx.target_dir))?;
    }
    for env in &unit.env_vars {
        writeln!(out, "Environment={}", env)?;
    }
    for arg in &unit.podman_args {
        writeln!(out, "PodmanArgs={}", arg)?;
    }
    writeln!(
        out,
        "EnvironmentFile={}/.env",
        ctx.target_dir.trim_end_matches('/')
    )?;
    for label in labels {
        writeln!(out, "Label=\"{}\"", label)?;
    }
    writeln!(out)?;

    if unit.auto_restart {
        writeln!(out, "[Service]")?;
        writeln!(out, "Restart=always")?;
        writeln!(out)?;
    }

    writeln!(out, "[Install]")?;
    writeln!(out, "WantedBy=default.target")
}

fn optional(out: &mut String, key: &str, value: &Option<String>) -> fmt::Result {
    match non_empty(value) {
        Some(value) => writeln!(out, "{}={}", key, value),
        None => Ok(()),
    }
}
