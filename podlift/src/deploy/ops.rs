//! Day-to-day operations outside the mutation protocol

use std::fmt;

use clap::ValueEnum;
use tracing::{info, warn};
use unitgen::{absolutize, render_unit, CompiledUnit};

use crate::app::options::VerifyOptions;
use crate::config::ResolvedEnv;
use crate::errors::DeployError;
use crate::remote::command::systemctl;
use crate::remote::{RemoteCommand, RemoteSession, Step};

/// Supervisor action on the service unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
    Status,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
            ServiceAction::Status => "status",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whose identity volume ownership is remapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RightsTarget {
    /// The SSH user, so files can be edited or backed up
    User,

    /// The configured in-container identity
    Container,
}

/// Run a supervisor action; start and restart are followed by a status check
pub async fn service_action(
    session: &mut RemoteSession,
    env: &ResolvedEnv,
    action: ServiceAction,
) -> Result<(), DeployError> {
    let unit = env.unit.service_unit();
    info!("Executing '{}' on {} ({})", action, unit, session.target().host);

    if action == ServiceAction::Status {
        let status = Step::cmd("systemctl").args(["--user", "status", unit.as_str(), "--no-pager"]);
        session.stream(&RemoteCommand::query("status", status)).await?;
        return Ok(());
    }

    let command = RemoteCommand::mutate(action.as_str(), systemctl(action.as_str(), &unit));
    session
        .run_checked(&command, |detail| {
            DeployError::RemoteError(format!("Action '{}' failed: {}", action, detail))
        })
        .await?;

    if matches!(action, ServiceAction::Start | ServiceAction::Restart) {
        settle(session, &env.verify).await;
        info!("Checking status");
        let active = RemoteCommand::probe("status check", systemctl("is-active", &unit));
        if !session.stream(&active).await? {
            return Err(DeployError::VerificationError(format!("{} is not active", unit)));
        }
    }
    info!("Service action '{}' completed", action);
    Ok(())
}

async fn settle(session: &RemoteSession, verify: &VerifyOptions) {
    if !session.ctx().dry_run && !verify.settle_delay.is_zero() {
        tokio::time::sleep(verify.settle_delay).await;
    }
}

/// Follow the service journal, or the container log with `podman`
pub async fn stream_logs(session: &mut RemoteSession, env: &ResolvedEnv, podman: bool) -> Result<(), DeployError> {
    let step = if podman {
        Step::cmd("podman")
            .args(["logs", "-f"])
            .arg(format!("systemd-{}", env.unit.service_name))
    } else {
        Step::cmd("journalctl")
            .args(["--user", "-u"])
            .arg(env.unit.service_unit())
            .arg("-f")
    };
    info!("Streaming logs (Ctrl+C to stop)");
    session.stream(&RemoteCommand::query("logs", step)).await?;
    Ok(())
}

/// Remap ownership of the configured volume paths
pub async fn change_rights(
    session: &mut RemoteSession,
    env: &ResolvedEnv,
    target: RightsTarget,
) -> Result<(), DeployError> {
    let unit = &env.unit;
    if unit.chown_volumes.is_empty() {
        warn!("No 'chown_volumes' configured for this environment");
        return Ok(());
    }

    let owner = match target {
        RightsTarget::User => {
            info!("Reclaiming ownership for the SSH user");
            "$(id -u):$(id -g)".to_string()
        }
        RightsTarget::Container => {
            if unit.container_uid == 0 {
                return Err(DeployError::ConfigError("container_uid not set in config".to_string()));
            }
            info!("Setting ownership for the container ({}:{})", unit.container_uid, unit.container_gid);
            format!("{}:{}", unit.container_uid, unit.container_gid)
        }
    };

    let paths = unit
        .chown_volumes
        .iter()
        .map(|p| absolutize(p.trim(), session.target().dir()))
        .collect::<Vec<_>>();
    let chown = Step::cmd("podman")
        .args(["unshare", "chown", "-R"])
        .raw_arg(owner)
        .args(paths);
    session
        .run_checked(&RemoteCommand::mutate("rights", chown), DeployError::RemoteError)
        .await?;
    info!("Permissions updated");
    Ok(())
}

/// Remove dangling images and the build cache. Failures are warnings.
pub async fn prune(session: &mut RemoteSession) -> Result<(), DeployError> {
    info!("Pruning unused resources on {}", session.target().host);
    for (label, what) in [("image prune", "image"), ("builder prune", "builder")] {
        let step = Step::cmd("podman").args([what, "prune", "-f"]);
        let output = session.run(&RemoteCommand::mutate(label, step)).await?;
        if !output.success {
            warn!("{} warning: {}", label, output.stderr.trim());
        }
    }
    info!("Prune complete");
    Ok(())
}

/// Compile the unit without touching any host
pub fn render(env: &ResolvedEnv) -> CompiledUnit {
    render_unit(&env.unit, &env.render)
}
