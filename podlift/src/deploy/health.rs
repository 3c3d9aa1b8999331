//! Post-activation health checks

use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::options::{ProbeMode, VerifyOptions};
use crate::errors::DeployError;
use crate::remote::command::systemctl;
use crate::remote::{RemoteCommand, RemoteSession, Step};

/// Fails unless the unit reports `active`
pub async fn check_active(session: &mut RemoteSession, service_unit: &str) -> Result<(), DeployError> {
    let status = RemoteCommand::probe("status check", systemctl("is-active", service_unit));
    let output = session.run(&status).await?;
    if output.success {
        info!("{} is active", service_unit);
        return Ok(());
    }
    Err(DeployError::VerificationError(format!(
        "{} is not active ({})",
        service_unit,
        output.stdout.trim()
    )))
}

/// Poll the health endpoint until it answers with a 2xx or attempts run out.
/// Dry runs report healthy without probing.
pub async fn check_health(
    session: &mut RemoteSession,
    url: &Url,
    options: &VerifyOptions,
) -> Result<(), DeployError> {
    if session.ctx().dry_run {
        session.note_local("health check", format!("probe {} ({:?})", url, options.probe), false);
        return Ok(());
    }

    let client = match options.probe {
        ProbeMode::Local => Some(Client::builder().timeout(options.request_timeout).build()?),
        ProbeMode::Remote => None,
    };

    info!("Waiting for {} to become healthy", url);
    for attempt in 1..=options.attempts {
        let healthy = match &client {
            Some(client) => probe_local(client, url).await,
            None => probe_remote(session, url).await?,
        };
        if healthy {
            info!("Health check passed (attempt {})", attempt);
            return Ok(());
        }
        debug!("Health check attempt {}/{} failed", attempt, options.attempts);
        if attempt < options.attempts && !options.interval.is_zero() {
            tokio::time::sleep(options.interval).await;
        }
    }

    warn!("{} did not become healthy", url);
    Err(DeployError::VerificationError(format!(
        "{} not healthy after {} attempts",
        url, options.attempts
    )))
}

async fn probe_remote(session: &mut RemoteSession, url: &Url) -> Result<bool, DeployError> {
    let curl = Step::cmd("curl").args(["-s", "-f", "-o", "/dev/null"]).arg(url.as_str());
    let output = session.run(&RemoteCommand::probe("health check", curl)).await?;
    Ok(output.success)
}

async fn probe_local(client: &Client, url: &Url) -> bool {
    match client.get(url.clone()).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            debug!("GET {} failed: {}", url, e);
            false
        }
    }
}
