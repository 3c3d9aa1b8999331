//! Restore logic shared by every mutation

use tracing::warn;

use crate::app::options::DIAGNOSTIC_LINES;
use crate::deploy::backup::BackupRecord;
use crate::errors::DeployError;
use crate::remote::command::{daemon_reload, systemctl};
use crate::remote::{RemoteCommand, RemoteSession, Script, Step};

/// What to put back and how to bring the service up again
#[derive(Debug, Clone, Default)]
pub struct RollbackPlan {
    /// Working directory for restore and rebuild
    pub workdir: String,

    pub records: Vec<BackupRecord>,

    /// Steps after the files are back, e.g. ownership fixes
    pub after_restore: Vec<Step>,

    /// Reload unit definitions after restoring
    pub reload_units: bool,

    /// Rebuild from the restored sources
    pub rebuild: Option<Step>,

    /// Unit restarted after restore, or stopped when nothing existed before
    pub service_unit: Option<String>,

    /// Unit whose journal is captured first
    pub diagnostics_unit: Option<String>,
}

/// Runs a [`RollbackPlan`] at most once
#[derive(Debug)]
pub struct RollbackController {
    plan: RollbackPlan,
    diagnostics: Option<String>,
    attempted: bool,
}

impl RollbackController {
    pub fn new(plan: RollbackPlan) -> Self {
        Self {
            plan,
            diagnostics: None,
            attempted: false,
        }
    }

    pub fn diagnostics(&self) -> Option<&str> {
        self.diagnostics.as_deref()
    }

    pub async fn execute(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        if self.attempted {
            return Err(DeployError::Internal("rollback already attempted".to_string()));
        }
        self.attempted = true;

        if let Some(unit) = self.plan.diagnostics_unit.clone() {
            self.capture_diagnostics(session, &unit).await;
        }

        warn!("Initiating automatic rollback");
        let prior_state = self.plan.records.iter().any(|r| r.existed);
        let brings_up = self.plan.rebuild.is_some() || self.plan.service_unit.is_some();
        // Resources with no earlier version to go back to
        let missing: Vec<&str> = self
            .plan
            .records
            .iter()
            .filter(|r| !r.existed)
            .map(|r| r.resource.as_str())
            .collect();
        let partial = prior_state && brings_up && !missing.is_empty();

        let mut restore = Script::new().step(Step::cmd("cd").arg(&self.plan.workdir));
        if !prior_state || partial {
            if let Some(unit) = &self.plan.service_unit {
                restore = restore.step(systemctl("stop", unit).or_true());
            }
        }
        for record in &self.plan.records {
            restore = restore.step(record.restore_step());
        }
        for step in &self.plan.after_restore {
            restore = restore.step(step.clone());
        }
        session
            .run_checked(&RemoteCommand::mutate("restore backup", restore), DeployError::RemoteError)
            .await?;

        if self.plan.reload_units {
            session
                .run_checked(&RemoteCommand::mutate("reload units", daemon_reload()), DeployError::RemoteError)
                .await?;
        }
        if !prior_state {
            warn!("Nothing existed before this run; new files removed and service stopped");
            return Ok(());
        }
        if partial {
            return Err(DeployError::RemoteError(format!(
                "partial restore: no earlier version of {}; service left stopped",
                missing.join(", ")
            )));
        }

        if let Some(rebuild) = &self.plan.rebuild {
            let script = Script::new()
                .step(Step::cmd("cd").arg(&self.plan.workdir))
                .step(rebuild.clone());
            session
                .run_checked(&RemoteCommand::mutate("rebuild image", script), DeployError::RemoteError)
                .await?;
        }
        if let Some(unit) = &self.plan.service_unit {
            session
                .run_checked(&RemoteCommand::mutate("restart", systemctl("restart", unit)), DeployError::RemoteError)
                .await?;
        }
        Ok(())
    }

    /// Capture the last journal lines; failures are logged, never fatal
    async fn capture_diagnostics(&mut self, session: &mut RemoteSession, unit: &str) {
        warn!("Diagnosing with remote logs (last {} lines of {})", DIAGNOSTIC_LINES, unit);
        let journal = Step::cmd("journalctl")
            .args(["--user", "-u", unit, "-n"])
            .arg(DIAGNOSTIC_LINES.to_string())
            .arg("--no-pager");
        match session.run(&RemoteCommand::query("diagnostics", journal)).await {
            Ok(output) => {
                let text = format!("{}{}", output.stdout, output.stderr);
                for line in text.lines() {
                    eprintln!("  | {}", line);
                }
                self.diagnostics = Some(text);
            }
            Err(e) => warn!("Could not read service logs: {}", e),
        }
    }
}
