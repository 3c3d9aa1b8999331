//! Backup records for remote resources

use serde::Serialize;
use tracing::info;

use crate::errors::DeployError;
use crate::remote::{quote, RemoteCommand, RemoteSession, Script, Step};

/// Suffix of the primary backup slot
pub const BACKUP_SUFFIX: &str = ".bak";

/// How many old copies of a resource are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum BackupPolicy {
    /// One `.bak`, overwritten by every run
    #[default]
    Single,

    /// `.bak`, `.bak.1` … `.bak.{n-1}`, newest first
    History(u32),
}

impl BackupPolicy {
    pub fn from_count(count: u32) -> Self {
        if count <= 1 {
            BackupPolicy::Single
        } else {
            BackupPolicy::History(count)
        }
    }

    /// Number of slots kept
    pub fn slots(&self) -> u32 {
        match self {
            BackupPolicy::Single => 1,
            BackupPolicy::History(n) => (*n).max(1),
        }
    }
}

/// Backup slot of one resource. `existed` tells rollback whether there is
/// anything to restore or whether the new file must simply go away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub resource: String,
    pub existed: bool,
}

impl BackupRecord {
    pub fn new(resource: impl Into<String>, existed: bool) -> Self {
        Self {
            resource: resource.into(),
            existed,
        }
    }

    /// Path of the slot holding the most recent copy
    pub fn slot(&self) -> String {
        slot_path(&self.resource, 0)
    }

    /// Copy the resource into its slot, rotating older slots first.
    /// A missing resource is left alone.
    pub fn create_step(&self, policy: BackupPolicy) -> Step {
        let mut moves = Vec::new();
        for index in (1..policy.slots()).rev() {
            let from = slot_path(&self.resource, index - 1);
            let to = slot_path(&self.resource, index);
            moves.push(format!(
                "if [ -f {from} ]; then mv -f {from} {to}; fi",
                from = quote(&from),
                to = quote(&to)
            ));
        }
        moves.push(format!(
            "cp -p {} {}",
            quote(&self.resource),
            quote(&self.slot())
        ));
        Step::if_exists(&self.resource, Step::raw(moves.join("; ")))
    }

    /// Put the slot back, or remove the new file when there was nothing before
    pub fn restore_step(&self) -> Step {
        if self.existed {
            Step::cmd("mv").arg("-f").arg(self.slot()).arg(&self.resource)
        } else {
            Step::cmd("rm").arg("-f").arg(&self.resource)
        }
    }
}

fn slot_path(resource: &str, index: u32) -> String {
    if index == 0 {
        format!("{}{}", resource, BACKUP_SUFFIX)
    } else {
        format!("{}{}.{}", resource, BACKUP_SUFFIX, index)
    }
}

/// Query printing `present` or `absent` for a remote file
pub fn presence_probe(path: &str) -> Step {
    Step::raw(format!(
        "if [ -f {} ]; then echo present; else echo absent; fi",
        quote(path)
    ))
}

/// Probe each resource, then fill every backup slot in one command.
///
/// Probes are queries and run even in dry-run mode, so the returned records
/// reflect the real remote state.
pub async fn snapshot(
    session: &mut RemoteSession,
    resources: &[String],
    policy: BackupPolicy,
) -> Result<Vec<BackupRecord>, DeployError> {
    let mut records = Vec::with_capacity(resources.len());
    for resource in resources {
        let probe = RemoteCommand::query(format!("probe {}", resource), presence_probe(resource));
        let output = session.run_checked(&probe, DeployError::BackupError).await?;
        records.push(BackupRecord::new(resource.clone(), output.stdout.trim() == "present"));
    }

    let script = records
        .iter()
        .filter(|r| r.existed)
        .fold(Script::new(), |script, r| script.step(r.create_step(policy)));
    if script.is_empty() {
        info!("Nothing to back up yet");
        return Ok(records);
    }
    session
        .run_checked(&RemoteCommand::mutate("backup", script), DeployError::BackupError)
        .await?;
    for record in records.iter().filter(|r| r.existed) {
        info!("Backed up {} -> {}", record.resource, record.slot());
    }
    Ok(records)
}
