//! Database file sync in both directions

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::ResolvedEnv;
use crate::deploy::backup::{snapshot, BackupPolicy, BackupRecord};
use crate::deploy::local::{require_tools, LocalRunner};
use crate::deploy::protocol::Mutation;
use crate::deploy::rollback::{RollbackController, RollbackPlan};
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::database::SQLITE_HEADER;
use crate::models::DatabaseDescriptor;
use crate::remote::{quote, RemoteCommand, RemoteSession, Script, Step, Transfer};

const SNAPSHOT_NAME: &str = "snapshot.db";

fn descriptor(env: &ResolvedEnv) -> Result<DatabaseDescriptor, DeployError> {
    env.database.clone().ok_or_else(|| {
        DeployError::ConfigError(format!(
            "No database configured for environment '{}'",
            env.target.name
        ))
    })
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Copy the remote database to the operator's machine.
///
/// The remote side takes a consistent snapshot with `sqlite3 .backup`, the
/// snapshot is downloaded to a temporary file, checked, and only then moved
/// over the local database.
pub struct DbPull {
    db: DatabaseDescriptor,
    runner: Arc<dyn LocalRunner>,
    local: PathBuf,
    partial: PathBuf,

    remote_tmp: Option<String>,
    expected_size: Option<u64>,
    local_backup: Option<bool>,
}

impl DbPull {
    pub fn new(env: &ResolvedEnv, runner: Arc<dyn LocalRunner>, project_dir: &Path) -> Result<Self, DeployError> {
        let db = descriptor(env)?;
        let local = project_dir.join(&db.local);
        Ok(Self {
            partial: with_suffix(&local, ".part"),
            local,
            db,
            runner,
            remote_tmp: None,
            expected_size: None,
            local_backup: None,
        })
    }
}

#[async_trait]
impl Mutation for DbPull {
    fn name(&self) -> &str {
        "db pull"
    }

    async fn validate(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        require_tools(self.runner.as_ref(), &["ssh"])?;

        let question = if File::new(&self.local).exists().await {
            format!("Local file {} exists. Backup and overwrite?", self.local.display())
        } else {
            format!("Download to {}?", self.local.display())
        };
        if !session.ctx().confirm(&question)? {
            return Err(DeployError::Aborted("pull declined".to_string()));
        }

        let check = RemoteCommand::query("remote tools", Step::cmd("command").args(["-v", "sqlite3"]));
        session
            .run_checked(&check, |_| {
                DeployError::Precondition("sqlite3 not found on the remote host".to_string())
            })
            .await?;
        Ok(())
    }

    async fn prepare(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        info!("Pulling database from {}", session.target().host);
        let snapshot_path = format!("\"$tmp/{}\"", SNAPSHOT_NAME);
        let take = Script::new()
            .step(
                Step::cmd("sqlite3")
                    .arg(&self.db.remote)
                    .raw_arg(format!("\".backup '$tmp/{}'\"", SNAPSHOT_NAME)),
            )
            .step(Step::raw("echo \"$tmp\""))
            .step(Step::raw(format!("stat -c %s {}", snapshot_path)));
        // The temp dir is only reported on success, so a failed snapshot removes it here
        let script = Script::new()
            .step(Step::raw("tmp=$(mktemp -d)"))
            .step(Step::raw(format!(
                "{{ {} || {{ rm -rf \"$tmp\"; exit 1; }}; }}",
                take.render()
            )));
        let output = session
            .run_checked(&RemoteCommand::mutate("snapshot", script), DeployError::TransferError)
            .await?;

        let dry_run = session.ctx().dry_run;
        let mut lines = output.stdout.lines().map(str::trim).filter(|l| !l.is_empty());
        self.remote_tmp = lines.next().map(str::to_string);
        self.expected_size = lines.next().and_then(|l| l.parse().ok());
        let remote_snapshot = match &self.remote_tmp {
            Some(tmp) => format!("{}/{}", tmp, SNAPSHOT_NAME),
            None if dry_run => format!("$tmp/{}", SNAPSHOT_NAME),
            None => {
                return Err(DeployError::TransferError(
                    "snapshot did not report its location".to_string(),
                ))
            }
        };

        if !dry_run {
            Dir::parent_of(&self.local).create().await?;
        }
        let download = RemoteCommand::probe("download", Step::cmd("cat").arg(&remote_snapshot));
        if !session.fetch(&download, &self.partial).await? {
            return Err(DeployError::TransferError(format!(
                "download of {} failed",
                remote_snapshot
            )));
        }
        if dry_run {
            return Ok(());
        }

        let partial = File::new(&self.partial);
        let size = partial.size().await?;
        if let Some(expected) = self.expected_size {
            if size != expected {
                return Err(DeployError::TransferError(format!(
                    "incomplete download: {} of {} bytes",
                    size, expected
                )));
            }
        }
        if !partial.starts_with(SQLITE_HEADER).await? {
            return Err(DeployError::TransferError(
                "downloaded file is not a SQLite database".to_string(),
            ));
        }
        info!("Downloaded {} bytes", size);
        Ok(())
    }

    async fn backup(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        let file = File::new(&self.local);
        let existed = file.exists().await;
        self.local_backup = Some(existed);
        if !existed {
            return Ok(());
        }
        let dry_run = session.ctx().dry_run;
        session.note_local(
            "local backup",
            format!("cp {} {}", self.local.display(), file.backup_path().display()),
            !dry_run,
        );
        if !dry_run {
            let backup = file
                .backup()
                .await
                .map_err(|e| DeployError::BackupError(e.to_string()))?;
            info!("Backed up local database to {}", backup.display());
        }
        Ok(())
    }

    async fn mutate(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        let dry_run = session.ctx().dry_run;
        session.note_local(
            "replace",
            format!("mv {} {}", self.partial.display(), self.local.display()),
            !dry_run,
        );
        if !dry_run {
            File::new(&self.partial).replace(&self.local).await?;
        }
        Ok(())
    }

    async fn verify(&mut self, _session: &mut RemoteSession) -> Result<(), DeployError> {
        info!("Synced to {}", self.local.display());
        Ok(())
    }

    async fn rollback(&mut self, session: &mut RemoteSession, _cause: &DeployError) -> Result<(), DeployError> {
        let file = File::new(&self.local);
        if session.ctx().dry_run {
            return Ok(());
        }
        match self.local_backup {
            Some(true) => {
                File::new(file.backup_path()).copy_to(&self.local).await?;
            }
            _ => file.delete().await?,
        }
        Ok(())
    }

    async fn cleanup(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        if let Some(tmp) = self.remote_tmp.take() {
            let remove = RemoteCommand::mutate("remove snapshot", Step::cmd("rm").arg("-rf").arg(tmp));
            if let Err(e) = session.run(&remove).await {
                warn!("Could not remove the remote snapshot: {}", e);
            }
        }
        File::new(&self.partial).delete().await
    }
}

/// Replace the remote database with the local one.
///
/// Refuses to run while the service is active. The service is left stopped
/// afterwards; starting it again is up to the operator.
pub struct DbPush {
    db: DatabaseDescriptor,
    runner: Arc<dyn LocalRunner>,
    local: PathBuf,
    service_unit: String,
    owner: Option<(u32, u32)>,
    policy: BackupPolicy,

    records: Vec<BackupRecord>,
    rollback: Option<RollbackController>,
}

impl DbPush {
    pub fn new(env: &ResolvedEnv, runner: Arc<dyn LocalRunner>, project_dir: &Path) -> Result<Self, DeployError> {
        let db = descriptor(env)?;
        let owner = (env.unit.container_uid > 0).then_some((env.unit.container_uid, env.unit.container_gid));
        Ok(Self {
            local: project_dir.join(&db.local),
            db,
            runner,
            service_unit: env.unit.service_unit(),
            owner,
            policy: env.backups,
            records: Vec::new(),
            rollback: None,
        })
    }

    fn chown_to_container(&self, uid: u32, gid: u32, paths: &[String]) -> Step {
        Step::cmd("podman")
            .args(["unshare", "chown"])
            .arg(format!("{}:{}", uid, gid))
            .args(paths)
    }
}

#[async_trait]
impl Mutation for DbPush {
    fn name(&self) -> &str {
        "db push"
    }

    async fn validate(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        require_tools(self.runner.as_ref(), &["ssh", "rsync"])?;

        let env_name = session.target().name.clone();
        let active = RemoteCommand::query(
            "service state",
            Step::cmd("systemctl").args(["--user", "is-active", "-q", self.service_unit.as_str()]),
        );
        let state = session.run(&active).await?;
        if state.success {
            return Err(DeployError::Precondition(format!(
                "Service '{}' is RUNNING on {}. Stop it before pushing a database: podlift service stop {}",
                self.service_unit,
                session.target().host,
                env_name
            )));
        }
        if state.code == Some(255) {
            return Err(DeployError::Precondition(format!(
                "Could not determine the state of {}: {}",
                self.service_unit,
                state.stderr.trim()
            )));
        }

        let local = File::new(&self.local);
        if !local.exists().await {
            return Err(DeployError::Precondition(format!(
                "Local database {} does not exist",
                self.local.display()
            )));
        }
        if !local.starts_with(SQLITE_HEADER).await? {
            return Err(DeployError::Precondition(format!(
                "{} is not a SQLite database",
                self.local.display()
            )));
        }

        warn!("OVERWRITING REMOTE DB {} on {}", self.db.remote, env_name);
        if !session.ctx().confirm("Are you sure?")? {
            return Err(DeployError::Aborted("push declined".to_string()));
        }
        Ok(())
    }

    async fn prepare(&mut self, _session: &mut RemoteSession) -> Result<(), DeployError> {
        Ok(())
    }

    async fn backup(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        let files = [self.db.remote.clone(), self.db.remote_wal(), self.db.remote_shm()];
        if self.owner.is_some() {
            info!("Reclaiming file permissions");
            let reclaim = Step::cmd("podman")
                .args(["unshare", "chown"])
                .raw_arg("$(id -u):$(id -g)")
                .args(&files)
                .or_true();
            session.run(&RemoteCommand::mutate("reclaim ownership", reclaim)).await?;
        }

        info!("Creating remote backup");
        self.records = match snapshot(session, &files, self.policy).await {
            Ok(records) => records,
            Err(e) => {
                // A failed backup is never rolled back; hand the file back to the container
                if let Some((uid, gid)) = self.owner {
                    let chown = self.chown_to_container(uid, gid, &files[..1]).or_true();
                    if let Err(restore) = session.run(&RemoteCommand::mutate("restore ownership", chown)).await {
                        warn!("Could not restore container ownership: {}", restore);
                    }
                }
                return Err(e);
            }
        };

        let after_restore = match self.owner {
            Some((uid, gid)) => vec![self.chown_to_container(uid, gid, &files[..1]).or_true()],
            None => Vec::new(),
        };
        self.rollback = Some(RollbackController::new(RollbackPlan {
            workdir: session.target().dir().to_string(),
            records: self.records.clone(),
            after_restore,
            ..Default::default()
        }));
        Ok(())
    }

    async fn mutate(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        let mut script = Script::new();
        if let Some((parent, _)) = self.db.remote.rsplit_once('/') {
            if !parent.is_empty() {
                script = script.step(Step::cmd("mkdir").args(["-p", parent]));
            }
        }
        let script = script.step(
            Step::cmd("rm")
                .arg("-f")
                .args([self.db.remote_wal(), self.db.remote_shm()]),
        );
        session
            .run_checked(&RemoteCommand::mutate("prepare database file", script), DeployError::TransferError)
            .await?;

        info!("Uploading {}", self.local.display());
        let upload = Transfer::new(vec![self.local.clone()], self.db.remote.clone());
        if !session.upload("upload database", &upload).await? {
            return Err(DeployError::TransferError(format!(
                "upload to {} failed",
                quote(&self.db.remote)
            )));
        }

        if let Some((uid, gid)) = self.owner {
            info!("Restoring container permissions");
            let mut paths = vec![self.db.remote.clone()];
            if self.records.first().is_some_and(|r| r.existed) {
                paths.push(self.db.remote_backup());
            }
            let chown = self.chown_to_container(uid, gid, &paths);
            session
                .run_checked(&RemoteCommand::mutate("restore ownership", chown), DeployError::TransferError)
                .await?;
        }
        Ok(())
    }

    async fn verify(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        info!(
            "Database pushed. {} remains STOPPED; run `podlift service start {}` when ready",
            self.service_unit,
            session.target().name
        );
        Ok(())
    }

    async fn rollback(&mut self, session: &mut RemoteSession, _cause: &DeployError) -> Result<(), DeployError> {
        warn!("Restoring remote database from backup");
        match self.rollback.as_mut() {
            Some(controller) => controller.execute(session).await,
            None => Err(DeployError::Internal("no backup taken before mutation".to_string())),
        }
    }
}
