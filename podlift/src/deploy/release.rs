//! Release of the service binary and container

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use unitgen::{absolutize, render_unit, CompiledUnit};

use crate::config::ResolvedEnv;
use crate::deploy::backup::{snapshot, BackupRecord};
use crate::deploy::build::{build_binary, BuildMetadata};
use crate::deploy::health::{check_active, check_health};
use crate::deploy::local::{require_tools, LocalRunner};
use crate::deploy::protocol::{execute, Mutation};
use crate::deploy::rollback::{RollbackController, RollbackPlan};
use crate::deploy::run::PipelineRun;
use crate::deploy::version::VersionResolver;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::remote::command::{daemon_reload, systemctl};
use crate::remote::{RemoteCommand, RemoteSession, Script, Step, Transfer};

/// Remote directory receiving artifacts before they go live
pub const STAGING_DIR: &str = ".podlift/incoming";

/// Remote directory holding the staged unit file
pub const UNIT_STAGING_DIR: &str = ".podlift";

/// Supervisor directory for quadlet units
pub const QUADLET_DIR: &str = "~/.config/containers/systemd";

const WANTS_DIR: &str = "~/.config/systemd/user/default.target.wants";

/// Build, stage, activate and verify a release.
pub struct ReleaseMutation {
    env: ResolvedEnv,
    runner: Arc<dyn LocalRunner>,
    project_dir: PathBuf,
    version: Option<String>,

    sync_env_file: bool,
    compiled: Option<CompiledUnit>,
    records: Vec<BackupRecord>,
    rollback: Option<RollbackController>,
}

impl ReleaseMutation {
    pub fn new(env: ResolvedEnv, runner: Arc<dyn LocalRunner>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            env,
            runner,
            project_dir: project_dir.into(),
            version: None,
            sync_env_file: false,
            compiled: None,
            records: Vec::new(),
            rollback: None,
        }
    }

    /// Build with a resolved release version instead of `git describe`
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn records(&self) -> &[BackupRecord] {
        &self.records
    }

    pub fn compiled(&self) -> Option<&CompiledUnit> {
        self.compiled.as_ref()
    }

    fn service_unit(&self) -> String {
        self.env.unit.service_unit()
    }

    fn staging(&self) -> String {
        self.env.target.path(STAGING_DIR)
    }

    fn staged_unit(&self) -> String {
        self.env
            .target
            .path(&format!("{}/{}", UNIT_STAGING_DIR, self.env.unit.unit_file_name()))
    }

    fn live_binary(&self) -> String {
        self.env.target.path(&self.env.release.binary_name)
    }

    fn live_unit(&self) -> String {
        format!("{}/{}", QUADLET_DIR, self.env.unit.unit_file_name())
    }

    fn image_build(&self) -> Step {
        Step::cmd("podman")
            .args(["build", "-f", self.env.dockerfile.as_str(), "-t", self.env.unit.image.as_str(), "."])
    }

    /// Local paths uploaded to staging. Missing include entries are skipped.
    fn artifacts(&self) -> Vec<PathBuf> {
        let mut sources = vec![self.project_dir.join(self.env.release.binary_path())];
        for entry in &self.env.release.include {
            let entry = entry.trim().trim_end_matches('/');
            if entry.is_empty() {
                continue;
            }
            let path = self.project_dir.join(entry);
            if path.exists() {
                sources.push(path);
            } else {
                warn!("Artifact '{}' not found; skipping", entry);
            }
        }
        sources
    }

    /// Volume ownership remap, when the container runs as another identity
    fn chown_volumes(&self) -> Option<Step> {
        let unit = &self.env.unit;
        if unit.container_uid == 0 || unit.chown_volumes.is_empty() {
            return None;
        }
        let paths = unit
            .chown_volumes
            .iter()
            .map(|p| absolutize(p.trim(), self.env.target.dir()));
        Some(
            Step::cmd("podman")
                .args(["unshare", "chown", "-R"])
                .arg(format!("{}:{}", unit.container_uid, unit.container_gid))
                .args(paths),
        )
    }

    async fn activate(&self, session: &mut RemoteSession, label: &str, script: Script) -> Result<(), DeployError> {
        session
            .run_checked(&RemoteCommand::mutate(label, script), DeployError::ActivationError)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Mutation for ReleaseMutation {
    fn name(&self) -> &str {
        "release"
    }

    async fn validate(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        let builder = match self.env.release.build_cmd.as_deref().map(str::trim) {
            Some(cmd) if !cmd.is_empty() => "sh",
            _ => "go",
        };
        require_tools(self.runner.as_ref(), &["ssh", "rsync", builder])?;

        let tools = Script::new()
            .step(Step::cmd("command").args(["-v", "rsync"]))
            .step(Step::cmd("command").args(["-v", "podman"]));
        session
            .run_checked(&RemoteCommand::query("remote tools", tools), |detail| {
                DeployError::Precondition(format!("Remote host is missing rsync or podman ({})", detail))
            })
            .await?;

        if let Some(env_file) = self.env.sync_env_file.clone() {
            let local = self.project_dir.join(&env_file);
            if !File::new(&local).exists().await {
                return Err(DeployError::Precondition(format!(
                    "sync_env_file {} does not exist",
                    local.display()
                )));
            }
            let question = format!("Sync/Overwrite remote .env with local '{}'?", env_file.display());
            self.sync_env_file = session.ctx().confirm(&question)?;
            if !self.sync_env_file {
                info!("Skipping .env sync");
            }
        }
        Ok(())
    }

    async fn prepare(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        let dry_run = session.ctx().dry_run;
        let meta = BuildMetadata::collect(
            self.runner.as_ref(),
            &self.project_dir,
            self.version.as_deref(),
            dry_run,
        )
        .await?;
        info!("Building version {} ({})", meta.version, meta.commit);
        build_binary(self.runner.as_ref(), session, &self.env.release, &meta, &self.project_dir).await?;

        let compiled = render_unit(&self.env.unit, &self.env.render);
        info!("Compiled {} with {} labels", compiled.file_name, compiled.labels.len());
        let unit_path = self.project_dir.join("build").join(&compiled.file_name);
        session.note_local("render unit", format!("write {}", unit_path.display()), !dry_run);
        if !dry_run {
            File::new(&unit_path).write_string(&compiled.text).await?;
        }
        self.compiled = Some(compiled);

        // Staging starts empty on every run
        let clear = Step::cmd("rm").arg("-rf").arg(self.staging());
        let dirs = Step::cmd("mkdir").arg("-p").args([
            self.staging(),
            self.env.target.path("data"),
            QUADLET_DIR.to_string(),
        ]);
        let script = Script::new().step(clear).step(dirs);
        session
            .run_checked(&RemoteCommand::mutate("prepare directories", script), DeployError::TransferError)
            .await?;

        let staging = format!("{}/", self.staging());
        let upload = Transfer::new(self.artifacts(), staging.clone())
            .delete_extraneous(true)
            .excludes(self.env.release.exclude.clone());
        if !session.upload("stage artifacts", &upload).await? {
            return Err(DeployError::TransferError(format!("upload to {} failed", staging)));
        }

        let unit_upload = Transfer::new(vec![unit_path], self.staged_unit());
        if !session.upload("stage unit", &unit_upload).await? {
            return Err(DeployError::TransferError(format!("upload of {} failed", self.staged_unit())));
        }

        if self.sync_env_file {
            if let Some(env_file) = &self.env.sync_env_file {
                let env_upload = Transfer::new(vec![self.project_dir.join(env_file)], format!("{}.env", staging));
                if !session.upload("stage env file", &env_upload).await? {
                    return Err(DeployError::TransferError("upload of .env failed".to_string()));
                }
            }
        }
        Ok(())
    }

    async fn backup(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        let resources = vec![self.live_binary(), self.live_unit()];
        self.records = snapshot(session, &resources, self.env.backups).await?;

        let service = self.service_unit();
        self.rollback = Some(RollbackController::new(RollbackPlan {
            workdir: self.env.target.dir().to_string(),
            records: self.records.clone(),
            after_restore: Vec::new(),
            reload_units: true,
            rebuild: Some(self.image_build()),
            service_unit: Some(service.clone()),
            diagnostics_unit: Some(service),
        }));
        Ok(())
    }

    async fn mutate(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        let service = self.service_unit();
        let dir = self.env.target.dir().to_string();

        if self.env.stop_on_deploy {
            info!("Stopping {} before replacing files", service);
            self.activate(session, "stop", systemctl("stop", &service).or_true().into())
                .await?;
        }

        let promote = Script::new()
            .step(Step::cmd("cd").arg(self.staging()))
            .step(Step::cmd("cp").args(["-a", "./."]).arg(format!("{}/", dir)))
            .step(Step::cmd("cp").arg("-f").arg(self.staged_unit()).arg(self.live_unit()));
        session
            .run_checked(&RemoteCommand::mutate("promote", promote), DeployError::TransferError)
            .await?;

        let build = Script::new().step(Step::cmd("cd").arg(&dir)).step(self.image_build());
        self.activate(session, "image build", build).await?;

        if let Some(chown) = self.chown_volumes() {
            self.activate(session, "volume ownership", chown.into()).await?;
        }

        let link = format!("/run/user/$(id -u)/systemd/generator/{}", service);
        let enable = Script::new()
            .step(daemon_reload())
            .step(Step::cmd("mkdir").arg("-p").arg(WANTS_DIR))
            .step(
                Step::cmd("ln")
                    .arg("-sf")
                    .raw_arg(format!("\"{}\"", link))
                    .arg(format!("{}/{}", WANTS_DIR, service)),
            )
            .step(daemon_reload());
        self.activate(session, "enable", enable).await?;

        self.activate(session, "restart", systemctl("restart", &service).into())
            .await
    }

    async fn verify(&mut self, session: &mut RemoteSession) -> Result<(), DeployError> {
        let verify = self.env.verify.clone();
        if !session.ctx().dry_run && !verify.settle_delay.is_zero() {
            tokio::time::sleep(verify.settle_delay).await;
        }
        check_active(session, &self.service_unit()).await?;
        if let Some(url) = self.env.health_url.clone() {
            check_health(session, &url, &verify).await?;
        }
        Ok(())
    }

    async fn rollback(&mut self, session: &mut RemoteSession, cause: &DeployError) -> Result<(), DeployError> {
        warn!("Release failed ({:?}); restoring previous release", cause.kind());
        match self.rollback.as_mut() {
            Some(controller) => controller.execute(session).await,
            None => Err(DeployError::Internal("no backup taken before mutation".to_string())),
        }
    }

    fn diagnostics(&self) -> Option<String> {
        self.rollback
            .as_ref()
            .and_then(|c| c.diagnostics())
            .map(str::to_string)
    }
}

/// `run <env>`: release the current checkout without tagging
pub async fn run_current(
    env: ResolvedEnv,
    runner: Arc<dyn LocalRunner>,
    session: &mut RemoteSession,
    project_dir: &Path,
) -> PipelineRun {
    let mut mutation = ReleaseMutation::new(env, runner, project_dir);
    execute(&mut mutation, session).await
}

/// `release <env>`: resolve the version tag, then release it.
/// Version resolution is a gate in front of the protocol; its errors come
/// back before any remote command.
pub async fn release_version(
    env: ResolvedEnv,
    runner: Arc<dyn LocalRunner>,
    session: &mut RemoteSession,
    project_dir: &Path,
    explicit: Option<&str>,
) -> Result<PipelineRun, DeployError> {
    let version = VersionResolver::new(runner.as_ref(), session.ctx(), project_dir)
        .resolve(explicit)
        .await?;
    info!("Releasing {} to {}", version, session.target().name);
    let mut mutation = ReleaseMutation::new(env, runner, project_dir).with_version(version);
    Ok(execute(&mut mutation, session).await)
}
