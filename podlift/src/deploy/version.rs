//! Release version resolution from git tags

use std::path::Path;

use tracing::{info, warn};

use crate::app::context::ExecContext;
use crate::deploy::local::{LocalCommand, LocalRunner};
use crate::errors::DeployError;

/// Version used by dry runs without an explicit version
pub const DRY_RUN_VERSION: &str = "v0.0.0-dryrun";

/// Resolves the tag a release is built from.
///
/// Runs before the mutation protocol starts; every failure here is a
/// precondition failure and nothing remote has been touched.
pub struct VersionResolver<'a> {
    runner: &'a dyn LocalRunner,
    ctx: &'a ExecContext,
    project_dir: &'a Path,
}

impl<'a> VersionResolver<'a> {
    pub fn new(runner: &'a dyn LocalRunner, ctx: &'a ExecContext, project_dir: &'a Path) -> Self {
        Self {
            runner,
            ctx,
            project_dir,
        }
    }

    pub async fn resolve(&self, explicit: Option<&str>) -> Result<String, DeployError> {
        let explicit = explicit.map(str::trim).filter(|v| !v.is_empty());
        if self.ctx.dry_run {
            return Ok(explicit.unwrap_or(DRY_RUN_VERSION).to_string());
        }

        let status = self.git(&["status", "--porcelain"]).await?;
        if !status.success {
            return Err(DeployError::Precondition("Failed to run git status".to_string()));
        }
        if !status.stdout.trim().is_empty() {
            return Err(DeployError::Precondition(
                "Git working directory is dirty. Commit or stash changes before releasing.".to_string(),
            ));
        }

        let has_remote = self.git(&["remote", "get-url", "origin"]).await?.success;
        if !has_remote {
            warn!("No 'origin' remote found. Pushing tags will be skipped.");
        }

        match explicit {
            Some(version) => self.validate_explicit(version, has_remote).await,
            None => self.resolve_lazy(has_remote).await,
        }
    }

    async fn validate_explicit(&self, version: &str, has_remote: bool) -> Result<String, DeployError> {
        info!("Validating explicit version {}", version);
        if !self.git(&["rev-parse", "--verify", version]).await?.success {
            return Err(DeployError::Precondition(format!(
                "Tag '{}' not found locally.",
                version
            )));
        }

        let head = self.git_value(&["rev-parse", "HEAD"]).await?;
        let tagged = self
            .git_value(&["rev-parse", &format!("{}^{{commit}}", version)])
            .await?;
        if head != tagged {
            return Err(DeployError::Precondition(format!(
                "HEAD ({}) is not at tag {} ({}). Checkout the tag first.",
                short(&head),
                version,
                short(&tagged)
            )));
        }

        if has_remote {
            self.ensure_pushed(version).await?;
        }
        Ok(version.to_string())
    }

    async fn resolve_lazy(&self, has_remote: bool) -> Result<String, DeployError> {
        info!("Checking for an existing tag on HEAD");
        let current = self.git(&["describe", "--tags", "--exact-match", "HEAD"]).await?;
        if current.success && !current.stdout.trim().is_empty() {
            let tag = current.stdout.trim().to_string();
            info!("Found existing tag: {}", tag);
            if has_remote {
                self.ensure_pushed(&tag).await?;
            }
            return Ok(tag);
        }

        warn!("No version tag found for current commit.");
        let recent = self.git(&["tag", "--sort=-v:refname", "--list"]).await?;
        let recent: Vec<&str> = recent.stdout.lines().take(5).collect();
        if !recent.is_empty() {
            eprintln!("--- Recent tags ---\n{}\n-------------------", recent.join("\n"));
        }

        let version = self.ctx.input("Enter new semantic version (e.g. v1.0.1)")?;
        if version.is_empty() {
            return Err(DeployError::Precondition("Version is required.".to_string()));
        }
        if !is_semver_tag(&version) {
            warn!("'{}' is not a v-prefixed semantic version (e.g. v1.0.0)", version);
            if !self.ctx.confirm(&format!("Use '{}' anyway?", version))? {
                return Err(DeployError::Aborted("version rejected".to_string()));
            }
        }

        info!("Creating tag {}", version);
        let message = format!("Release {}", version);
        if !self.git(&["tag", "-a", &version, "-m", &message]).await?.success {
            return Err(DeployError::Precondition(format!("Failed to create tag {}", version)));
        }
        if has_remote {
            info!("Pushing tag to origin");
            if !self.git(&["push", "origin", &version]).await?.success {
                return Err(DeployError::Precondition(format!("Failed to push tag {}", version)));
            }
        }
        Ok(version)
    }

    async fn ensure_pushed(&self, version: &str) -> Result<(), DeployError> {
        info!("Verifying tag presence on origin");
        let listed = self
            .git(&["ls-remote", "--exit-code", "--tags", "origin", version])
            .await?;
        if listed.success {
            return Ok(());
        }

        warn!("Tag '{}' exists locally but not on origin.", version);
        if !self.ctx.confirm(&format!("Push '{}' to origin now?", version))? {
            return Err(DeployError::Aborted(
                "deployment requires the tag on origin".to_string(),
            ));
        }
        if !self.git(&["push", "origin", version]).await?.success {
            return Err(DeployError::Precondition(format!("Failed to push tag {}", version)));
        }
        info!("Tag pushed.");
        Ok(())
    }

    async fn git(&self, args: &[&str]) -> Result<crate::remote::CommandOutput, DeployError> {
        let cmd = LocalCommand::new("git")
            .args(args.iter().copied())
            .cwd(self.project_dir);
        self.runner.run(&cmd).await
    }

    async fn git_value(&self, args: &[&str]) -> Result<String, DeployError> {
        let out = self.git(args).await?;
        if !out.success {
            return Err(DeployError::Precondition(format!(
                "git {} failed: {}",
                args.join(" "),
                out.stderr.trim()
            )));
        }
        Ok(out.stdout.trim().to_string())
    }
}

/// `v` followed by a semantic version
pub fn is_semver_tag(version: &str) -> bool {
    version
        .strip_prefix('v')
        .map(|v| semver::Version::parse(v).is_ok())
        .unwrap_or(false)
}

fn short(hash: &str) -> &str {
    hash.get(..7).unwrap_or(hash)
}
