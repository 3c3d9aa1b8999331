//! Local binary build

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::deploy::local::{LocalCommand, LocalRunner};
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::ReleaseDescriptor;
use crate::remote::RemoteSession;

/// Values substituted into the linker-flag template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildMetadata {
    pub version: String,
    pub commit: String,
    pub date: String,
    pub tag: String,
    pub main_version: String,
    pub go_version: String,
}

impl BuildMetadata {
    /// Gather metadata; git and toolchain lookups are skipped in dry runs
    pub async fn collect(
        runner: &dyn LocalRunner,
        project_dir: &Path,
        version: Option<&str>,
        dry_run: bool,
    ) -> Result<Self, DeployError> {
        let version = match version {
            Some(v) => v.to_string(),
            None => capture(runner, project_dir, "git", &["describe", "--tags", "--always", "--dirty"], dry_run).await,
        };
        let commit = capture(runner, project_dir, "git", &["rev-parse", "HEAD"], dry_run).await;
        let go_version = capture(runner, project_dir, "go", &["env", "GOVERSION"], dry_run).await;

        Ok(Self {
            main_version: version.trim_start_matches('v').to_string(),
            tag: version.clone(),
            version,
            commit,
            date: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            go_version,
        })
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "Version" => Some(&self.version),
            "Commit" => Some(&self.commit),
            "Date" => Some(&self.date),
            "Tag" => Some(&self.tag),
            "MainVersion" => Some(&self.main_version),
            "GoVersion" => Some(&self.go_version),
            _ => None,
        }
    }
}

async fn capture(
    runner: &dyn LocalRunner,
    project_dir: &Path,
    program: &str,
    args: &[&str],
    dry_run: bool,
) -> String {
    if dry_run {
        return "dry".to_string();
    }
    let cmd = LocalCommand::new(program).args(args.iter().copied()).cwd(project_dir);
    match runner.run(&cmd).await {
        Ok(out) if out.success => out.stdout.trim().to_string(),
        _ => {
            warn!("`{}` failed; using 'unknown'", cmd.display());
            "unknown".to_string()
        }
    }
}

/// Substitute `{{.Name}}` placeholders (inner whitespace allowed)
pub fn render_ldflags(template: &str, meta: &BuildMetadata) -> Result<String, DeployError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            DeployError::TemplateError(format!("Unclosed placeholder in '{}'", template))
        })?;
        let inner = after[..end].trim();
        let name = inner.strip_prefix('.').ok_or_else(|| {
            DeployError::TemplateError(format!("Unsupported expression '{{{{{}}}}}'", inner))
        })?;
        let value = meta.lookup(name).ok_or_else(|| {
            DeployError::TemplateError(format!("Unknown placeholder '{{{{.{}}}}}'", name))
        })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// The build command for a release
pub fn build_command(release: &ReleaseDescriptor, ldflags: &str, project_dir: &Path) -> LocalCommand {
    match release.build_cmd.as_deref().map(str::trim) {
        Some(custom) if !custom.is_empty() => LocalCommand::new("sh")
            .args(["-c", custom])
            .env("LDFLAGS", ldflags)
            .cwd(project_dir),
        _ => {
            let source = release
                .source_dir
                .as_deref()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or(".");
            LocalCommand::new("go")
                .args(["build", "-ldflags", ldflags, "-o"])
                .arg(release.binary_path())
                .arg(source)
                .env("CGO_ENABLED", "0")
                .env("GOOS", "linux")
                .env("GOARCH", release.arch.clone())
                .cwd(project_dir)
        }
    }
}

/// Compile the binary into `build/`
pub async fn build_binary(
    runner: &dyn LocalRunner,
    session: &mut RemoteSession,
    release: &ReleaseDescriptor,
    meta: &BuildMetadata,
    project_dir: &Path,
) -> Result<(), DeployError> {
    let ldflags = render_ldflags(release.ldflags_template(), meta)?;
    let cmd = build_command(release, &ldflags, project_dir);
    let dry_run = session.ctx().dry_run;
    session.note_local("build", cmd.display(), !dry_run);
    if dry_run {
        return Ok(());
    }

    info!("Building {} ({})", release.binary_name, release.arch);
    Dir::new(project_dir.join("build")).create().await?;
    let cmd = if session.ctx().verbose { cmd.interactive() } else { cmd };
    let output = runner.run(&cmd).await?;
    if !output.success {
        return Err(DeployError::BuildError(format!(
            "{} exited with {:?}\n{}{}",
            cmd.program,
            output.code,
            output.stdout,
            output.stderr
        )));
    }

    let binary = project_dir.join(release.binary_path());
    if !binary.is_file() {
        return Err(DeployError::BuildError(format!(
            "Build succeeded but {} was not produced",
            binary.display()
        )));
    }
    Ok(())
}
