//! Release orchestration tests against a scripted host

use std::path::Path;
use std::sync::Arc;

use podlift::app::context::ExecContext;
use podlift::config::{parse_config, ResolvedEnv};
use podlift::deploy::fsm::{Outcome, Stage};
use podlift::deploy::local::ScriptedRunner;
use podlift::deploy::release::{run_current, ReleaseMutation};
use podlift::deploy::{execute, PipelineRun};
use podlift::errors::{DeployError, ErrorKind};
use podlift::remote::session::Channel;
use podlift::remote::{CommandOutput, RemoteSession, ScriptedExecutor};

const YAML: &str = r#"
app_name: app
binary_name: app-server
verify:
  settle_delay_secs: 0
  interval_secs: 0
  attempts: 2
environments:
  prod:
    host: vps.example.com
    user: deploy
    target_dir: /srv/app
    quadlet:
      service_name: app
      image: localhost/app:latest
      health_url: http://localhost:8080/health
      container_uid: 1000
      container_gid: 1000
      chown_volumes: ["./data"]
      router:
        host: app.example.com
        internal_port: 8080
"#;

const PRESENT: &str = "then echo present";

fn environment() -> ResolvedEnv {
    parse_config(YAML).unwrap().resolve("prod").unwrap()
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("build")).unwrap();
    std::fs::write(dir.path().join("build/app-server"), b"\x7fELF").unwrap();
    std::fs::create_dir_all(dir.path().join("migrations")).unwrap();
    dir
}

async fn release(
    executor: Arc<ScriptedExecutor>,
    runner: Arc<ScriptedRunner>,
    project_dir: &Path,
    ctx: ExecContext,
) -> PipelineRun {
    let env = environment();
    let mut session = RemoteSession::new(executor, env.target.clone(), ctx);
    run_current(env, runner, &mut session, project_dir).await
}

fn inactive() -> CommandOutput {
    CommandOutput {
        success: false,
        code: Some(3),
        stdout: "failed\n".to_string(),
        stderr: String::new(),
    }
}

#[tokio::test]
async fn test_successful_release_order() {
    let project = project();
    let executor = Arc::new(ScriptedExecutor::new().respond(PRESENT, CommandOutput::ok("present\n")));
    let runner = Arc::new(ScriptedRunner::new());

    let run = release(executor.clone(), runner.clone(), project.path(), ExecContext::default()).await;
    assert!(run.succeeded(), "{}", run.summary());
    assert_eq!(run.exit_code(), 0);
    assert!(project.path().join("build/app.container").is_file());

    let staged = executor.position(".podlift/incoming/").unwrap();
    let backup = executor.position("cp -p /srv/app/app-server /srv/app/app-server.bak").unwrap();
    let promote = executor.position("cp -a ./. /srv/app/").unwrap();
    let build = executor.position("podman build -f Dockerfile.vps -t localhost/app:latest .").unwrap();
    let chown = executor.position("podman unshare chown -R 1000:1000 /srv/app/data").unwrap();
    let enable = executor.position("ln -sf").unwrap();
    let restart = executor.position("systemctl --user restart app.service").unwrap();
    let active = executor.position("systemctl --user is-active app.service").unwrap();
    let health = executor.position("curl -s -f -o /dev/null http://localhost:8080/health").unwrap();
    assert!(staged < backup);
    assert!(backup < promote && promote < build && build < chown);
    assert!(chown < enable && enable < restart && restart < active && active < health);

    assert!(runner.calls().iter().any(|c| c.contains("go build")));
    assert!(executor.position("journalctl").is_none());
}

#[tokio::test]
async fn test_staging_is_cleared_before_upload() {
    let project = project();
    let executor = Arc::new(ScriptedExecutor::new().respond(PRESENT, CommandOutput::ok("present\n")));

    let run = release(executor.clone(), Arc::new(ScriptedRunner::new()), project.path(), ExecContext::default()).await;
    assert!(run.succeeded(), "{}", run.summary());

    let calls = executor.calls();
    let clear = executor.position("rm -rf /srv/app/.podlift/incoming").unwrap();
    let first_sync = calls.iter().position(|(channel, _)| *channel == Channel::Sync).unwrap();
    let promote = executor.position("cp -a ./. /srv/app/").unwrap();
    assert!(clear < first_sync && first_sync < promote);
    assert!(calls[clear].1.contains("&& mkdir -p /srv/app/.podlift/incoming"));
}

#[tokio::test]
async fn test_activation_failure_diagnoses_restores_and_restarts() {
    let project = project();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(PRESENT, CommandOutput::ok("present\n"))
            .respond("journalctl", CommandOutput::ok("app-server: listen tcp :8080: address in use\n"))
            .respond_seq(
                "podman build",
                vec![CommandOutput::failed(125, "Error: no such file Dockerfile.vps"), CommandOutput::ok("")],
            ),
    );
    let runner = Arc::new(ScriptedRunner::new());

    let run = release(executor.clone(), runner, project.path(), ExecContext::default()).await;
    assert_eq!(run.outcome, Some(Outcome::RolledBack));
    assert_eq!(run.exit_code(), 2);
    assert!(run.stages.contains(&Stage::RollingBack));
    assert!(run.diagnostics.as_deref().unwrap().contains("address in use"));

    let diagnostics = executor.position("journalctl --user -u app.service -n 50 --no-pager").unwrap();
    let restore = executor.position("mv -f /srv/app/app-server.bak /srv/app/app-server").unwrap();
    let restart = executor.position("systemctl --user restart app.service").unwrap();
    assert!(diagnostics < restore && restore < restart);

    match run.into_result() {
        Err(DeployError::RolledBack(cause)) => assert_eq!(cause.kind(), ErrorKind::Activation),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_validation_failure_touches_nothing() {
    let project = project();
    let executor = Arc::new(ScriptedExecutor::new().respond("command -v", CommandOutput::failed(1, "")));
    let runner = Arc::new(ScriptedRunner::new());

    let run = release(executor.clone(), runner.clone(), project.path(), ExecContext::default()).await;
    assert_eq!(run.outcome, Some(Outcome::Aborted));
    assert_eq!(run.exit_code(), 1);
    assert_eq!(executor.calls().len(), 1);
    assert!(runner.calls().is_empty());
    assert!(matches!(run.error, Some(DeployError::Precondition(_))));
}

#[tokio::test]
async fn test_missing_local_tool_is_a_precondition() {
    let project = project();
    let executor = Arc::new(ScriptedExecutor::new());
    let runner = Arc::new(ScriptedRunner::new().without_tool("rsync"));

    let run = release(executor.clone(), runner, project.path(), ExecContext::default()).await;
    assert_eq!(run.outcome, Some(Outcome::Aborted));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_prepare_failure_creates_no_backup() {
    let project = project();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(PRESENT, CommandOutput::ok("present\n"))
            .fail_sync(".podlift/incoming/"),
    );
    let runner = Arc::new(ScriptedRunner::new());

    let run = release(executor.clone(), runner, project.path(), ExecContext::default()).await;
    assert_eq!(run.outcome, Some(Outcome::Aborted));
    assert!(!run.stages.contains(&Stage::BackingUp));
    assert!(executor.position("then echo present").is_none());
    assert!(executor.position("cp -p").is_none());
    assert!(executor.position("systemctl").is_none());
    assert_eq!(run.error.as_ref().map(DeployError::kind), Some(ErrorKind::Transfer));
}

#[tokio::test]
async fn test_build_failure_uploads_nothing() {
    let project = project();
    let executor = Arc::new(ScriptedExecutor::new());
    let runner = Arc::new(ScriptedRunner::new().respond("go build", CommandOutput::failed(1, "undefined: main")));

    let run = release(executor.clone(), runner, project.path(), ExecContext::default()).await;
    assert_eq!(run.outcome, Some(Outcome::Aborted));
    assert!(executor.calls().iter().all(|(channel, _)| *channel != Channel::Sync));
    assert_eq!(run.error.as_ref().map(DeployError::kind), Some(ErrorKind::Build));
}

#[tokio::test]
async fn test_verification_failure_restores_prior_binary() {
    let project = project();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(PRESENT, CommandOutput::ok("present\n"))
            .respond("is-active", inactive()),
    );
    let runner = Arc::new(ScriptedRunner::new());

    let run = release(executor.clone(), runner, project.path(), ExecContext::default()).await;
    assert_eq!(run.outcome, Some(Outcome::RolledBack));

    let failed_check = executor.position("is-active").unwrap();
    let restore = executor.position("mv -f /srv/app/app-server.bak /srv/app/app-server").unwrap();
    assert!(failed_check < restore);
    assert!(executor
        .executed()
        .iter()
        .any(|c| c.contains("mv -f ~/.config/containers/systemd/app.container.bak ~/.config/containers/systemd/app.container")));
    assert!(executor.position("curl").is_none());
}

#[tokio::test]
async fn test_unhealthy_release_rolls_back() {
    let project = project();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(PRESENT, CommandOutput::ok("present\n"))
            .respond("curl", CommandOutput::failed(22, "")),
    );
    let runner = Arc::new(ScriptedRunner::new());

    let run = release(executor.clone(), runner, project.path(), ExecContext::default()).await;
    assert_eq!(run.outcome, Some(Outcome::RolledBack));
    let probes = executor.executed().iter().filter(|c| c.starts_with("curl")).count();
    assert_eq!(probes, 2);
}

#[tokio::test]
async fn test_first_release_rollback_removes_new_files() {
    let project = project();
    let executor = Arc::new(ScriptedExecutor::new().respond("is-active", inactive()));
    let runner = Arc::new(ScriptedRunner::new());

    let run = release(executor.clone(), runner, project.path(), ExecContext::default()).await;
    assert_eq!(run.outcome, Some(Outcome::RolledBack));
    let executed = executor.executed();
    let restore = executed.iter().find(|c| c.contains("rm -f /srv/app/app-server")).unwrap();
    assert!(restore.contains("systemctl --user stop app.service || true"));
    assert!(executor.position("mv -f").is_none());
}

#[tokio::test]
async fn test_failed_restore_is_fatal() {
    let project = project();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond(PRESENT, CommandOutput::ok("present\n"))
            .respond("is-active", inactive())
            .respond("mv -f", CommandOutput::failed(1, "mv: cannot stat")),
    );
    let runner = Arc::new(ScriptedRunner::new());

    let run = release(executor, runner, project.path(), ExecContext::default()).await;
    assert_eq!(run.outcome, Some(Outcome::Fatal));
    assert_eq!(run.exit_code(), 3);
    assert!(run.error.as_ref().is_some_and(DeployError::is_fatal));
    assert!(run.summary().contains("FAILED"));
}

#[tokio::test]
async fn test_dry_run_only_queries() {
    let project = tempfile::tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new().respond(PRESENT, CommandOutput::ok("present\n")));
    let runner = Arc::new(ScriptedRunner::new());

    let run = release(
        executor.clone(),
        runner.clone(),
        project.path(),
        ExecContext::new(true, false, false),
    )
    .await;
    assert!(run.succeeded(), "{}", run.summary());
    assert!(runner.calls().is_empty());

    // Tool check and presence probes are real; everything else is recorded only
    let executed = executor.executed();
    assert_eq!(executed.len(), 3);
    assert!(executor.calls().iter().all(|(channel, _)| *channel == Channel::Exec));
    assert!(run.commands.iter().any(|c| !c.executed && c.label == "restart"));
    assert!(run.commands.iter().any(|c| !c.executed && c.label == "health check"));
    assert!(!project.path().join("build").exists());
}

#[tokio::test]
async fn test_stop_on_deploy_stops_before_promote() {
    let project = project();
    let yaml = YAML.replace("      service_name: app\n", "      service_name: app\n      stop_on_deploy: true\n");
    let env = parse_config(&yaml).unwrap().resolve("prod").unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    let runner = Arc::new(ScriptedRunner::new());

    let mut session = RemoteSession::new(executor.clone(), env.target.clone(), ExecContext::default());
    let mut mutation = ReleaseMutation::new(env, runner, project.path()).with_version("v1.2.0");
    let run = execute(&mut mutation, &mut session).await;
    assert!(run.succeeded(), "{}", run.summary());
    assert_eq!(mutation.records().len(), 2);
    assert!(mutation.compiled().unwrap().labels.iter().any(|l| l.contains("Host(`app.example.com`)")));

    let stop = executor.position("systemctl --user stop app.service").unwrap();
    let promote = executor.position("cp -a ./.").unwrap();
    assert!(stop < promote);
}
