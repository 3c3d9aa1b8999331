//! Database sync tests against a scripted host

use std::path::Path;
use std::sync::Arc;

use podlift::app::context::ExecContext;
use podlift::app::prompt::ScriptedPrompter;
use podlift::config::{parse_config, ResolvedEnv};
use podlift::deploy::database::{DbPull, DbPush};
use podlift::deploy::execute;
use podlift::deploy::fsm::Outcome;
use podlift::deploy::local::ScriptedRunner;
use podlift::errors::{DeployError, ErrorKind};
use podlift::models::database::SQLITE_HEADER;
use podlift::remote::session::Channel;
use podlift::remote::{CommandOutput, RemoteSession, ScriptedExecutor};

const YAML: &str = r#"
app_name: app
binary_name: app-server
environments:
  prod:
    host: vps.example.com
    user: deploy
    target_dir: /srv/app
    database:
      driver: sqlite
      source: data/app.db
    quadlet:
      service_name: app
      image: localhost/app:latest
      container_uid: 1000
      container_gid: 1000
"#;

fn environment() -> ResolvedEnv {
    parse_config(YAML).unwrap().resolve("prod").unwrap()
}

fn sqlite_bytes(body: &str) -> Vec<u8> {
    let mut bytes = SQLITE_HEADER.to_vec();
    bytes.extend_from_slice(body.as_bytes());
    bytes
}

fn project_with_db(body: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    std::fs::write(dir.path().join("data/app.db"), sqlite_bytes(body)).unwrap();
    dir
}

fn session(executor: Arc<ScriptedExecutor>, ctx: ExecContext) -> RemoteSession {
    RemoteSession::new(executor, environment().target, ctx)
}

fn stopped() -> CommandOutput {
    CommandOutput::failed(3, "")
}

fn answering(answers: &[bool]) -> (ExecContext, Arc<ScriptedPrompter>) {
    let prompter = Arc::new(ScriptedPrompter::new().with_confirms(answers.iter().copied()));
    (ExecContext::default().with_prompter(prompter.clone()), prompter)
}

mod push {
    use super::*;

    async fn push(executor: Arc<ScriptedExecutor>, project: &Path, ctx: ExecContext) -> podlift::deploy::PipelineRun {
        push_with(executor, ScriptedRunner::new(), project, ctx).await
    }

    async fn push_with(
        executor: Arc<ScriptedExecutor>,
        runner: ScriptedRunner,
        project: &Path,
        ctx: ExecContext,
    ) -> podlift::deploy::PipelineRun {
        let mut session = session(executor, ctx);
        let mut mutation = DbPush::new(&environment(), Arc::new(runner), project).unwrap();
        execute(&mut mutation, &mut session).await
    }

    #[tokio::test]
    async fn test_missing_rsync_blocks_push() {
        let project = project_with_db("local");
        let executor = Arc::new(ScriptedExecutor::new().respond("is-active -q", stopped()));
        let runner = ScriptedRunner::new().without_tool("rsync");

        let run = push_with(executor.clone(), runner, project.path(), ExecContext::new(false, false, true)).await;
        assert_eq!(run.outcome, Some(Outcome::Aborted));
        assert_eq!(run.error.as_ref().map(DeployError::kind), Some(ErrorKind::Precondition));
        assert!(run.error.as_ref().unwrap().to_string().contains("rsync"));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_backup_returns_ownership_to_container() {
        let project = project_with_db("local");
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond("is-active -q", stopped())
                .respond("then echo present", CommandOutput::ok("present\n"))
                .respond("cp -p", CommandOutput::failed(1, "No space left on device")),
        );
        let run = push(executor.clone(), project.path(), ExecContext::new(false, false, true)).await;
        assert_eq!(run.outcome, Some(Outcome::Aborted));
        assert_eq!(run.error.as_ref().map(DeployError::kind), Some(ErrorKind::Backup));

        let reclaim = executor.position("podman unshare chown $(id -u):$(id -g)").unwrap();
        let backup = executor.position("cp -p /srv/app/data/app.db /srv/app/data/app.db.bak").unwrap();
        let returned = executor.position("podman unshare chown 1000:1000 /srv/app/data/app.db").unwrap();
        assert!(reclaim < backup && backup < returned);
        assert!(executor.position("mkdir").is_none());
        assert!(executor.calls().iter().all(|(channel, _)| *channel != Channel::Sync));
    }

    #[tokio::test]
    async fn test_active_service_blocks_push() {
        let project = project_with_db("local");
        for ctx in [ExecContext::new(false, false, true), ExecContext::new(true, false, true)] {
            let executor = Arc::new(ScriptedExecutor::new().respond("is-active -q", CommandOutput::ok("")));
            let run = push(executor.clone(), project.path(), ctx).await;

            assert_eq!(run.outcome, Some(Outcome::Aborted));
            assert_eq!(run.error.as_ref().map(DeployError::kind), Some(ErrorKind::Precondition));
            assert!(run.error.as_ref().unwrap().to_string().contains("podlift service stop prod"));
            assert_eq!(
                executor.calls(),
                vec![(Channel::Exec, "systemctl --user is-active -q app.service".to_string())]
            );
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_not_treated_as_stopped() {
        let project = project_with_db("local");
        let executor = Arc::new(
            ScriptedExecutor::new().respond("is-active -q", CommandOutput::failed(255, "Connection refused")),
        );
        let run = push(executor.clone(), project.path(), ExecContext::new(false, false, true)).await;
        assert_eq!(run.outcome, Some(Outcome::Aborted));
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_declined_push_writes_nothing() {
        let project = project_with_db("local");
        let executor = Arc::new(ScriptedExecutor::new().respond("is-active -q", stopped()));
        let (ctx, prompter) = answering(&[false]);

        let run = push(executor.clone(), project.path(), ctx).await;
        assert_eq!(run.outcome, Some(Outcome::Aborted));
        assert_eq!(run.exit_code(), 1);
        assert_eq!(prompter.asked(), vec!["Are you sure?".to_string()]);
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_successful_push_order() {
        let project = project_with_db("local");
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond("is-active -q", stopped())
                .respond("then echo present", CommandOutput::ok("present\n")),
        );
        let run = push(executor.clone(), project.path(), ExecContext::new(false, false, true)).await;
        assert!(run.succeeded(), "{}", run.summary());

        let reclaim = executor
            .position("podman unshare chown $(id -u):$(id -g) /srv/app/data/app.db /srv/app/data/app.db-wal")
            .unwrap();
        let backup = executor.position("cp -p /srv/app/data/app.db /srv/app/data/app.db.bak").unwrap();
        let sidecars = executor
            .position("mkdir -p /srv/app/data && rm -f /srv/app/data/app.db-wal /srv/app/data/app.db-shm")
            .unwrap();
        let upload = executor
            .calls()
            .iter()
            .position(|(channel, _)| *channel == Channel::Sync)
            .unwrap();
        let restore_owner = executor
            .position("podman unshare chown 1000:1000 /srv/app/data/app.db /srv/app/data/app.db.bak")
            .unwrap();
        assert!(reclaim < backup && backup < sidecars && sidecars < upload && upload < restore_owner);

        // The service is left stopped
        assert!(executor.position("systemctl --user start").is_none());
        assert!(executor.position("restart").is_none());
    }

    #[tokio::test]
    async fn test_failed_upload_restores_backup() {
        let project = project_with_db("local");
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond("is-active -q", stopped())
                .respond("then echo present", CommandOutput::ok("present\n"))
                .fail_sync("/srv/app/data/app.db"),
        );
        let run = push(executor.clone(), project.path(), ExecContext::new(false, false, true)).await;
        assert_eq!(run.outcome, Some(Outcome::RolledBack));
        assert_eq!(run.exit_code(), 2);

        let executed = executor.executed();
        let restore = executed
            .iter()
            .find(|c| c.contains("mv -f /srv/app/data/app.db.bak /srv/app/data/app.db"))
            .unwrap();
        assert!(restore.contains("mv -f /srv/app/data/app.db-wal.bak /srv/app/data/app.db-wal"));
        assert!(restore.contains("podman unshare chown 1000:1000 /srv/app/data/app.db"));
    }
}

mod pull {
    use super::*;

    fn scripted_host(payload: Vec<u8>, reported_size: usize) -> Arc<ScriptedExecutor> {
        Arc::new(
            ScriptedExecutor::new()
                .respond(".backup", CommandOutput::ok(format!("/tmp/tmp.Xq1\n{}\n", reported_size)))
                .fetch_payload("snapshot.db", payload),
        )
    }

    async fn pull(executor: Arc<ScriptedExecutor>, project: &Path, ctx: ExecContext) -> podlift::deploy::PipelineRun {
        let mut session = session(executor, ctx);
        let mut mutation = DbPull::new(&environment(), Arc::new(ScriptedRunner::new()), project).unwrap();
        execute(&mut mutation, &mut session).await
    }

    #[tokio::test]
    async fn test_declined_pull_changes_nothing() {
        let project = project_with_db("local");
        let executor = Arc::new(ScriptedExecutor::new());
        let (ctx, prompter) = answering(&[false]);

        let run = pull(executor.clone(), project.path(), ctx).await;
        assert_eq!(run.outcome, Some(Outcome::Aborted));
        assert!(executor.calls().is_empty());
        assert!(prompter.asked()[0].contains("exists. Backup and overwrite?"));

        assert_eq!(std::fs::read(project.path().join("data/app.db")).unwrap(), sqlite_bytes("local"));
        assert!(!project.path().join("data/app.db.bak").exists());
    }

    #[tokio::test]
    async fn test_pull_replaces_local_copy() {
        let project = project_with_db("local");
        let remote = sqlite_bytes("remote contents");
        let executor = scripted_host(remote.clone(), remote.len());
        let (ctx, _) = answering(&[true]);

        let run = pull(executor.clone(), project.path(), ctx).await;
        assert!(run.succeeded(), "{}", run.summary());

        let data = project.path().join("data");
        assert_eq!(std::fs::read(data.join("app.db")).unwrap(), remote);
        assert_eq!(std::fs::read(data.join("app.db.bak")).unwrap(), sqlite_bytes("local"));
        assert!(!data.join("app.db.part").exists());

        let snapshot = executor.position("sqlite3 /srv/app/data/app.db").unwrap();
        let fetch = executor.position("cat /tmp/tmp.Xq1/snapshot.db").unwrap();
        let cleanup = executor.position("rm -rf /tmp/tmp.Xq1").unwrap();
        assert!(executor.position("command -v sqlite3").unwrap() < snapshot);
        assert!(snapshot < fetch && fetch < cleanup);
    }

    #[tokio::test]
    async fn test_pull_into_empty_destination() {
        let project = tempfile::tempdir().unwrap();
        let remote = sqlite_bytes("fresh");
        let executor = scripted_host(remote.clone(), remote.len());
        let (ctx, prompter) = answering(&[true]);

        let run = pull(executor, project.path(), ctx).await;
        assert!(run.succeeded(), "{}", run.summary());
        assert!(prompter.asked()[0].starts_with("Download to"));
        assert_eq!(std::fs::read(project.path().join("data/app.db")).unwrap(), remote);
        assert!(!project.path().join("data/app.db.bak").exists());
    }

    #[tokio::test]
    async fn test_truncated_download_keeps_local_file() {
        let project = project_with_db("local");
        let remote = sqlite_bytes("remote contents");
        let executor = scripted_host(remote[..20].to_vec(), remote.len());
        let (ctx, _) = answering(&[true]);

        let run = pull(executor.clone(), project.path(), ctx).await;
        assert_eq!(run.outcome, Some(Outcome::Aborted));
        assert_eq!(run.error.as_ref().map(DeployError::kind), Some(ErrorKind::Transfer));

        let data = project.path().join("data");
        assert_eq!(std::fs::read(data.join("app.db")).unwrap(), sqlite_bytes("local"));
        assert!(!data.join("app.db.part").exists());
        assert!(executor.position("rm -rf /tmp/tmp.Xq1").is_some());
    }

    #[tokio::test]
    async fn test_failed_snapshot_removes_its_temp_dir() {
        let project = project_with_db("local");
        let executor = Arc::new(
            ScriptedExecutor::new().respond(".backup", CommandOutput::failed(1, "Error: database is locked")),
        );
        let (ctx, _) = answering(&[true]);

        let run = pull(executor.clone(), project.path(), ctx).await;
        assert_eq!(run.outcome, Some(Outcome::Aborted));
        assert_eq!(run.error.as_ref().map(DeployError::kind), Some(ErrorKind::Transfer));

        let snapshot = executor.position(".backup").unwrap();
        let script = &executor.calls()[snapshot].1;
        assert!(script.starts_with("tmp=$(mktemp -d) && {"));
        assert!(script.ends_with("|| { rm -rf \"$tmp\"; exit 1; }; }"));
        assert!(executor.position("cat ").is_none());
        assert_eq!(std::fs::read(project.path().join("data/app.db")).unwrap(), sqlite_bytes("local"));
    }

    #[tokio::test]
    async fn test_missing_sqlite3_is_a_precondition() {
        let project = project_with_db("local");
        let executor = Arc::new(ScriptedExecutor::new().respond("command -v sqlite3", CommandOutput::failed(1, "")));
        let (ctx, _) = answering(&[true]);

        let run = pull(executor.clone(), project.path(), ctx).await;
        assert_eq!(run.error.as_ref().map(DeployError::kind), Some(ErrorKind::Precondition));
        assert_eq!(executor.calls().len(), 1);
    }
}
