//! Backup, mutate, verify and restore-on-failure driver

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::deploy::fsm::{MutationFsm, Stage, StageEvent};
use crate::deploy::run::PipelineRun;
use crate::errors::DeployError;
use crate::remote::RemoteSession;

/// One operation that changes durable state.
///
/// The driver calls the hooks in stage order. Anything returned before
/// `mutate` starts aborts the run as is; a failure from `mutate` or `verify`
/// triggers exactly one call to `rollback`.
#[async_trait]
pub trait Mutation: Send {
    /// Short name for logs and the run record
    fn name(&self) -> &str;

    /// Local and remote preconditions. No remote writes.
    async fn validate(&mut self, session: &mut RemoteSession) -> Result<(), DeployError>;

    /// Artifacts for the mutation. May write to staging locations, never to live ones.
    async fn prepare(&mut self, session: &mut RemoteSession) -> Result<(), DeployError>;

    /// Fill the backup slot of every resource about to change
    async fn backup(&mut self, session: &mut RemoteSession) -> Result<(), DeployError>;

    async fn mutate(&mut self, session: &mut RemoteSession) -> Result<(), DeployError>;

    async fn verify(&mut self, session: &mut RemoteSession) -> Result<(), DeployError>;

    /// Restore the backups; an error here is fatal
    async fn rollback(&mut self, session: &mut RemoteSession, cause: &DeployError) -> Result<(), DeployError>;

    /// Release temporary resources; runs after every outcome
    async fn cleanup(&mut self, _session: &mut RemoteSession) -> Result<(), DeployError> {
        Ok(())
    }

    /// Service output captured during rollback
    fn diagnostics(&self) -> Option<String> {
        None
    }
}

/// Drive a mutation to a terminal stage
pub async fn execute<M>(mutation: &mut M, session: &mut RemoteSession) -> PipelineRun
where
    M: Mutation + ?Sized,
{
    let mut run = PipelineRun::new(mutation.name(), &session.target().name, session.ctx().dry_run);
    let mut fsm = MutationFsm::new();
    info!("{} on {} (run {})", mutation.name(), session.target().name, run.run_id);

    let failure = drive(mutation, session, &mut fsm).await;
    match failure {
        None => {
            transition(&mut fsm, StageEvent::Finish);
        }
        Some(cause) if fsm.stage() == Stage::Terminal => {
            run.error = Some(cause);
        }
        Some(cause) => {
            error!("{} failed: {}", mutation.name(), cause);
            transition(&mut fsm, StageEvent::Failed(cause.to_string()));

            let restored = mutation.rollback(session, &cause).await;
            run.diagnostics = mutation.diagnostics();
            match restored {
                Ok(()) => {
                    warn!("Rollback complete; previous state restored");
                    transition(&mut fsm, StageEvent::RolledBack);
                    run.error = Some(DeployError::RolledBack(Box::new(cause)));
                }
                Err(reason) => {
                    error!("Rollback failed: {}", reason);
                    transition(&mut fsm, StageEvent::RollbackFailed(reason.to_string()));
                    run.error = Some(DeployError::RollbackFailed {
                        cause: Box::new(cause),
                        reason: reason.to_string(),
                    });
                }
            }
        }
    }

    if let Err(e) = mutation.cleanup(session).await {
        warn!("Cleanup after {} failed: {}", mutation.name(), e);
    }

    run.stages = fsm.history().to_vec();
    run.outcome = fsm.outcome();
    run.commands = session.take_journal();
    run.finished_at = Some(chrono::Utc::now());
    run
}

/// Run the forward stages. Returns the failure, if any; pre-backup failures
/// leave the machine terminal, later ones leave it ready for rollback.
async fn drive<M>(mutation: &mut M, session: &mut RemoteSession, fsm: &mut MutationFsm) -> Option<DeployError>
where
    M: Mutation + ?Sized,
{
    transition(fsm, StageEvent::Start);
    let steps: [StageEvent; 3] = [StageEvent::Validated, StageEvent::Prepared, StageEvent::BackedUp];
    for done in steps {
        let result = match fsm.stage() {
            Stage::Validating => mutation.validate(session).await,
            Stage::Preparing => mutation.prepare(session).await,
            _ => mutation.backup(session).await,
        };
        if let Err(err) = result {
            warn!("{} stopped during {:?}: {}", mutation.name(), fsm.stage(), err);
            transition(fsm, StageEvent::Failed(err.to_string()));
            return Some(err);
        }
        transition(fsm, done);
    }

    if let Err(err) = mutation.mutate(session).await {
        return Some(err);
    }
    transition(fsm, StageEvent::Mutated);

    if let Err(err) = mutation.verify(session).await {
        return Some(err);
    }
    transition(fsm, StageEvent::Verified);
    None
}

fn transition(fsm: &mut MutationFsm, event: StageEvent) {
    match fsm.process(event) {
        Ok(stage) => info!("-> {:?}", stage),
        Err(e) => error!("{}", e),
    }
}
