//! Mutation protocol FSM tests

use podlift::deploy::fsm::{MutationFsm, Outcome, Stage, StageEvent};
use tokio_test::{assert_err, assert_ok};

fn advance_to_mutating(fsm: &mut MutationFsm) {
    fsm.process(StageEvent::Start).unwrap();
    fsm.process(StageEvent::Validated).unwrap();
    fsm.process(StageEvent::Prepared).unwrap();
    fsm.process(StageEvent::BackedUp).unwrap();
}

#[test]
fn test_fsm_initial_state() {
    let fsm = MutationFsm::new();
    assert_eq!(fsm.stage(), Stage::Idle);
    assert!(fsm.error().is_none());
    assert!(fsm.outcome().is_none());
    assert!(!fsm.rollback_attempted());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = MutationFsm::new();
    advance_to_mutating(&mut fsm);
    assert_eq!(fsm.stage(), Stage::Mutating);
    assert!(fsm.backup_taken());

    fsm.process(StageEvent::Mutated).unwrap();
    fsm.process(StageEvent::Verified).unwrap();
    assert_eq!(fsm.stage(), Stage::Succeeded);

    fsm.process(StageEvent::Finish).unwrap();
    assert_eq!(fsm.stage(), Stage::Terminal);
    assert_eq!(fsm.outcome(), Some(Outcome::Succeeded));
    assert_eq!(
        fsm.history(),
        &[
            Stage::Idle,
            Stage::Validating,
            Stage::Preparing,
            Stage::BackingUp,
            Stage::Mutating,
            Stage::Verifying,
            Stage::Succeeded,
            Stage::Terminal,
        ]
    );
}

#[test]
fn test_fsm_failure_before_backup_aborts() {
    for steps in 0..3 {
        let mut fsm = MutationFsm::new();
        fsm.process(StageEvent::Start).unwrap();
        let events = [StageEvent::Validated, StageEvent::Prepared];
        for event in events.into_iter().take(steps.min(2)) {
            fsm.process(event).unwrap();
        }

        fsm.process(StageEvent::Failed("missing rsync".to_string())).unwrap();
        assert_eq!(fsm.stage(), Stage::Terminal);
        assert_eq!(fsm.outcome(), Some(Outcome::Aborted));
        assert!(!fsm.rollback_attempted());
        assert!(!fsm.history().contains(&Stage::RollingBack));
    }
}

#[test]
fn test_fsm_verify_failure_rolls_back() {
    let mut fsm = MutationFsm::new();
    advance_to_mutating(&mut fsm);
    fsm.process(StageEvent::Mutated).unwrap();

    fsm.process(StageEvent::Failed("unhealthy".to_string())).unwrap();
    assert_eq!(fsm.stage(), Stage::RollingBack);
    assert!(fsm.rollback_attempted());

    fsm.process(StageEvent::RolledBack).unwrap();
    assert_eq!(fsm.stage(), Stage::Terminal);
    assert_eq!(fsm.outcome(), Some(Outcome::RolledBack));
    assert_eq!(fsm.error(), Some("unhealthy"));
}

#[test]
fn test_fsm_failed_rollback_is_fatal() {
    let mut fsm = MutationFsm::new();
    advance_to_mutating(&mut fsm);
    fsm.process(StageEvent::Failed("podman build failed".to_string())).unwrap();
    fsm.process(StageEvent::RollbackFailed("mv: cannot stat".to_string())).unwrap();

    assert_eq!(fsm.outcome(), Some(Outcome::Fatal));
    // First error wins
    assert_eq!(fsm.error(), Some("podman build failed"));
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = MutationFsm::new();

    // Cannot mutate before validating
    assert_err!(fsm.process(StageEvent::Mutated));

    advance_to_mutating(&mut fsm);
    assert_ok!(fsm.process(StageEvent::Failed("boom".to_string())));
    assert_ok!(fsm.process(StageEvent::RolledBack));

    // Terminal accepts nothing
    assert_err!(fsm.process(StageEvent::Failed("again".to_string())));
    assert_err!(fsm.process(StageEvent::Start));
}
