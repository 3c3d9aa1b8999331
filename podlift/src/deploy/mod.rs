//! Mutation protocol and the operations built on it

pub mod backup;
pub mod build;
pub mod database;
pub mod fsm;
pub mod health;
pub mod local;
pub mod ops;
pub mod protocol;
pub mod release;
pub mod rollback;
pub mod run;
pub mod version;

pub use fsm::{MutationFsm, Outcome, Stage, StageEvent};
pub use protocol::{execute, Mutation};
pub use run::PipelineRun;
