//! Application-level context and options

pub mod context;
pub mod options;
pub mod prompt;
