//! Data models

pub mod database;
pub mod release;

pub use database::DatabaseDescriptor;
pub use release::ReleaseDescriptor;
