//! podlift library
//!
//! Safe remote mutation engine for single-service rootless-container deploys.

pub mod app;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod remote;
pub mod utils;
