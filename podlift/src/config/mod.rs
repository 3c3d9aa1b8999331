//! Configuration file handling

pub mod init;
pub mod loader;
pub mod schema;

pub use loader::{load_config, parse_config, ResolvedEnv, CONFIG_FILE};
pub use schema::DeployConfig;
