//! Database sync models

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// First 16 bytes of every SQLite 3 database file
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// The database file kept in sync between the operator's machine and the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    /// Local path
    pub local: PathBuf,

    /// Absolute remote path
    pub remote: String,
}

impl DatabaseDescriptor {
    pub fn remote_wal(&self) -> String {
        format!("{}-wal", self.remote)
    }

    pub fn remote_shm(&self) -> String {
        format!("{}-shm", self.remote)
    }

    pub fn remote_backup(&self) -> String {
        format!("{}.bak", self.remote)
    }
}
