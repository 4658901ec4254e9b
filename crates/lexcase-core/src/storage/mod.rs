mod backend;
mod sqlite;

pub use backend::StorageBackend;
pub use sqlite::{bytes_to_embedding, embedding_to_bytes, SqliteStorage};

use crate::config::LexcaseConfig;
use crate::error::{LexError, Result};

/// Open the SQLite store configured in `[storage]`, creating parent directories.
pub fn open_from_config(config: &LexcaseConfig) -> Result<SqliteStorage> {
    let path = config.storage.resolved_path();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LexError::Storage(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
    }
    tracing::info!(path = %path.display(), "opening SQLite store");
    SqliteStorage::open(path)
}
