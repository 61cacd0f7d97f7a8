pub mod import;
pub mod retention;
pub mod scheduler;

pub use import::{import_archive, inventory_saves, ImportReport, InventoryEntry};
pub use retention::{startup_prune, MarkReport, RetentionConfig, RetentionPolicy, SweepReport};
pub use scheduler::{BackupScheduler, SchedulerHandle};

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveError, BackupStore};
use crate::database::DatabaseError;

/// Immutable snapshot of everything the scheduler reads from settings.
///
/// Taken once when a scheduler is built; the background loop never sees
/// later edits to the live settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub db_path: PathBuf,
    pub backup_path: PathBuf,
    pub save_path: PathBuf,
    /// Seconds between two polls of the save directory.
    pub poll_interval_seconds: u64,
    /// Length of one countdown step. Cancellation is checked once per tick.
    pub tick: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::new(),
            backup_path: PathBuf::new(),
            save_path: PathBuf::new(),
            poll_interval_seconds: 300,
            tick: Duration::from_secs(1),
        }
    }
}

impl SchedulerSettings {
    pub fn store(&self) -> BackupStore {
        BackupStore::new(&self.save_path, &self.backup_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Idle,
    Waiting,
    Polling,
    Archiving,
}

/// One save archived during the current session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSave {
    pub x4save: String,
    pub backup_filename: String,
    pub hash: String,
    /// Seconds spent copying and extracting, `None` while still in progress.
    pub backup_timespan: Option<f64>,
}

/// What the scheduler publishes after every state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub session_id: uuid::Uuid,
    pub state: SchedulerState,
    /// Seconds left before the next poll.
    pub countdown: u64,
    /// Completed poll cycles.
    pub loops: u64,
    pub saves: Vec<ProcessedSave>,
    /// A save is being copied and extracted right now.
    pub processing: bool,
}

/// Annotation entered by the user for an archived backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupAnnotation {
    pub hash: String,
    pub flag: bool,
    pub notes: String,
    pub branch: String,
}

/// Result type for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Catalog error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Operation not allowed: {0}")]
    Invariant(String),

    #[error("Background task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for BackupError {
    fn from(error: tokio::task::JoinError) -> Self {
        BackupError::Join(error.to_string())
    }
}

impl BackupError {
    /// Errors confined to a single save file. The loop skips the file and carries on.
    pub fn is_per_file(&self) -> bool {
        match self {
            BackupError::Archive(e) => e.is_transient() || e.is_corrupt(),
            BackupError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
