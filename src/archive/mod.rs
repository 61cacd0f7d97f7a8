//! On-disk side of the backup pipeline: fingerprinting save files, reading
//! their header metadata and managing the archive directory.

pub mod extractor;
pub mod hasher;
pub mod store;

pub use extractor::{SaveDocumentExtractor, SaveMetadata};
pub use hasher::ContentHasher;
pub use store::{ArchivedFile, BackupStore, SaveCandidate};

use std::path::PathBuf;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt save document: {0}")]
    Corrupt(String),

    #[error("Directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("Backup file not found: {0}")]
    MissingBackup(PathBuf),

    #[error("Unexpected archive filename: {0}")]
    InvalidFilename(String),

    #[error("Refusing to overwrite existing file: {0}")]
    AlreadyExists(PathBuf),
}

impl ArchiveError {
    /// The file disappeared between enumeration and use.
    pub fn is_transient(&self) -> bool {
        matches!(self, ArchiveError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, ArchiveError::Corrupt(_))
    }
}

impl From<quick_xml::Error> for ArchiveError {
    fn from(error: quick_xml::Error) -> Self {
        match error {
            quick_xml::Error::Io(io) => match std::sync::Arc::try_unwrap(io) {
                Ok(io) => ArchiveError::Io(io),
                Err(shared) => ArchiveError::Corrupt(shared.to_string()),
            },
            other => ArchiveError::Corrupt(other.to_string()),
        }
    }
}

/// The three families of save files the game writes, told apart by filename prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SaveKind {
    Quicksave,
    Autosave,
    Save,
}

impl SaveKind {
    pub const ALL: [SaveKind; 3] = [SaveKind::Quicksave, SaveKind::Autosave, SaveKind::Save];

    pub fn prefix(&self) -> &'static str {
        match self {
            SaveKind::Quicksave => "quicksave",
            SaveKind::Autosave => "autosave",
            SaveKind::Save => "save",
        }
    }

    /// Classify an original save filename, e.g. `autosave_02.xml.gz`.
    pub fn classify(filename: &str) -> Option<SaveKind> {
        Self::ALL.into_iter().find(|kind| filename.starts_with(kind.prefix()))
    }
}
