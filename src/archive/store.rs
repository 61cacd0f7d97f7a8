use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::archive::{ArchiveError, ArchiveResult};
use crate::logger;

/// `id<playthrough>_<YYYYMMDD-HHMMSS>[-n].xml.gz`
static ARCHIVE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^id([0-9]+)_(.+)\.xml\.gz$").expect("archive filename pattern is valid")
});

const SAVE_MARKER: &str = ".xml.gz";
const IN_PROGRESS_MARKER: &str = "temp_save";
const TEMP_DIR_NAME: &str = "temp";

/// A save file in the game's save directory.
#[derive(Debug, Clone)]
pub struct SaveCandidate {
    pub path: PathBuf,
    pub file_name: String,
    pub modified: DateTime<Utc>,
}

/// A file found in the archive directory.
#[derive(Debug, Clone)]
pub struct ArchivedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub playthrough_id: i64,
    pub modified: DateTime<Utc>,
}

/// The game's save directory (read only) and the backup archive directory.
///
/// All staging and extraction scratch files live in `<archive>/temp`.
#[derive(Debug, Clone)]
pub struct BackupStore {
    source_dir: PathBuf,
    archive_dir: PathBuf,
}

impl BackupStore {
    pub fn new(source_dir: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            archive_dir: archive_dir.into(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.archive_dir.join(TEMP_DIR_NAME)
    }

    pub fn archive_path(&self, backup_filename: &str) -> PathBuf {
        self.archive_dir.join(backup_filename)
    }

    /// Create the archive and temp directories and empty the temp directory.
    pub fn prepare(&self) -> ArchiveResult<()> {
        let temp_dir = self.temp_dir();
        std::fs::create_dir_all(&temp_dir)?;

        let mut removed = 0;
        for entry in std::fs::read_dir(&temp_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            logger::info("STORE", &format!("Cleared {} leftover temp files", removed), None);
        }
        Ok(())
    }

    /// Completed save files in the source directory, in directory order.
    pub fn list_candidates(&self) -> ArchiveResult<Vec<SaveCandidate>> {
        if !self.source_dir.is_dir() {
            return Err(ArchiveError::MissingDirectory(self.source_dir.clone()));
        }

        let mut candidates = Vec::new();
        for entry in WalkDir::new(&self.source_dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    logger::warn("STORE", "Skipping unreadable directory entry", Some(&e.to_string()));
                    continue;
                }
            };
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !entry.file_type().is_file() || !is_completed_save(&file_name) {
                continue;
            }
            let modified = match entry.metadata() {
                Ok(meta) => meta.modified().map(DateTime::<Utc>::from)?,
                // vanished since the directory was read
                Err(_) => continue,
            };
            candidates.push(SaveCandidate {
                path: entry.into_path(),
                file_name,
                modified,
            });
        }
        Ok(candidates)
    }

    /// Backup files in the archive directory whose names follow the archive convention.
    pub fn list_archived(&self) -> ArchiveResult<Vec<ArchivedFile>> {
        if !self.archive_dir.is_dir() {
            return Err(ArchiveError::MissingDirectory(self.archive_dir.clone()));
        }

        let mut archived = Vec::new();
        for entry in WalkDir::new(&self.archive_dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| ArchiveError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(playthrough_id) = parse_playthrough_id(&file_name) else {
                continue;
            };
            let modified = entry.metadata().map_err(|e| ArchiveError::Io(e.into()))?.modified()?;
            archived.push(ArchivedFile {
                path: entry.into_path(),
                file_name,
                playthrough_id,
                modified: DateTime::<Utc>::from(modified),
            });
        }
        Ok(archived)
    }

    /// A filename for a new backup owned by `playthrough_id`, not yet used in
    /// the archive directory.
    pub fn archive_filename(&self, playthrough_id: i64, now: DateTime<Local>) -> String {
        let stamp = now.format("%Y%m%d-%H%M%S");
        self.unused_name(&format!("id{}_{}", playthrough_id, stamp))
    }

    fn unused_name(&self, stem: &str) -> String {
        let mut candidate = format!("{}{}", stem, SAVE_MARKER);
        let mut counter = 1;
        while self.archive_path(&candidate).exists() {
            candidate = format!("{}-{}{}", stem, counter, SAVE_MARKER);
            counter += 1;
        }
        candidate
    }

    /// Copy a save into the archive under `backup_filename`.
    ///
    /// The bytes are written to the temp directory first and renamed into
    /// place, so a partially copied file never carries an archive name.
    pub fn copy_in(&self, source: &Path, backup_filename: &str) -> ArchiveResult<PathBuf> {
        if !self.archive_dir.is_dir() {
            return Err(ArchiveError::MissingDirectory(self.archive_dir.clone()));
        }
        let destination = self.archive_path(backup_filename);
        if destination.exists() {
            return Err(ArchiveError::AlreadyExists(destination));
        }

        let staging = self.temp_dir().join(format!("{}.part", backup_filename));
        std::fs::create_dir_all(self.temp_dir())?;
        if let Err(e) = std::fs::copy(source, &staging) {
            let _ = std::fs::remove_file(&staging);
            return Err(e.into());
        }
        if let Err(e) = std::fs::rename(&staging, &destination) {
            let _ = std::fs::remove_file(&staging);
            return Err(e.into());
        }

        logger::debug(
            "STORE",
            "Archived save",
            Some(&format!("{} -> {}", source.display(), destination.display())),
        );
        Ok(destination)
    }

    /// Rename an archived file so its embedded playthrough id is `playthrough_id`.
    /// Returns the new filename.
    pub fn rename_for_playthrough(&self, backup_filename: &str, playthrough_id: i64) -> ArchiveResult<String> {
        let source = self.archive_path(backup_filename);
        if !source.is_file() {
            return Err(ArchiveError::MissingBackup(source));
        }

        if parse_playthrough_id(backup_filename) == Some(playthrough_id) {
            return Ok(backup_filename.to_string());
        }
        let stem = rewrite_playthrough_id(backup_filename, playthrough_id)
            .ok_or_else(|| ArchiveError::InvalidFilename(backup_filename.to_string()))?;
        // another playthrough may hold a backup from the same second
        let new_filename = self.unused_name(stem.trim_end_matches(SAVE_MARKER));
        std::fs::rename(&source, self.archive_path(&new_filename))?;
        Ok(new_filename)
    }

    /// Rename an archived file to an exact name, refusing to overwrite.
    pub fn rename(&self, from: &str, to: &str) -> ArchiveResult<()> {
        let source = self.archive_path(from);
        if !source.is_file() {
            return Err(ArchiveError::MissingBackup(source));
        }
        let destination = self.archive_path(to);
        if destination.exists() {
            return Err(ArchiveError::AlreadyExists(destination));
        }
        std::fs::rename(&source, &destination)?;
        Ok(())
    }

    /// Copy an archived backup over the save slot `<source>/<slot>.xml.gz`.
    pub fn restore(&self, backup_filename: &str, slot: &str) -> ArchiveResult<PathBuf> {
        let backup_path = self.archive_path(backup_filename);
        if !backup_path.is_file() {
            return Err(ArchiveError::MissingBackup(backup_path));
        }
        if !self.source_dir.is_dir() {
            return Err(ArchiveError::MissingDirectory(self.source_dir.clone()));
        }

        let slot = slot.trim_end_matches(SAVE_MARKER);
        if slot.is_empty() || slot.contains(['/', '\\']) {
            return Err(ArchiveError::InvalidFilename(slot.to_string()));
        }
        let target = self.source_dir.join(format!("{}{}", slot, SAVE_MARKER));
        std::fs::copy(&backup_path, &target)?;

        logger::info(
            "STORE",
            &format!("Restored {} to slot {}", backup_filename, slot),
            Some(&target.display().to_string()),
        );
        Ok(target)
    }

    /// Remove an archived file. Returns false if it was already gone.
    pub fn delete(&self, backup_filename: &str) -> ArchiveResult<bool> {
        match std::fs::remove_file(self.archive_path(backup_filename)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

pub fn is_completed_save(file_name: &str) -> bool {
    file_name.contains(SAVE_MARKER) && !file_name.contains(IN_PROGRESS_MARKER)
}

/// Playthrough id embedded in an archive filename.
pub fn parse_playthrough_id(backup_filename: &str) -> Option<i64> {
    ARCHIVE_NAME
        .captures(backup_filename)
        .and_then(|caps| caps.get(1))
        .and_then(|id| id.as_str().parse().ok())
}

/// `backup_filename` with its embedded playthrough id replaced.
pub fn rewrite_playthrough_id(backup_filename: &str, playthrough_id: i64) -> Option<String> {
    let caps = ARCHIVE_NAME.captures(backup_filename)?;
    Some(format!("id{}_{}{}", playthrough_id, &caps[2], SAVE_MARKER))
}
