use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::archive::store::rewrite_playthrough_id;
use crate::archive::{ArchiveError, BackupStore};
use crate::auto_backup::{BackupError, BackupResult};
use crate::database::{BackupCatalog, DatabaseError};
use crate::logger;

/// A backup that could not be moved. The rest of the batch is unaffected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveFailure {
    pub file_hash: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveReport {
    /// New archive filenames of the moved backups.
    pub moved: Vec<String>,
    pub failed: Vec<MoveFailure>,
}

/// Keeps backup ownership and archive filenames in step.
///
/// Every archive filename embeds the id of the playthrough that owns it, so
/// reassigning a backup always renames its file as well.
pub struct PlaythroughIndex<'a> {
    catalog: &'a mut BackupCatalog,
    store: &'a BackupStore,
}

impl<'a> PlaythroughIndex<'a> {
    pub fn new(catalog: &'a mut BackupCatalog, store: &'a BackupStore) -> Self {
        Self { catalog, store }
    }

    /// Move a batch of backups, identified by fingerprint, to `target`.
    ///
    /// The recycle bin is not a valid target; backups get there only by
    /// deleting their playthrough.
    pub fn move_backups(&mut self, file_hashes: &[String], target: i64) -> BackupResult<MoveReport> {
        let playthrough = self
            .catalog
            .get_playthrough_by_id(target)?
            .ok_or_else(|| DatabaseError::NotFound(format!("playthrough {}", target)))?;
        if playthrough.is_recycle_bin() {
            return Err(BackupError::Invariant(
                "backups cannot be moved into the recycle bin directly".to_string(),
            ));
        }

        let mut report = MoveReport::default();
        for hash in file_hashes {
            match self.reassign(hash, target) {
                Ok(new_filename) => report.moved.push(new_filename),
                Err(e) => {
                    logger::warn("PLAYTHROUGHS", "Backup not moved", Some(&format!("{}: {}", hash, e)));
                    report.failed.push(MoveFailure {
                        file_hash: hash.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        logger::info(
            "PLAYTHROUGHS",
            &format!("Moved {} backups to '{}'", report.moved.len(), playthrough.name),
            Some(&format!("{} failed", report.failed.len())),
        );
        Ok(report)
    }

    /// Delete a playthrough. Its backups land in the recycle bin marked for
    /// deletion and their files are renamed to the bin's id.
    pub fn delete_playthrough(&mut self, playthrough_id: i64) -> BackupResult<MoveReport> {
        let recycle_bin = self.catalog.recycle_bin()?;
        let moved = self.catalog.delete_playthrough(playthrough_id)?;

        let mut report = MoveReport::default();
        for backup in moved {
            let result = self
                .store
                .rename_for_playthrough(&backup.backup_filename, recycle_bin.id)
                .map_err(BackupError::from)
                .and_then(|new_filename| {
                    self.catalog
                        .update_backup_playthrough(recycle_bin.id, &new_filename, &backup.file_hash)?;
                    Ok(new_filename)
                });
            match result {
                Ok(new_filename) => report.moved.push(new_filename),
                Err(e) => {
                    if let BackupError::Archive(ArchiveError::MissingBackup(_)) = &e {
                        // no file to rename, but the row must still name its owner
                        if let Some(new_filename) = rewrite_playthrough_id(&backup.backup_filename, recycle_bin.id) {
                            self.catalog
                                .update_backup_playthrough(recycle_bin.id, &new_filename, &backup.file_hash)?;
                        }
                    }
                    logger::warn(
                        "PLAYTHROUGHS",
                        "Archive file not renamed",
                        Some(&format!("{}: {}", backup.backup_filename, e)),
                    );
                    report.failed.push(MoveFailure {
                        file_hash: backup.file_hash,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Copy a backup over the given save slot in the game's save directory.
    pub fn restore(&self, file_hash: &str, slot: &str) -> BackupResult<PathBuf> {
        let backup = self
            .catalog
            .get_backup_by_hash(file_hash)?
            .ok_or_else(|| DatabaseError::NotFound(format!("backup {}", file_hash)))?;
        Ok(self.store.restore(&backup.backup_filename, slot)?)
    }

    fn reassign(&mut self, file_hash: &str, target: i64) -> BackupResult<String> {
        let backup = self
            .catalog
            .get_backup_by_hash(file_hash)?
            .ok_or_else(|| DatabaseError::NotFound(format!("backup {}", file_hash)))?;
        if backup.playthrough_id == target {
            return Ok(backup.backup_filename);
        }

        let new_filename = self.store.rename_for_playthrough(&backup.backup_filename, target)?;
        if let Err(e) = self.catalog.update_backup_playthrough(target, &new_filename, file_hash) {
            // put the file back so name and owner still agree
            if let Err(undo) = self.store.rename(&new_filename, &backup.backup_filename) {
                logger::error("PLAYTHROUGHS", "Failed to undo rename", Some(&undo.to_string()));
            }
            return Err(e.into());
        }
        Ok(new_filename)
    }
}
