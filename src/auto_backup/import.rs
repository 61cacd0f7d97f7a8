use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::{ArchivedFile, BackupStore, ContentHasher, SaveDocumentExtractor};
use crate::auto_backup::{BackupError, BackupResult};
use crate::database::{Backup, BackupCatalog, BackupInsert, NewBackup, DEFAULT_BRANCH};
use crate::logger;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Of the imported backups, those routed to the recycle bin because their
    /// embedded playthrough no longer exists.
    pub recycled: usize,
    pub already_catalogued: usize,
    pub failed: usize,
}

/// Catalogue every archived file whose fingerprint is unknown.
///
/// Walks the archive directory rather than the save directory. The owning
/// playthrough is read from the filename; files whose playthrough is gone go
/// to the recycle bin, delete-marked and renamed to carry the bin's id.
pub fn import_archive(store: &BackupStore, catalog: &mut BackupCatalog) -> BackupResult<ImportReport> {
    let archived = store.list_archived()?;
    let recycle_bin = catalog.recycle_bin()?;
    let live: HashSet<i64> = catalog.get_playthroughs()?.into_iter().map(|p| p.id).collect();
    let extractor = SaveDocumentExtractor::new(store.temp_dir());

    let mut report = ImportReport::default();
    for file in archived {
        match import_file(&file, store, catalog, &extractor, &live, recycle_bin.id) {
            Ok(None) => report.already_catalogued += 1,
            Ok(Some(recycled)) => {
                report.imported += 1;
                if recycled {
                    report.recycled += 1;
                }
            }
            Err(e) => {
                report.failed += 1;
                logger::warn("IMPORT", "Could not import archived file", Some(&format!("{}: {}", file.file_name, e)));
            }
        }
    }

    logger::info(
        "IMPORT",
        &format!("Imported {} archived files", report.imported),
        Some(&format!(
            "{} to recycle bin, {} already catalogued, {} failed",
            report.recycled, report.already_catalogued, report.failed
        )),
    );
    Ok(report)
}

/// `Ok(None)` when already catalogued, otherwise whether the file was recycled.
fn import_file(
    file: &ArchivedFile,
    store: &BackupStore,
    catalog: &mut BackupCatalog,
    extractor: &SaveDocumentExtractor,
    live: &HashSet<i64>,
    recycle_bin_id: i64,
) -> BackupResult<Option<bool>> {
    let hash = ContentHasher::digest_file(&file.path)?;
    if catalog.backup_exists(&hash)? {
        return Ok(None);
    }

    let metadata = extractor.extract(&file.path)?;

    let orphaned = file.playthrough_id == recycle_bin_id || !live.contains(&file.playthrough_id);
    let (playthrough_id, backup_filename) = if orphaned {
        (recycle_bin_id, store.rename_for_playthrough(&file.file_name, recycle_bin_id)?)
    } else {
        (file.playthrough_id, file.file_name.clone())
    };

    let backup = NewBackup {
        playthrough_id,
        x4_filename: file.file_name.clone(),
        x4_save_time: metadata.save_time.unwrap_or(file.modified),
        file_hash: hash,
        backup_time: file.modified,
        backup_filename,
        backup_duration: 0.0,
        metadata,
        flag: false,
        notes: String::new(),
        delete: orphaned,
        branch: DEFAULT_BRANCH.to_string(),
    };
    match catalog.add_backup(&backup)? {
        BackupInsert::Inserted => Ok(Some(orphaned)),
        BackupInsert::Duplicate => Ok(None),
    }
}

/// A save in the game's save directory and the backup holding its content, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub file_name: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    pub hash: String,
    pub backup: Option<Backup>,
}

/// List every candidate save with its fingerprint and catalogued backup.
pub fn inventory_saves(store: &BackupStore, catalog: &BackupCatalog) -> BackupResult<Vec<InventoryEntry>> {
    let mut inventory = Vec::new();
    for candidate in store.list_candidates()? {
        let hash = match ContentHasher::digest_file(&candidate.path) {
            Ok(hash) => hash,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(BackupError::Io(e)),
        };
        let backup = catalog.get_backup_by_hash(&hash)?;
        inventory.push(InventoryEntry {
            file_name: candidate.file_name,
            path: candidate.path,
            modified: candidate.modified,
            hash,
            backup,
        });
    }
    inventory.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(inventory)
}
