use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::{BackupStore, SaveKind};
use crate::auto_backup::{BackupError, BackupResult};
use crate::config::AppSettings;
use crate::database::{Backup, BackupCatalog, BackupSort, DatabaseResult, OldBackupQuery};
use crate::logger;

/// Pruning thresholds, snapshotted from settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Backups whose save time is older than this many days may be pruned.
    pub old_backup_days: u32,
    /// The most recent saves that are never pruned, whatever their age.
    pub keep_latest: u32,
    pub delete_quicksaves: bool,
    pub delete_autosaves: bool,
    pub delete_saves: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            old_backup_days: 30,
            keep_latest: 5,
            delete_quicksaves: false,
            delete_autosaves: false,
            delete_saves: false,
        }
    }
}

impl RetentionConfig {
    pub fn permits(&self, kind: SaveKind) -> bool {
        match kind {
            SaveKind::Quicksave => self.delete_quicksaves,
            SaveKind::Autosave => self.delete_autosaves,
            SaveKind::Save => self.delete_saves,
        }
    }

    /// Whether a save with this original filename may be deleted at all.
    /// Filenames outside the three save families never are.
    pub fn permits_filename(&self, x4_filename: &str) -> bool {
        SaveKind::classify(x4_filename).is_some_and(|kind| self.permits(kind))
    }

    /// Whether an already marked backup may be physically deleted. No toggle
    /// governs a filename outside the save families, so those always may.
    pub fn permits_sweep(&self, x4_filename: &str) -> bool {
        SaveKind::classify(x4_filename).map_or(true, |kind| self.permits(kind))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReport {
    /// Backups the old-backup query returned.
    pub candidates: usize,
    /// Backups whose delete mark was set by this run.
    pub marked: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub deleted: usize,
    /// Marked backups kept because their save family is not enabled for deletion.
    pub skipped: usize,
    /// Deleted rows whose archive file was already gone.
    pub missing_files: usize,
    /// Backups that could not be deleted; their rows and files are untouched.
    pub failed: usize,
}

/// Decides which backups may be pruned and carries out the two prune phases.
pub struct RetentionPolicy {
    config: RetentionConfig,
}

impl RetentionPolicy {
    pub fn new(config: RetentionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.config.old_backup_days))
    }

    pub fn old_backup_query(&self, now: DateTime<Utc>) -> OldBackupQuery {
        OldBackupQuery {
            older_than: self.cutoff(now),
            keep_latest: self.config.keep_latest,
            include_quicksaves: self.config.delete_quicksaves,
            include_autosaves: self.config.delete_autosaves,
            include_saves: self.config.delete_saves,
        }
    }

    /// Pure eligibility test. `latest` holds the fingerprints of the most
    /// recent `keep_latest` backups.
    pub fn is_eligible(&self, backup: &Backup, latest: &HashSet<String>, now: DateTime<Utc>) -> bool {
        !backup.flag
            && !backup.delete
            && !latest.contains(&backup.file_hash)
            && backup.x4_save_time < self.cutoff(now)
            && self.config.permits_filename(&backup.x4_filename)
    }

    /// Set the delete mark on every currently eligible backup.
    ///
    /// Already marked backups are not candidates, so running this again only
    /// marks backups that became eligible since.
    pub fn mark(&self, catalog: &mut BackupCatalog) -> DatabaseResult<MarkReport> {
        let now = Utc::now();
        let candidates = catalog.get_old_backups(&self.old_backup_query(now))?;
        let latest: HashSet<String> = catalog.get_latest_backups(self.config.keep_latest)?.into_iter().collect();

        let eligible: Vec<String> = candidates
            .iter()
            .filter(|backup| self.is_eligible(backup, &latest, now))
            .map(|backup| backup.file_hash.clone())
            .collect();
        let marked = catalog.mark_for_deletion(&eligible)?;

        logger::info(
            "RETENTION",
            &format!("Marked {} backups for deletion", marked),
            Some(&format!("{} candidates older than {} days", candidates.len(), self.config.old_backup_days)),
        );
        Ok(MarkReport { candidates: candidates.len(), marked })
    }

    /// Physically delete every marked backup whose save family currently
    /// permits deletion, removing its row and archive file together. Marked
    /// backups outside every family, such as imported orphans, are deleted too.
    pub fn sweep(&self, catalog: &mut BackupCatalog, store: &BackupStore) -> DatabaseResult<SweepReport> {
        let mut report = SweepReport::default();

        for backup in catalog.get_backups_to_delete(BackupSort::default())? {
            if !self.config.permits_sweep(&backup.x4_filename) {
                report.skipped += 1;
                continue;
            }

            let mut file_existed = true;
            let result: BackupResult<bool> = catalog.delete_backup_with(&backup.file_hash, |row| {
                file_existed = store.delete(&row.backup_filename)?;
                Ok(())
            });

            match result {
                Ok(true) => {
                    report.deleted += 1;
                    if !file_existed {
                        report.missing_files += 1;
                        logger::warn("RETENTION", "Archive file was already missing", Some(&backup.backup_filename));
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    logger::error("RETENTION", "Failed to delete backup", Some(&format!("{}: {}", backup.backup_filename, e)));
                }
            }
        }

        if report.skipped > 0 {
            logger::warn(
                "RETENTION",
                &format!("{} marked backups kept because their save type is not enabled for deletion", report.skipped),
                None,
            );
        }
        logger::info("RETENTION", &format!("Deleted {} backups", report.deleted), None);
        Ok(report)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupPruneReport {
    pub mark: Option<MarkReport>,
    pub sweep: Option<SweepReport>,
}

/// Run the prune phases enabled in settings, mark before sweep.
pub fn startup_prune(
    settings: &AppSettings,
    catalog: &mut BackupCatalog,
    store: &BackupStore,
) -> BackupResult<StartupPruneReport> {
    let policy = RetentionPolicy::new(settings.retention_config());
    let mut report = StartupPruneReport::default();

    if settings.backup.prune_mark_deletion {
        report.mark = Some(policy.mark(catalog)?);
    }
    if settings.backup.prune_delete {
        if !store.archive_dir().is_dir() {
            return Err(BackupError::Configuration(format!(
                "backup directory {} does not exist",
                store.archive_dir().display()
            )));
        }
        report.sweep = Some(policy.sweep(catalog, store)?);
    }
    Ok(report)
}
