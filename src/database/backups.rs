use rusqlite::{params, params_from_iter, OptionalExtension, Transaction};

use crate::archive::SaveKind;
use crate::database::connection::{BackupCatalog, DatabaseError, DatabaseResult};
use crate::database::models::{
    to_unix_seconds, Backup, BackupInsert, BackupQuery, BackupSort, BranchFilter, NewBackup, OldBackupQuery,
};
use crate::database::schema::DEFAULT_BRANCH;
use crate::logger;

/// User-editable fields of a backup, written together.
#[derive(Debug, Clone)]
pub struct BackupEdit {
    pub file_hash: String,
    pub flag: bool,
    pub notes: String,
    pub branch: String,
    pub delete: bool,
}

impl BackupCatalog {
    pub fn backup_exists(&self, file_hash: &str) -> DatabaseResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM backups WHERE file_hash = ?1)",
            [file_hash],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Record a new backup. A fingerprint that is already catalogued is not an
    /// error: the insert is skipped and [`BackupInsert::Duplicate`] returned.
    pub fn add_backup(&mut self, backup: &NewBackup) -> DatabaseResult<BackupInsert> {
        if backup.flag && backup.delete {
            return Err(DatabaseError::Invariant("a flagged backup cannot be marked for deletion".to_string()));
        }
        let recycle_bin = self.recycle_bin()?;
        if backup.playthrough_id == recycle_bin.id && !backup.delete {
            return Err(DatabaseError::Invariant(
                "backups in the recycle bin must be marked for deletion".to_string(),
            ));
        }

        let branch = if backup.branch.trim().is_empty() { DEFAULT_BRANCH } else { backup.branch.trim() };
        let meta = &backup.metadata;

        let tx = self.conn.transaction()?;
        let result = tx.execute(
            &format!(
                "INSERT INTO backups ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                Backup::COLUMNS
            ),
            params![
                backup.playthrough_id,
                backup.x4_filename,
                to_unix_seconds(&backup.x4_save_time),
                backup.file_hash,
                to_unix_seconds(&backup.backup_time),
                backup.backup_filename,
                backup.backup_duration,
                meta.game_version,
                meta.original_game_version,
                meta.playtime,
                meta.start_type,
                meta.character_name,
                meta.company_name,
                meta.money,
                meta.modified,
                backup.flag,
                backup.notes,
                backup.delete,
                branch,
            ],
        );

        match result {
            Ok(_) => {
                tx.commit()?;
                logger::debug("CATALOG", "Backup recorded", Some(&backup.backup_filename));
                Ok(BackupInsert::Inserted)
            }
            Err(e) if DatabaseError::is_unique_violation(&e) => {
                logger::debug("CATALOG", "Duplicate fingerprint ignored", Some(&backup.file_hash));
                Ok(BackupInsert::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_backup_by_hash(&self, file_hash: &str) -> DatabaseResult<Option<Backup>> {
        Self::find_backup(&self.conn, file_hash)
    }

    fn find_backup(conn: &rusqlite::Connection, file_hash: &str) -> DatabaseResult<Option<Backup>> {
        let backup = conn
            .query_row(
                &format!("SELECT {} FROM backups WHERE file_hash = ?1", Backup::COLUMNS),
                [file_hash],
                Backup::from_row,
            )
            .optional()?;
        Ok(backup)
    }

    fn require_backup(tx: &Transaction, file_hash: &str) -> DatabaseResult<Backup> {
        Self::find_backup(tx, file_hash)?.ok_or_else(|| DatabaseError::NotFound(format!("backup {}", file_hash)))
    }

    /// Backups of one playthrough, filtered and sorted as requested.
    pub fn get_backups(&self, playthrough_id: i64, query: &BackupQuery) -> DatabaseResult<Vec<Backup>> {
        let mut sql = format!("SELECT {} FROM backups WHERE playthrough_id = ?1", Backup::COLUMNS);
        if !query.include_deleted {
            sql.push_str(r#" AND COALESCE("delete", 0) = 0"#);
        }
        let mut values: Vec<rusqlite::types::Value> = vec![playthrough_id.into()];
        if let BranchFilter::Named(branch) = &query.branch {
            sql.push_str(" AND branch = ?2");
            values.push(branch.clone().into());
        }
        sql.push_str(&query.sort.order_by());

        let mut stmt = self.conn.prepare(&sql)?;
        let backups = stmt
            .query_map(params_from_iter(values), Backup::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(backups)
    }

    /// Every delete-marked backup across all playthroughs.
    pub fn get_backups_to_delete(&self, sort: BackupSort) -> DatabaseResult<Vec<Backup>> {
        let sql = format!(
            r#"SELECT {} FROM backups WHERE COALESCE("delete", 0) = 1{}"#,
            Backup::COLUMNS,
            sort.order_by()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let backups = stmt.query_map([], Backup::from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(backups)
    }

    /// Fingerprints of the `count` most recent backups by save time.
    pub fn get_latest_backups(&self, count: u32) -> DatabaseResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_hash FROM backups ORDER BY x4_save_time DESC, file_hash ASC LIMIT ?1")?;
        let hashes = stmt
            .query_map([count], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hashes)
    }

    /// Backups old enough to prune: saved before the cutoff, not flagged, not
    /// already marked, outside the latest `keep_latest`, and belonging to a
    /// save family whose deletion is enabled.
    pub fn get_old_backups(&self, query: &OldBackupQuery) -> DatabaseResult<Vec<Backup>> {
        let patterns: Vec<String> = SaveKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                SaveKind::Quicksave => query.include_quicksaves,
                SaveKind::Autosave => query.include_autosaves,
                SaveKind::Save => query.include_saves,
            })
            .map(|kind| format!("{}*", kind.prefix()))
            .collect();
        if patterns.is_empty() {
            return Ok(Vec::new());
        }

        let family_clause = (0..patterns.len())
            .map(|i| format!("x4_filename GLOB ?{}", i + 3))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            r#"SELECT {} FROM backups
               WHERE x4_save_time < ?1
                 AND COALESCE(flag, 0) = 0
                 AND COALESCE("delete", 0) = 0
                 AND file_hash NOT IN (
                     SELECT file_hash FROM backups ORDER BY x4_save_time DESC, file_hash ASC LIMIT ?2
                 )
                 AND ({})
               ORDER BY x4_save_time ASC, file_hash ASC"#,
            Backup::COLUMNS,
            family_clause
        );

        let mut values: Vec<rusqlite::types::Value> =
            vec![to_unix_seconds(&query.older_than).into(), i64::from(query.keep_latest).into()];
        values.extend(patterns.into_iter().map(rusqlite::types::Value::from));

        let mut stmt = self.conn.prepare(&sql)?;
        let backups = stmt
            .query_map(params_from_iter(values), Backup::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(backups)
    }

    /// Delete-mark a batch of backups in one transaction. Flagged and already
    /// marked rows are left untouched. Returns how many rows were marked.
    pub fn mark_for_deletion(&mut self, file_hashes: &[String]) -> DatabaseResult<usize> {
        let tx = self.conn.transaction()?;
        let mut marked = 0;
        {
            let mut stmt = tx.prepare(
                r#"UPDATE backups SET "delete" = TRUE
                   WHERE file_hash = ?1 AND COALESCE(flag, 0) = 0 AND COALESCE("delete", 0) = 0"#,
            )?;
            for hash in file_hashes {
                marked += stmt.execute([hash])?;
            }
        }
        tx.commit()?;
        Ok(marked)
    }

    pub fn backup_set_delete(&mut self, file_hash: &str) -> DatabaseResult<()> {
        let tx = self.conn.transaction()?;
        let backup = Self::require_backup(&tx, file_hash)?;
        if backup.flag {
            return Err(DatabaseError::Invariant(format!(
                "backup {} is flagged and cannot be marked for deletion",
                backup.backup_filename
            )));
        }
        tx.execute(r#"UPDATE backups SET "delete" = TRUE WHERE file_hash = ?1"#, [file_hash])?;
        tx.commit()?;
        Ok(())
    }

    pub fn backup_unset_delete(&mut self, file_hash: &str) -> DatabaseResult<()> {
        let recycle_bin = self.recycle_bin()?;
        let tx = self.conn.transaction()?;
        let backup = Self::require_backup(&tx, file_hash)?;
        if backup.playthrough_id == recycle_bin.id {
            return Err(DatabaseError::Invariant(format!(
                "backup {} is in the recycle bin; move it to a playthrough first",
                backup.backup_filename
            )));
        }
        tx.execute(r#"UPDATE backups SET "delete" = FALSE WHERE file_hash = ?1"#, [file_hash])?;
        tx.commit()?;
        Ok(())
    }

    /// Set or clear the importance flag. Flagging a delete-marked backup
    /// clears the mark, unless the backup sits in the recycle bin.
    pub fn update_backup_flag(&mut self, flag: bool, file_hash: &str) -> DatabaseResult<()> {
        let recycle_bin = self.recycle_bin()?;
        let tx = self.conn.transaction()?;
        let backup = Self::require_backup(&tx, file_hash)?;
        let delete = Self::resolve_delete_mark(&backup, flag, backup.delete, recycle_bin.id)?;
        tx.execute(
            r#"UPDATE backups SET flag = ?1, "delete" = ?2 WHERE file_hash = ?3"#,
            params![flag, delete, file_hash],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Replace flag, notes and branch in one write.
    pub fn update_backup_options(
        &mut self,
        flag: bool,
        notes: &str,
        branch: &str,
        file_hash: &str,
    ) -> DatabaseResult<()> {
        let current = self
            .get_backup_by_hash(file_hash)?
            .ok_or_else(|| DatabaseError::NotFound(format!("backup {}", file_hash)))?;
        let delete = current.delete && !flag;
        self.save_backup(&BackupEdit {
            file_hash: file_hash.to_string(),
            flag,
            notes: notes.to_string(),
            branch: branch.to_string(),
            delete,
        })
    }

    /// Write every editable field of a backup at once.
    pub fn save_backup(&mut self, edit: &BackupEdit) -> DatabaseResult<()> {
        if edit.flag && edit.delete {
            return Err(DatabaseError::Invariant("a flagged backup cannot be marked for deletion".to_string()));
        }
        let recycle_bin = self.recycle_bin()?;
        let tx = self.conn.transaction()?;
        let backup = Self::require_backup(&tx, &edit.file_hash)?;
        let delete = Self::resolve_delete_mark(&backup, edit.flag, edit.delete, recycle_bin.id)?;
        let branch = if edit.branch.trim().is_empty() { DEFAULT_BRANCH } else { edit.branch.trim() };

        tx.execute(
            r#"UPDATE backups SET flag = ?1, notes = ?2, branch = ?3, "delete" = ?4 WHERE file_hash = ?5"#,
            params![edit.flag, edit.notes, branch, delete, edit.file_hash],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn resolve_delete_mark(backup: &Backup, flag: bool, delete: bool, recycle_bin_id: i64) -> DatabaseResult<bool> {
        if backup.playthrough_id == recycle_bin_id {
            if flag {
                return Err(DatabaseError::Invariant(format!(
                    "backup {} is in the recycle bin and cannot be flagged",
                    backup.backup_filename
                )));
            }
            if !delete {
                return Err(DatabaseError::Invariant(format!(
                    "backup {} is in the recycle bin; move it to a playthrough first",
                    backup.backup_filename
                )));
            }
            return Ok(true);
        }
        // the flag wins over a pending delete mark
        Ok(delete && !flag)
    }

    pub fn set_branch(&mut self, branch: &str, file_hash: &str) -> DatabaseResult<()> {
        let branch = if branch.trim().is_empty() { DEFAULT_BRANCH } else { branch.trim() };
        let tx = self.conn.transaction()?;
        let updated = tx.execute("UPDATE backups SET branch = ?1 WHERE file_hash = ?2", params![branch, file_hash])?;
        if updated == 0 {
            return Err(DatabaseError::NotFound(format!("backup {}", file_hash)));
        }
        tx.commit()?;
        Ok(())
    }

    /// Distinct branches used in a playthrough, `main` first.
    pub fn get_branches(&self, playthrough_id: i64) -> DatabaseResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT COALESCE(NULLIF(branch, ''), ?2) FROM backups WHERE playthrough_id = ?1",
        )?;
        let mut branches = stmt
            .query_map(params![playthrough_id, DEFAULT_BRANCH], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        branches.sort_by_key(|b| (b != DEFAULT_BRANCH, b.to_lowercase()));
        Ok(branches)
    }

    /// Reassign a backup whose archive file has already been renamed.
    ///
    /// Moving into the recycle bin delete-marks the backup and clears its flag.
    pub fn update_backup_playthrough(
        &mut self,
        playthrough_id: i64,
        backup_filename: &str,
        file_hash: &str,
    ) -> DatabaseResult<()> {
        let recycle_bin = self.recycle_bin()?;
        let tx = self.conn.transaction()?;
        Self::require_backup(&tx, file_hash)?;
        let target_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM playthroughs WHERE id = ?1)",
            [playthrough_id],
            |row| row.get(0),
        )?;
        if !target_exists {
            return Err(DatabaseError::NotFound(format!("playthrough {}", playthrough_id)));
        }

        if playthrough_id == recycle_bin.id {
            tx.execute(
                r#"UPDATE backups SET playthrough_id = ?1, backup_filename = ?2, "delete" = TRUE, flag = FALSE
                   WHERE file_hash = ?3"#,
                params![playthrough_id, backup_filename, file_hash],
            )?;
        } else {
            tx.execute(
                "UPDATE backups SET playthrough_id = ?1, backup_filename = ?2 WHERE file_hash = ?3",
                params![playthrough_id, backup_filename, file_hash],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop a backup row. Returns false if no row matched.
    pub fn delete_backup(&mut self, file_hash: &str) -> DatabaseResult<bool> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute("DELETE FROM backups WHERE file_hash = ?1", [file_hash])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Drop a backup row and its archive file together.
    ///
    /// The row is deleted inside a transaction that only commits once
    /// `remove_file` succeeds, so neither is removed without the other.
    pub fn delete_backup_with<E, F>(&mut self, file_hash: &str, remove_file: F) -> Result<bool, E>
    where
        E: From<DatabaseError>,
        F: FnOnce(&Backup) -> Result<(), E>,
    {
        let tx = self.conn.transaction().map_err(DatabaseError::from)?;
        let Some(backup) = Self::find_backup(&tx, file_hash)? else {
            return Ok(false);
        };
        tx.execute("DELETE FROM backups WHERE file_hash = ?1", [file_hash])
            .map_err(DatabaseError::from)?;
        remove_file(&backup)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(true)
    }

    pub fn count_backups(&self) -> DatabaseResult<i64> {
        let count = self.conn.query_row("SELECT count(*) FROM backups", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::SaveMetadata;
    use crate::database::models::{SortColumn, SortDirection};
    use chrono::{Duration, Utc};

    fn new_backup(playthrough_id: i64, hash: &str, filename: &str, days_old: i64) -> NewBackup {
        let now = Utc::now();
        NewBackup {
            playthrough_id,
            x4_filename: filename.to_string(),
            x4_save_time: now - Duration::days(days_old),
            file_hash: hash.to_string(),
            backup_time: now,
            backup_filename: format!("id{}_{}.xml.gz", playthrough_id, hash),
            backup_duration: 0.5,
            metadata: SaveMetadata { money: 10.0, ..SaveMetadata::default() },
            flag: false,
            notes: String::new(),
            delete: false,
            branch: String::new(),
        }
    }

    fn catalog_with_playthrough() -> (BackupCatalog, i64) {
        let mut catalog = BackupCatalog::open_in_memory().unwrap();
        let id = catalog.save_playthrough("Run", "", None, false).unwrap().id().unwrap();
        (catalog, id)
    }

    #[test]
    fn test_duplicate_fingerprint_is_not_an_error() {
        let (mut catalog, id) = catalog_with_playthrough();
        assert_eq!(catalog.add_backup(&new_backup(id, "h1", "save_001.xml.gz", 0)).unwrap(), BackupInsert::Inserted);
        assert_eq!(catalog.add_backup(&new_backup(id, "h1", "quicksave.xml.gz", 0)).unwrap(), BackupInsert::Duplicate);
        assert_eq!(catalog.count_backups().unwrap(), 1);
        assert_eq!(catalog.get_backup_by_hash("h1").unwrap().unwrap().branch, DEFAULT_BRANCH);
    }

    #[test]
    fn test_flagged_backup_cannot_be_marked() {
        let (mut catalog, id) = catalog_with_playthrough();
        catalog.add_backup(&new_backup(id, "h1", "save_001.xml.gz", 0)).unwrap();
        catalog.update_backup_flag(true, "h1").unwrap();

        assert!(matches!(catalog.backup_set_delete("h1"), Err(DatabaseError::Invariant(_))));
        assert_eq!(catalog.mark_for_deletion(&["h1".to_string()]).unwrap(), 0);
        assert!(!catalog.get_backup_by_hash("h1").unwrap().unwrap().delete);
    }

    #[test]
    fn test_flagging_clears_pending_delete_mark() {
        let (mut catalog, id) = catalog_with_playthrough();
        catalog.add_backup(&new_backup(id, "h1", "save_001.xml.gz", 0)).unwrap();
        catalog.backup_set_delete("h1").unwrap();
        catalog.update_backup_flag(true, "h1").unwrap();

        let backup = catalog.get_backup_by_hash("h1").unwrap().unwrap();
        assert!(backup.flag);
        assert!(!backup.delete);
    }

    #[test]
    fn test_recycle_bin_backup_cannot_be_unmarked() {
        let (mut catalog, _) = catalog_with_playthrough();
        let bin = catalog.recycle_bin().unwrap();
        let mut backup = new_backup(bin.id, "h1", "save_001.xml.gz", 0);
        assert!(matches!(catalog.add_backup(&backup), Err(DatabaseError::Invariant(_))));

        backup.delete = true;
        catalog.add_backup(&backup).unwrap();
        assert!(matches!(catalog.backup_unset_delete("h1"), Err(DatabaseError::Invariant(_))));
        assert!(matches!(catalog.update_backup_flag(true, "h1"), Err(DatabaseError::Invariant(_))));
    }

    #[test]
    fn test_listing_filters_and_sorts() {
        let (mut catalog, id) = catalog_with_playthrough();
        let mut a = new_backup(id, "a", "save_001.xml.gz", 3);
        a.metadata.money = 300.0;
        let mut b = new_backup(id, "b", "save_002.xml.gz", 2);
        b.metadata.money = 100.0;
        b.branch = "pirate".to_string();
        let c = new_backup(id, "c", "save_003.xml.gz", 1);
        for backup in [&a, &b, &c] {
            catalog.add_backup(backup).unwrap();
        }
        catalog.backup_set_delete("c").unwrap();

        let visible = catalog.get_backups(id, &BackupQuery::default()).unwrap();
        assert_eq!(visible.iter().map(|b| b.file_hash.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        let query = BackupQuery {
            include_deleted: true,
            sort: BackupSort { column: SortColumn::Money, direction: SortDirection::Desc },
            ..BackupQuery::default()
        };
        let all = catalog.get_backups(id, &query).unwrap();
        assert_eq!(all.iter().map(|b| b.file_hash.as_str()).collect::<Vec<_>>(), vec!["a", "b", "c"]);

        let query = BackupQuery { branch: BranchFilter::Named("pirate".to_string()), ..BackupQuery::default() };
        assert_eq!(catalog.get_backups(id, &query).unwrap().len(), 1);
        assert_eq!(catalog.get_branches(id).unwrap(), vec!["main", "pirate"]);
        assert_eq!(catalog.get_backups_to_delete(BackupSort::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_old_backups_respect_disabled_families() {
        let (mut catalog, id) = catalog_with_playthrough();
        catalog.add_backup(&new_backup(id, "q", "quicksave.xml.gz", 60)).unwrap();
        catalog.add_backup(&new_backup(id, "a", "autosave_01.xml.gz", 60)).unwrap();
        catalog.add_backup(&new_backup(id, "s", "save_001.xml.gz", 60)).unwrap();
        catalog.add_backup(&new_backup(id, "x", "renamed.xml.gz", 60)).unwrap();

        let query = OldBackupQuery {
            older_than: Utc::now() - Duration::days(30),
            keep_latest: 0,
            include_quicksaves: false,
            include_autosaves: true,
            include_saves: true,
        };
        let mut hashes: Vec<String> =
            catalog.get_old_backups(&query).unwrap().into_iter().map(|b| b.file_hash).collect();
        hashes.sort();
        assert_eq!(hashes, vec!["a", "s"]);
    }

    #[test]
    fn test_options_update_replaces_notes() {
        let (mut catalog, id) = catalog_with_playthrough();
        catalog.add_backup(&new_backup(id, "h1", "save_001.xml.gz", 0)).unwrap();
        catalog.update_backup_options(false, "first note", "side", "h1").unwrap();
        catalog.update_backup_options(true, "second", "", "h1").unwrap();

        let backup = catalog.get_backup_by_hash("h1").unwrap().unwrap();
        assert_eq!(backup.notes, "second");
        assert_eq!(backup.branch, DEFAULT_BRANCH);
        assert!(backup.flag);
    }

    #[test]
    fn test_delete_with_keeps_row_when_file_removal_fails() {
        let (mut catalog, id) = catalog_with_playthrough();
        catalog.add_backup(&new_backup(id, "h1", "save_001.xml.gz", 0)).unwrap();

        let result: Result<bool, DatabaseError> = catalog
            .delete_backup_with("h1", |_| Err(DatabaseError::Invariant("disk says no".to_string())));
        assert!(result.is_err());
        assert!(catalog.backup_exists("h1").unwrap());

        let removed: Result<bool, DatabaseError> = catalog.delete_backup_with("h1", |_| Ok(()));
        assert!(removed.unwrap());
        assert!(!catalog.backup_exists("h1").unwrap());
    }
}
