use rusqlite::{params, OptionalExtension};

use crate::database::connection::{BackupCatalog, DatabaseError, DatabaseResult};
use crate::database::models::{Backup, Playthrough, PlaythroughSave};
use crate::database::schema::RECYCLE_BIN_NAME;
use crate::logger;

impl BackupCatalog {
    /// Create or update a playthrough.
    ///
    /// With `id` set the existing row is updated in place. Without it the row
    /// is looked up by name: a new name is inserted, an existing one is only
    /// updated when `overwrite` is true, otherwise [`PlaythroughSave::NameTaken`]
    /// is returned and nothing changes.
    pub fn save_playthrough(
        &mut self,
        name: &str,
        notes: &str,
        id: Option<i64>,
        overwrite: bool,
    ) -> DatabaseResult<PlaythroughSave> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DatabaseError::Invariant("playthrough name is empty".to_string()));
        }
        if name == RECYCLE_BIN_NAME {
            return Err(DatabaseError::Invariant(format!("'{}' is reserved", RECYCLE_BIN_NAME)));
        }

        let tx = self.conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row("SELECT id FROM playthroughs WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;

        let outcome = match (id, existing) {
            (Some(id), existing) => {
                let current = tx
                    .query_row(
                        &format!("SELECT {} FROM playthroughs WHERE id = ?1", Playthrough::COLUMNS),
                        [id],
                        Playthrough::from_row,
                    )
                    .optional()?
                    .ok_or_else(|| DatabaseError::NotFound(format!("playthrough {}", id)))?;
                if current.is_recycle_bin() {
                    return Err(DatabaseError::Invariant("the recycle bin cannot be edited".to_string()));
                }
                if matches!(existing, Some(other) if other != id) {
                    return Ok(PlaythroughSave::NameTaken);
                }
                tx.execute(
                    "UPDATE playthroughs SET name = ?1, notes = ?2 WHERE id = ?3",
                    params![name, notes, id],
                )?;
                PlaythroughSave::Updated(id)
            }
            (None, Some(existing)) if overwrite => {
                tx.execute("UPDATE playthroughs SET notes = ?1 WHERE id = ?2", params![notes, existing])?;
                PlaythroughSave::Updated(existing)
            }
            (None, Some(_)) => return Ok(PlaythroughSave::NameTaken),
            (None, None) => {
                match tx.execute("INSERT INTO playthroughs (name, notes) VALUES (?1, ?2)", params![name, notes]) {
                    Ok(_) => PlaythroughSave::Created(tx.last_insert_rowid()),
                    Err(e) if DatabaseError::is_unique_violation(&e) => return Ok(PlaythroughSave::NameTaken),
                    Err(e) => return Err(e.into()),
                }
            }
        };

        tx.commit()?;
        logger::info("CATALOG", &format!("Saved playthrough '{}'", name), Some(&format!("{:?}", outcome)));
        Ok(outcome)
    }

    /// Delete a playthrough, handing its backups to the recycle bin.
    ///
    /// Every moved backup is delete-marked and loses its importance flag.
    /// Returns the moved backups as they are now stored; their archive files
    /// still carry the old playthrough id and must be renamed by the caller.
    pub fn delete_playthrough(&mut self, playthrough_id: i64) -> DatabaseResult<Vec<Backup>> {
        let recycle_bin = self.recycle_bin()?;
        if playthrough_id == recycle_bin.id {
            return Err(DatabaseError::Invariant("the recycle bin cannot be deleted".to_string()));
        }

        let tx = self.conn.transaction()?;

        let deleted = tx.execute("DELETE FROM playthroughs WHERE id = ?1", [playthrough_id])?;
        if deleted == 0 {
            return Err(DatabaseError::NotFound(format!("playthrough {}", playthrough_id)));
        }

        let moved = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM backups WHERE playthrough_id = ?1 ORDER BY x4_save_time ASC, file_hash ASC",
                Backup::COLUMNS
            ))?;
            let rows = stmt.query_map([playthrough_id], Backup::from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        tx.execute(
            r#"UPDATE backups SET playthrough_id = ?1, "delete" = TRUE, flag = FALSE WHERE playthrough_id = ?2"#,
            params![recycle_bin.id, playthrough_id],
        )?;
        tx.commit()?;

        logger::info(
            "CATALOG",
            &format!("Deleted playthrough {}", playthrough_id),
            Some(&format!("{} backups moved to the recycle bin", moved.len())),
        );

        Ok(moved
            .into_iter()
            .map(|mut backup| {
                backup.playthrough_id = recycle_bin.id;
                backup.delete = true;
                backup.flag = false;
                backup
            })
            .collect())
    }

    pub fn get_playthrough_by_id(&self, id: i64) -> DatabaseResult<Option<Playthrough>> {
        let playthrough = self
            .conn
            .query_row(
                &format!("SELECT {} FROM playthroughs WHERE id = ?1", Playthrough::COLUMNS),
                [id],
                Playthrough::from_row,
            )
            .optional()?;
        Ok(playthrough)
    }

    pub fn get_playthrough_by_name(&self, name: &str) -> DatabaseResult<Option<Playthrough>> {
        let playthrough = self
            .conn
            .query_row(
                &format!("SELECT {} FROM playthroughs WHERE name = ?1", Playthrough::COLUMNS),
                [name],
                Playthrough::from_row,
            )
            .optional()?;
        Ok(playthrough)
    }

    /// All playthroughs, recycle bin first, the rest by name ignoring case.
    pub fn get_playthroughs(&self) -> DatabaseResult<Vec<Playthrough>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM playthroughs ORDER BY (name = ?1) DESC, name COLLATE NOCASE ASC",
            Playthrough::COLUMNS
        ))?;
        let playthroughs = stmt
            .query_map([RECYCLE_BIN_NAME], Playthrough::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(playthroughs)
    }

    pub fn get_playthrough_names(&self) -> DatabaseResult<Vec<String>> {
        Ok(self.get_playthroughs()?.into_iter().map(|p| p.name).collect())
    }

    pub fn recycle_bin(&self) -> DatabaseResult<Playthrough> {
        self.get_playthrough_by_name(RECYCLE_BIN_NAME)?
            .ok_or_else(|| DatabaseError::NotFound(RECYCLE_BIN_NAME.to_string()))
    }
}
