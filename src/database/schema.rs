use rusqlite::{Connection, Transaction};

use crate::database::connection::DatabaseResult;
use crate::logger;

pub const DATABASE_VERSION: u32 = 3;

/// Name of the reserved playthrough that collects backups whose owner was deleted.
pub const RECYCLE_BIN_NAME: &str = "__RECYCLE BIN__";
pub const RECYCLE_BIN_NOTES: &str = "All backups marked for deletion are listed here";

/// Branch assigned to backups that were never put on another branch.
pub const DEFAULT_BRANCH: &str = "main";

type Migration = fn(&Transaction) -> DatabaseResult<()>;

pub struct DatabaseSchema;

impl DatabaseSchema {
    /// Ordered migration steps. Step `i` upgrades version `i` to `i + 1`.
    const MIGRATIONS: [(&'static str, Migration); 3] = [
        ("create tables", Self::create_tables),
        ("delete mark and recycle bin", Self::add_delete_mark),
        ("backup branches", Self::add_branches),
    ];

    /// Run every step whose predecessor version matches the stored version.
    /// Each step commits together with its version bump.
    pub fn migrate(conn: &mut Connection) -> DatabaseResult<()> {
        Self::ensure_version_table(conn)?;

        loop {
            let current = Self::get_database_version(conn)?;
            if current >= DATABASE_VERSION {
                return Ok(());
            }

            let (label, step) = Self::MIGRATIONS[current as usize];
            logger::info(
                "DATABASE",
                &format!("Starting database migration from v{} to v{}", current, current + 1),
                Some(label),
            );

            let tx = conn.transaction()?;
            let result = step(&tx).and_then(|_| Self::set_database_version(&tx, current + 1));
            match result {
                Ok(()) => {
                    tx.commit()?;
                    logger::database::migration(current, current + 1, true);
                }
                Err(e) => {
                    logger::database::migration(current, current + 1, false);
                    logger::error("DATABASE", "Migration rolled back", Some(&e.to_string()));
                    return Err(e);
                }
            }
        }
    }

    fn create_tables(tx: &Transaction) -> DatabaseResult<()> {
        tx.execute(
            r#"
            CREATE TABLE IF NOT EXISTS playthroughs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                notes TEXT
            )
            "#,
            [],
        )?;
        logger::database::table_creation("playthroughs", true);

        tx.execute(
            r#"
            CREATE TABLE IF NOT EXISTS backups (
                playthrough_id INTEGER NOT NULL,
                x4_filename TEXT,
                x4_save_time TIMESTAMP,               -- unix seconds
                file_hash TEXT NOT NULL UNIQUE,       -- SHA-256 of the save file
                backup_time TIMESTAMP,                -- unix seconds
                backup_filename TEXT,
                backup_duration NUMERIC,
                game_version TEXT,
                original_game_version TEXT,
                playtime NUMERIC,
                x4_start_type TEXT,
                character_name TEXT,
                company_name TEXT,
                money NUMERIC,
                moded BOOL,
                flag BOOL,
                notes TEXT
            )
            "#,
            [],
        )?;
        logger::database::table_creation("backups", true);

        tx.execute(
            "CREATE INDEX IF NOT EXISTS idx_backups_playthrough_id ON backups(playthrough_id)",
            [],
        )?;
        tx.execute(
            "CREATE INDEX IF NOT EXISTS idx_backups_save_time ON backups(x4_save_time)",
            [],
        )?;
        Ok(())
    }

    fn add_delete_mark(tx: &Transaction) -> DatabaseResult<()> {
        tx.execute(r#"ALTER TABLE backups ADD COLUMN "delete" BOOL"#, [])?;
        tx.execute(r#"UPDATE backups SET "delete" = FALSE WHERE "delete" IS NULL"#, [])?;
        tx.execute(
            "INSERT OR IGNORE INTO playthroughs (name, notes) VALUES (?1, ?2)",
            [RECYCLE_BIN_NAME, RECYCLE_BIN_NOTES],
        )?;
        Ok(())
    }

    fn add_branches(tx: &Transaction) -> DatabaseResult<()> {
        tx.execute("ALTER TABLE backups ADD COLUMN branch TEXT", [])?;
        tx.execute(
            "UPDATE backups SET branch = ?1 WHERE branch IS NULL OR branch = ''",
            [DEFAULT_BRANCH],
        )?;
        Ok(())
    }

    fn ensure_version_table(conn: &Connection) -> DatabaseResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS db_version (version INTEGER PRIMARY KEY)",
            [],
        )?;
        Ok(())
    }

    pub fn get_database_version(conn: &Connection) -> DatabaseResult<u32> {
        let version: Option<u32> = conn
            .query_row("SELECT MAX(version) FROM db_version", [], |row| row.get(0))?;
        Ok(version.unwrap_or(0))
    }

    pub fn set_database_version(conn: &Connection, version: u32) -> DatabaseResult<()> {
        conn.execute("DELETE FROM db_version", [])?;
        conn.execute("INSERT INTO db_version (version) VALUES (?1)", [version])?;
        logger::debug("DATABASE", "Database version set", Some(&version.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        DatabaseSchema::migrate(&mut conn).unwrap();
        assert_eq!(DatabaseSchema::get_database_version(&conn).unwrap(), DATABASE_VERSION);

        let bins: i64 = conn
            .query_row(
                "SELECT count(*) FROM playthroughs WHERE name = ?1",
                [RECYCLE_BIN_NAME],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(bins, 1);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        DatabaseSchema::migrate(&mut conn).unwrap();
        DatabaseSchema::migrate(&mut conn).unwrap();
        assert_eq!(DatabaseSchema::get_database_version(&conn).unwrap(), DATABASE_VERSION);
    }

    #[test]
    fn test_version_one_rows_are_backfilled() {
        let mut conn = Connection::open_in_memory().unwrap();
        DatabaseSchema::ensure_version_table(&conn).unwrap();
        {
            let tx = conn.transaction().unwrap();
            DatabaseSchema::create_tables(&tx).unwrap();
            DatabaseSchema::set_database_version(&tx, 1).unwrap();
            tx.execute("INSERT INTO playthroughs (name, notes) VALUES ('Old Run', '')", []).unwrap();
            tx.execute(
                "INSERT INTO backups (playthrough_id, x4_filename, file_hash, flag) VALUES (1, 'save_001.xml.gz', 'abc', 0)",
                [],
            )
            .unwrap();
            tx.commit().unwrap();
        }

        DatabaseSchema::migrate(&mut conn).unwrap();

        let (delete, branch): (bool, String) = conn
            .query_row(
                r#"SELECT "delete", branch FROM backups WHERE file_hash = 'abc'"#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(!delete);
        assert_eq!(branch, DEFAULT_BRANCH);
    }
}
