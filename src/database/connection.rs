use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

use crate::database::schema::DatabaseSchema;
use crate::logger;

pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation not allowed: {0}")]
    Invariant(String),
}

impl DatabaseError {
    /// True when SQLite rejected a write because of a UNIQUE constraint.
    pub fn is_unique_violation(error: &rusqlite::Error) -> bool {
        matches!(
            error,
            rusqlite::Error::SqliteFailure(e, _)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        )
    }
}

/// The durable record of every playthrough and backup.
///
/// A catalog owns a single SQLite connection. Connections are not shared
/// between threads: every background unit of work opens its own catalog.
pub struct BackupCatalog {
    pub(crate) conn: Connection,
    path: PathBuf,
}

impl BackupCatalog {
    /// Open (creating if needed) the catalog at `db_path` and bring its schema
    /// up to date.
    pub fn open<P: AsRef<Path>>(db_path: P) -> DatabaseResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = match Self::create_connection(&db_path) {
            Ok(conn) => conn,
            Err(e) => {
                logger::database::connection_error(&db_path, &e.to_string());
                return Err(e);
            }
        };

        let mut catalog = Self { conn, path: db_path };
        DatabaseSchema::migrate(&mut catalog.conn)?;
        logger::database::connection_success(&catalog.path);
        Ok(catalog)
    }

    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut catalog = Self { conn, path: PathBuf::from(":memory:") };
        DatabaseSchema::migrate(&mut catalog.conn)?;
        Ok(catalog)
    }

    fn create_connection(db_path: &Path) -> DatabaseResult<Connection> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        // Verify connection is working
        let _: i64 = conn.query_row("SELECT count(*) FROM sqlite_master;", [], |row| row.get(0))?;

        Ok(conn)
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> DatabaseResult<u32> {
        DatabaseSchema::get_database_version(&self.conn)
    }
}
