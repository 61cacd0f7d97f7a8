use chrono::{DateTime, Local, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::database::schema::{DEFAULT_BRANCH, RECYCLE_BIN_NAME};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playthrough {
    pub id: i64,
    pub name: String,
    pub notes: String,
}

impl Playthrough {
    pub(crate) const COLUMNS: &'static str = "id, name, notes";

    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            notes: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        })
    }

    pub fn is_recycle_bin(&self) -> bool {
        self.name == RECYCLE_BIN_NAME
    }
}

/// Result of [`crate::database::BackupCatalog::save_playthrough`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaythroughSave {
    Created(i64),
    Updated(i64),
    /// Another playthrough already uses the name and overwrite was not requested.
    NameTaken,
}

impl PlaythroughSave {
    pub fn id(&self) -> Option<i64> {
        match self {
            PlaythroughSave::Created(id) | PlaythroughSave::Updated(id) => Some(*id),
            PlaythroughSave::NameTaken => None,
        }
    }
}

/// One archived save file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub playthrough_id: i64,
    pub x4_filename: String,
    pub x4_save_time: DateTime<Utc>,
    pub file_hash: String,
    pub backup_time: DateTime<Utc>,
    pub backup_filename: String,
    pub backup_duration: f64,
    pub game_version: String,
    pub original_game_version: String,
    pub playtime: f64,
    pub x4_start_type: String,
    pub character_name: String,
    pub company_name: String,
    pub money: f64,
    pub moded: bool,
    pub flag: bool,
    pub notes: String,
    pub delete: bool,
    pub branch: String,
}

impl Backup {
    pub(crate) const COLUMNS: &'static str = r#"playthrough_id, x4_filename, x4_save_time, file_hash,
        backup_time, backup_filename, backup_duration, game_version, original_game_version,
        playtime, x4_start_type, character_name, company_name, money, moded, flag, notes,
        "delete", branch"#;

    /// Build a backup from a row selected with [`Backup::COLUMNS`].
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            playthrough_id: row.get(0)?,
            x4_filename: text(row, 1)?,
            x4_save_time: timestamp(row, 2)?,
            file_hash: row.get(3)?,
            backup_time: timestamp(row, 4)?,
            backup_filename: text(row, 5)?,
            backup_duration: number(row, 6)?,
            game_version: text(row, 7)?,
            original_game_version: text(row, 8)?,
            playtime: number(row, 9)?,
            x4_start_type: text(row, 10)?,
            character_name: text(row, 11)?,
            company_name: text(row, 12)?,
            money: number(row, 13)?,
            moded: flag(row, 14)?,
            flag: flag(row, 15)?,
            notes: text(row, 16)?,
            delete: flag(row, 17)?,
            branch: row
                .get::<_, Option<String>>(18)?
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        })
    }

    pub fn save_time_local(&self) -> DateTime<Local> {
        self.x4_save_time.with_timezone(&Local)
    }

    /// Playtime in hours, the unit the game itself displays.
    pub fn playtime_hours(&self) -> f64 {
        self.playtime / 3600.0
    }
}

fn text(row: &Row, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

fn number(row: &Row, idx: usize) -> rusqlite::Result<f64> {
    Ok(row.get::<_, Option<f64>>(idx)?.unwrap_or(0.0))
}

fn flag(row: &Row, idx: usize) -> rusqlite::Result<bool> {
    Ok(row.get::<_, Option<bool>>(idx)?.unwrap_or(false))
}

fn timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let seconds = row.get::<_, Option<f64>>(idx)?.unwrap_or(0.0);
    Ok(from_unix_seconds(seconds))
}

pub(crate) fn from_unix_seconds(seconds: f64) -> DateTime<Utc> {
    let whole = seconds.trunc() as i64;
    let nanos = ((seconds - seconds.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(whole, nanos).single().unwrap_or_default()
}

pub(crate) fn to_unix_seconds(time: &DateTime<Utc>) -> f64 {
    time.timestamp() as f64 + f64::from(time.timestamp_subsec_nanos()) / 1e9
}

/// Everything needed to record a freshly archived save.
#[derive(Debug, Clone)]
pub struct NewBackup {
    pub playthrough_id: i64,
    pub x4_filename: String,
    pub x4_save_time: DateTime<Utc>,
    pub file_hash: String,
    pub backup_time: DateTime<Utc>,
    pub backup_filename: String,
    pub backup_duration: f64,
    pub metadata: crate::archive::SaveMetadata,
    pub flag: bool,
    pub notes: String,
    pub delete: bool,
    pub branch: String,
}

/// Outcome of inserting a backup row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupInsert {
    Inserted,
    /// A backup with the same fingerprint is already catalogued.
    Duplicate,
}

/// Columns a backup listing may be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortColumn {
    SaveTime,
    BackupTime,
    Playtime,
    Branch,
    CharacterName,
    CompanyName,
    Money,
    SaveFilename,
    BackupFilename,
    GameVersion,
    Flag,
}

impl SortColumn {
    /// The column name spliced into the ORDER BY clause. Only these fixed
    /// strings ever reach query text.
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortColumn::SaveTime => "x4_save_time",
            SortColumn::BackupTime => "backup_time",
            SortColumn::Playtime => "playtime",
            SortColumn::Branch => "branch",
            SortColumn::CharacterName => "character_name",
            SortColumn::CompanyName => "company_name",
            SortColumn::Money => "money",
            SortColumn::SaveFilename => "x4_filename",
            SortColumn::BackupFilename => "backup_filename",
            SortColumn::GameVersion => "game_version",
            SortColumn::Flag => "flag",
        }
    }

    /// Parse a user supplied column name; unknown names are rejected.
    pub fn parse(name: &str) -> Option<Self> {
        let column = match name.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "savetime" | "save_time" | "x4_save_time" => SortColumn::SaveTime,
            "backuptime" | "backup_time" => SortColumn::BackupTime,
            "playtime" | "hours" => SortColumn::Playtime,
            "branch" => SortColumn::Branch,
            "character" | "character_name" => SortColumn::CharacterName,
            "company" | "company_name" => SortColumn::CompanyName,
            "money" => SortColumn::Money,
            "save_filename" | "x4_filename" => SortColumn::SaveFilename,
            "backupfile" | "backup_filename" => SortColumn::BackupFilename,
            "version" | "game_version" => SortColumn::GameVersion,
            "flag" => SortColumn::Flag,
            _ => return None,
        };
        Some(column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub fn reversed(&self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSort {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl Default for BackupSort {
    fn default() -> Self {
        Self { column: SortColumn::SaveTime, direction: SortDirection::Asc }
    }
}

impl BackupSort {
    pub(crate) fn order_by(&self) -> String {
        // file_hash as tie breaker keeps listings stable
        format!(" ORDER BY {} {}, file_hash ASC", self.column.as_sql(), self.direction.as_sql())
    }
}

/// Which branches a backup listing includes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BranchFilter {
    #[default]
    All,
    Named(String),
}

/// Parameters for listing the backups of one playthrough.
#[derive(Debug, Clone, Default)]
pub struct BackupQuery {
    pub include_deleted: bool,
    pub branch: BranchFilter,
    pub sort: BackupSort,
}

/// Parameters for the old-backup query used by pruning.
#[derive(Debug, Clone)]
pub struct OldBackupQuery {
    pub older_than: DateTime<Utc>,
    /// The most recent `keep_latest` backups (by save time) are never returned.
    pub keep_latest: u32,
    pub include_quicksaves: bool,
    pub include_autosaves: bool,
    pub include_saves: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_column_parse_rejects_unknown() {
        assert_eq!(SortColumn::parse("Money"), Some(SortColumn::Money));
        assert_eq!(SortColumn::parse("save-time"), Some(SortColumn::SaveTime));
        assert_eq!(SortColumn::parse("money; DROP TABLE backups"), None);
    }

    #[test]
    fn test_order_by_uses_fixed_names() {
        let sort = BackupSort { column: SortColumn::Playtime, direction: SortDirection::Desc };
        assert_eq!(sort.order_by(), " ORDER BY playtime DESC, file_hash ASC");
    }

    #[test]
    fn test_unix_seconds_roundtrip_keeps_whole_seconds() {
        let time = from_unix_seconds(1_700_000_000.0);
        assert_eq!(time.timestamp(), 1_700_000_000);
        assert_eq!(to_unix_seconds(&time), 1_700_000_000.0);
    }
}
