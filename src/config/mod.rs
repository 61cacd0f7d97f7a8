//! Application settings.
//!
//! Settings live in a JSON file grouped into general paths (`app`) and backup
//! policy (`backup`). Background work never holds the live settings; it gets a
//! plain snapshot through [`AppSettings::scheduler_settings`] or
//! [`AppSettings::retention_config`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::auto_backup::retention::RetentionConfig;
use crate::auto_backup::SchedulerSettings;
use crate::logger;

/// Current settings-file format version.
pub const SETTINGS_VERSION: u32 = 3;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Settings file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings format error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: GeneralSettings,
    #[serde(default)]
    pub backup: BackupSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralSettings {
    #[serde(default = "AppPaths::database_file")]
    pub db_path: PathBuf,
    #[serde(default = "AppPaths::backup_directory")]
    pub backup_path: PathBuf,
    #[serde(default)]
    pub save_path: PathBuf,
    /// Only present in version 1 files, where the poll interval lived here.
    #[serde(default, skip_serializing)]
    backup_frequency_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSettings {
    #[serde(default = "default_frequency")]
    pub backup_frequency_seconds: u64,
    #[serde(default = "default_old_days")]
    pub delete_old_days: u32,
    #[serde(default = "default_keep_last")]
    pub do_not_delete_last: u32,
    #[serde(default)]
    pub delete_quicksaves: bool,
    #[serde(default)]
    pub delete_autosaves: bool,
    #[serde(default)]
    pub delete_saves: bool,
    #[serde(default)]
    pub prune_mark_deletion: bool,
    #[serde(default)]
    pub prune_delete: bool,
}

fn default_version() -> u32 {
    1
}

fn default_frequency() -> u64 {
    300
}

fn default_old_days() -> u32 {
    30
}

fn default_keep_last() -> u32 {
    5
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            db_path: AppPaths::database_file(),
            backup_path: AppPaths::backup_directory(),
            save_path: PathBuf::new(),
            backup_frequency_seconds: None,
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            backup_frequency_seconds: default_frequency(),
            delete_old_days: default_old_days(),
            do_not_delete_last: default_keep_last(),
            delete_quicksaves: false,
            delete_autosaves: false,
            delete_saves: false,
            prune_mark_deletion: false,
            prune_delete: false,
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            app: GeneralSettings::default(),
            backup: BackupSettings::default(),
        }
    }
}

impl AppSettings {
    /// Read, migrate and validate a settings file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut settings: AppSettings = serde_json::from_str(&raw)?;
        if settings.migrate() {
            logger::info(
                "CONFIG",
                &format!("Settings upgraded to version {}", SETTINGS_VERSION),
                Some(&path.display().to_string()),
            );
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Load the settings file, writing a default one first if it doesn't exist.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            let settings = AppSettings::default();
            settings.save(path)?;
            logger::info("CONFIG", "Created default settings", Some(&path.display().to_string()));
            std::fs::create_dir_all(&settings.app.backup_path)?;
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Bring an older settings layout up to [`SETTINGS_VERSION`].
    /// Returns true if anything changed.
    fn migrate(&mut self) -> bool {
        let start = self.version;

        if self.version == 1 {
            // the poll interval moved from the app group to the backup group
            if let Some(seconds) = self.app.backup_frequency_seconds.take() {
                self.backup.backup_frequency_seconds = seconds;
            }
            self.version = 2;
        }

        if self.version == 2 {
            // keep-last and the startup prune toggles were introduced here;
            // serde defaults have already filled them in
            self.version = 3;
        }

        self.version != start
    }

    /// An empty `save_path` is allowed here: a fresh install has none yet, and
    /// only the scheduler needs it.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.app.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database path is empty".to_string()));
        }
        if self.app.backup_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("backup path is empty".to_string()));
        }
        if self.backup.backup_frequency_seconds == 0 {
            return Err(ConfigError::Invalid(
                "backup frequency must be at least one second".to_string(),
            ));
        }
        if self.backup.delete_old_days == 0 {
            return Err(ConfigError::Invalid(
                "old backup age must be at least one day".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            db_path: self.app.db_path.clone(),
            backup_path: self.app.backup_path.clone(),
            save_path: self.app.save_path.clone(),
            poll_interval_seconds: self.backup.backup_frequency_seconds,
            ..SchedulerSettings::default()
        }
    }

    pub fn retention_config(&self) -> RetentionConfig {
        RetentionConfig {
            old_backup_days: self.backup.delete_old_days,
            keep_latest: self.backup.do_not_delete_last,
            delete_quicksaves: self.backup.delete_quicksaves,
            delete_autosaves: self.backup.delete_autosaves,
            delete_saves: self.backup.delete_saves,
        }
    }
}

// Application path management
pub struct AppPaths;

impl AppPaths {
    pub fn default_app_data_dir() -> PathBuf {
        if cfg!(target_os = "windows") {
            // %APPDATA%/SaveWarden
            std::env::var("APPDATA")
                .map(|app_data| PathBuf::from(app_data).join("SaveWarden"))
                .unwrap_or_else(|_| PathBuf::from("./data"))
        } else if cfg!(target_os = "macos") {
            // ~/Library/Application Support/SaveWarden
            std::env::var("HOME")
                .map(|home| PathBuf::from(home)
                     .join("Library")
                     .join("Application Support")
                     .join("SaveWarden"))
                .unwrap_or_else(|_| PathBuf::from("./data"))
        } else {
            // Linux: ~/.local/share/save-warden
            std::env::var("HOME")
                .map(|home| PathBuf::from(home)
                     .join(".local")
                     .join("share")
                     .join("save-warden"))
                .unwrap_or_else(|_| PathBuf::from("./data"))
        }
    }

    pub fn default_config_dir() -> PathBuf {
        if cfg!(target_os = "linux") {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config").join("save-warden"))
                .unwrap_or_else(|_| PathBuf::from("./config"))
        } else {
            Self::default_app_data_dir()
        }
    }

    pub fn settings_file() -> PathBuf {
        Self::default_config_dir().join("config.json")
    }

    pub fn database_file() -> PathBuf {
        Self::default_config_dir().join("save_warden.db")
    }

    pub fn backup_directory() -> PathBuf {
        Self::default_app_data_dir().join("Backups")
    }
}
