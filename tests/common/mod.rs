// Shared fixtures for the integration tests

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use save_warden_lib::archive::{BackupStore, SaveMetadata};
use save_warden_lib::auto_backup::SchedulerSettings;
use save_warden_lib::database::{BackupCatalog, NewBackup};
use tempfile::TempDir;

pub struct Fixture {
    pub temp_dir: TempDir,
    pub settings: SchedulerSettings,
    pub playthrough_id: i64,
}

impl Fixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let save_path = temp_dir.path().join("save");
        let backup_path = temp_dir.path().join("backups");
        std::fs::create_dir_all(&save_path).unwrap();
        std::fs::create_dir_all(&backup_path).unwrap();

        let settings = SchedulerSettings {
            db_path: temp_dir.path().join("catalog.db"),
            backup_path,
            save_path,
            poll_interval_seconds: 1,
            tick: Duration::from_millis(10),
        };

        let mut catalog = BackupCatalog::open(&settings.db_path).expect("Failed to open catalog");
        let playthrough_id = catalog
            .save_playthrough("Test Run", "", None, false)
            .unwrap()
            .id()
            .unwrap();

        Self { temp_dir, settings, playthrough_id }
    }

    pub fn catalog(&self) -> BackupCatalog {
        BackupCatalog::open(&self.settings.db_path).expect("Failed to open catalog")
    }

    pub fn store(&self) -> BackupStore {
        self.settings.store()
    }

    pub fn write_save(&self, name: &str, xml: &str) -> PathBuf {
        let path = self.settings.save_path.join(name);
        write_gz(&path, xml);
        path
    }

    /// Catalogue a backup directly and create its archive file.
    pub fn seed_backup(&self, playthrough_id: i64, hash: &str, x4_filename: &str, saved: DateTime<Utc>) -> String {
        let backup_filename = format!("id{}_{}.xml.gz", playthrough_id, hash);
        self.seed_backup_named(playthrough_id, hash, &backup_filename, x4_filename, saved)
    }

    /// Like `seed_backup`, with the archive filename chosen by the caller.
    pub fn seed_backup_named(
        &self,
        playthrough_id: i64,
        hash: &str,
        backup_filename: &str,
        x4_filename: &str,
        saved: DateTime<Utc>,
    ) -> String {
        let backup_filename = backup_filename.to_string();
        std::fs::write(self.settings.backup_path.join(&backup_filename), hash.as_bytes()).unwrap();

        let mut catalog = self.catalog();
        catalog
            .add_backup(&NewBackup {
                playthrough_id,
                x4_filename: x4_filename.to_string(),
                x4_save_time: saved,
                file_hash: hash.to_string(),
                backup_time: Utc::now(),
                backup_filename: backup_filename.clone(),
                backup_duration: 0.1,
                metadata: SaveMetadata::default(),
                flag: false,
                notes: String::new(),
                delete: false,
                branch: String::new(),
            })
            .unwrap();
        backup_filename
    }
}

pub fn write_gz(path: &Path, xml: &str) {
    let mut encoder = GzEncoder::new(std::fs::File::create(path).unwrap(), Compression::fast());
    encoder.write_all(xml.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

/// A small save document; different arguments give different bytes.
pub fn save_xml(player: &str, money: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<savegame>
  <info>
    <save name="{player}" date="1700000000"/>
    <game version="7.0" build="123" modified="false" time="36000" start="Scenario"/>
    <player name="{player}" money="{money}"/>
  </info>
  <universe/>
</savegame>"#
    )
}

/// Header elements followed by roughly `padding_bytes` of unrelated elements.
/// The body after `<info/>` is not well-formed, so only a parser that stops at
/// the header can read this document.
pub fn padded_save_xml(padding_bytes: usize) -> String {
    let mut xml = String::with_capacity(padding_bytes + 512);
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?><savegame>"#);
    xml.push_str(r#"<game version="7.0" build="123" modified="false" time="36000" start="Scenario"/>"#);
    xml.push_str(r#"<player name="Trader" money="50000"/>"#);
    xml.push_str("<info/>");
    xml.push_str("<a></b>");
    xml.push_str("<universe>");
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut i = 0u64;
    while xml.len() < padding_bytes {
        // varying attribute values keep the gzip output large
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        xml.push_str(&format!(r#"<component id="{}" code="{:016x}"/>"#, i, seed));
        i += 1;
    }
    xml.push_str("</universe></savegame>");
    xml
}
