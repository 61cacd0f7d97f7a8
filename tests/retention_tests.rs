// Integration tests for pruning: the old-backup query, mark and sweep

mod common;

use chrono::{Duration, Utc};
use common::{save_xml, write_gz, Fixture};
use save_warden_lib::auto_backup::{import_archive, startup_prune, RetentionConfig, RetentionPolicy};
use save_warden_lib::config::AppSettings;
use save_warden_lib::database::{BackupSort, OldBackupQuery};

fn seed_ages(fixture: &Fixture, ages: &[i64]) {
    let now = Utc::now();
    for (i, age) in ages.iter().enumerate() {
        fixture.seed_backup(
            fixture.playthrough_id,
            &format!("hash{}", i),
            &format!("save_00{}.xml.gz", i),
            now - Duration::days(*age),
        );
    }
}

fn saves_policy(keep_latest: u32) -> RetentionPolicy {
    RetentionPolicy::new(RetentionConfig {
        old_backup_days: 30,
        keep_latest,
        delete_saves: true,
        ..RetentionConfig::default()
    })
}

#[test]
fn test_old_backups_exclude_latest_n() {
    let fixture = Fixture::new();
    seed_ages(&fixture, &[1, 10, 40, 40, 40]);
    let catalog = fixture.catalog();

    let query = OldBackupQuery {
        older_than: Utc::now() - Duration::days(30),
        keep_latest: 2,
        include_quicksaves: false,
        include_autosaves: false,
        include_saves: true,
    };
    let mut old: Vec<String> = catalog.get_old_backups(&query).unwrap().into_iter().map(|b| b.file_hash).collect();
    old.sort();
    assert_eq!(old, vec!["hash2", "hash3", "hash4"]);

    // with four protected, only one of the old backups is left
    let query = OldBackupQuery { keep_latest: 4, ..query };
    let old = catalog.get_old_backups(&query).unwrap();
    assert_eq!(old.len(), 1);
    let latest = catalog.get_latest_backups(4).unwrap();
    assert!(!latest.contains(&old[0].file_hash));
    assert!(latest.contains(&"hash0".to_string()));
    assert!(latest.contains(&"hash1".to_string()));
}

#[test]
fn test_mark_is_idempotent_and_skips_flagged() {
    let fixture = Fixture::new();
    seed_ages(&fixture, &[1, 10, 40, 40, 40]);
    let mut catalog = fixture.catalog();
    catalog.update_backup_flag(true, "hash2").unwrap();

    let policy = saves_policy(2);
    let first = policy.mark(&mut catalog).unwrap();
    assert_eq!(first.marked, 2);

    let second = policy.mark(&mut catalog).unwrap();
    assert_eq!(second.marked, 0);

    assert!(!catalog.get_backup_by_hash("hash2").unwrap().unwrap().delete);
    assert!(catalog.get_backup_by_hash("hash3").unwrap().unwrap().delete);
}

#[test]
fn test_sweep_removes_rows_and_files_together() {
    let fixture = Fixture::new();
    seed_ages(&fixture, &[1, 10, 40, 40, 40]);
    let quick = fixture.seed_backup(fixture.playthrough_id, "quick", "quicksave.xml.gz", Utc::now() - Duration::days(90));
    let mut catalog = fixture.catalog();
    let store = fixture.store();

    let policy = saves_policy(2);
    policy.mark(&mut catalog).unwrap();
    catalog.backup_set_delete("quick").unwrap();

    let report = policy.sweep(&mut catalog, &store).unwrap();
    assert_eq!(report.deleted, 3);
    assert_eq!(report.skipped, 1, "quicksave deletion is disabled");
    assert_eq!(report.failed, 0);

    for hash in ["hash2", "hash3", "hash4"] {
        assert!(!catalog.backup_exists(hash).unwrap());
        assert!(!fixture.settings.backup_path.join(format!("id{}_{}.xml.gz", fixture.playthrough_id, hash)).exists());
    }
    assert!(catalog.backup_exists("quick").unwrap());
    assert!(fixture.settings.backup_path.join(quick).exists());
    assert_eq!(catalog.get_backups_to_delete(BackupSort::default()).unwrap().len(), 1);
}

#[test]
fn test_sweep_tolerates_missing_archive_file() {
    let fixture = Fixture::new();
    let filename = fixture.seed_backup(fixture.playthrough_id, "gone", "save_001.xml.gz", Utc::now());
    std::fs::remove_file(fixture.settings.backup_path.join(filename)).unwrap();
    let mut catalog = fixture.catalog();
    catalog.backup_set_delete("gone").unwrap();

    let report = saves_policy(0).sweep(&mut catalog, &fixture.store()).unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.missing_files, 1);
    assert!(!catalog.backup_exists("gone").unwrap());
}

#[test]
fn test_sweep_deletes_imported_orphans() {
    let fixture = Fixture::new();
    let orphan = fixture.settings.backup_path.join("id999_20240101-110000.xml.gz");
    write_gz(&orphan, &save_xml("Orphan", 2));
    let mut catalog = fixture.catalog();
    let store = fixture.store();
    assert_eq!(import_archive(&store, &mut catalog).unwrap().recycled, 1);

    let marked = catalog.get_backups_to_delete(BackupSort::default()).unwrap();
    assert_eq!(marked.len(), 1);
    let recycled = marked[0].backup_filename.clone();

    // no family toggle is needed for a file outside every save family
    let report = RetentionPolicy::new(RetentionConfig::default()).sweep(&mut catalog, &store).unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.skipped, 0);
    assert!(catalog.get_backups_to_delete(BackupSort::default()).unwrap().is_empty());
    assert!(!fixture.settings.backup_path.join(recycled).exists());
}

#[test]
fn test_startup_prune_follows_settings() {
    let fixture = Fixture::new();
    seed_ages(&fixture, &[1, 10, 40, 40, 40]);
    let mut catalog = fixture.catalog();
    let store = fixture.store();

    let mut settings = AppSettings::default();
    settings.backup.delete_old_days = 30;
    settings.backup.do_not_delete_last = 2;
    settings.backup.delete_saves = true;

    let report = startup_prune(&settings, &mut catalog, &store).unwrap();
    assert!(report.mark.is_none() && report.sweep.is_none());

    settings.backup.prune_mark_deletion = true;
    settings.backup.prune_delete = true;
    let report = startup_prune(&settings, &mut catalog, &store).unwrap();
    assert_eq!(report.mark.unwrap().marked, 3);
    assert_eq!(report.sweep.unwrap().deleted, 3);
    assert_eq!(catalog.count_backups().unwrap(), 2);
}
