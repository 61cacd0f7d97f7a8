// Integration tests for moving backups between playthroughs, the recycle bin and import

mod common;

use chrono::Utc;
use common::{save_xml, write_gz, Fixture};
use save_warden_lib::archive::store::parse_playthrough_id;
use save_warden_lib::auto_backup::{import_archive, inventory_saves, BackupError, BackupScheduler};
use save_warden_lib::database::{BackupQuery, DatabaseError};
use save_warden_lib::playthrough_index::PlaythroughIndex;

fn archive_two_saves(fixture: &Fixture) -> Vec<String> {
    fixture.write_save("save_001.xml.gz", &save_xml("Ana", 1));
    fixture.write_save("save_002.xml.gz", &save_xml("Ana", 2));
    let mut scheduler = BackupScheduler::new(fixture.settings.clone(), fixture.playthrough_id, None).unwrap();
    scheduler.run_once().unwrap();

    let catalog = fixture.catalog();
    catalog
        .get_backups(fixture.playthrough_id, &BackupQuery::default())
        .unwrap()
        .into_iter()
        .map(|b| b.file_hash)
        .collect()
}

#[test]
fn test_move_renames_archive_files() {
    let fixture = Fixture::new();
    let hashes = archive_two_saves(&fixture);
    let mut catalog = fixture.catalog();
    let store = fixture.store();
    let target = catalog.save_playthrough("Second Run", "", None, false).unwrap().id().unwrap();

    let old_names: Vec<String> = hashes
        .iter()
        .map(|h| catalog.get_backup_by_hash(h).unwrap().unwrap().backup_filename)
        .collect();

    let report = PlaythroughIndex::new(&mut catalog, &store).move_backups(&hashes, target).unwrap();
    assert_eq!(report.moved.len(), 2);
    assert!(report.failed.is_empty());

    for hash in &hashes {
        let backup = catalog.get_backup_by_hash(hash).unwrap().unwrap();
        assert_eq!(backup.playthrough_id, target);
        assert_eq!(parse_playthrough_id(&backup.backup_filename), Some(target));
        assert!(fixture.settings.backup_path.join(&backup.backup_filename).exists());
    }
    for old in old_names {
        assert!(!fixture.settings.backup_path.join(old).exists());
    }
}

#[test]
fn test_move_reports_missing_file_and_continues() {
    let fixture = Fixture::new();
    let hashes = archive_two_saves(&fixture);
    let mut catalog = fixture.catalog();
    let store = fixture.store();
    let target = catalog.save_playthrough("Second Run", "", None, false).unwrap().id().unwrap();

    let missing = catalog.get_backup_by_hash(&hashes[0]).unwrap().unwrap();
    std::fs::remove_file(fixture.settings.backup_path.join(&missing.backup_filename)).unwrap();

    let report = PlaythroughIndex::new(&mut catalog, &store).move_backups(&hashes, target).unwrap();
    assert_eq!(report.moved.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].file_hash, hashes[0]);

    // the failed backup keeps its owner, the other one moved
    assert_eq!(catalog.get_backup_by_hash(&hashes[0]).unwrap().unwrap().playthrough_id, fixture.playthrough_id);
    assert_eq!(catalog.get_backup_by_hash(&hashes[1]).unwrap().unwrap().playthrough_id, target);
}

#[test]
fn test_recycle_bin_is_not_a_move_target() {
    let fixture = Fixture::new();
    let hashes = archive_two_saves(&fixture);
    let mut catalog = fixture.catalog();
    let store = fixture.store();
    let bin = catalog.recycle_bin().unwrap();

    let result = PlaythroughIndex::new(&mut catalog, &store).move_backups(&hashes, bin.id);
    assert!(matches!(result, Err(BackupError::Invariant(_))));
}

#[test]
fn test_delete_playthrough_moves_backups_to_recycle_bin() {
    let fixture = Fixture::new();
    let hashes = archive_two_saves(&fixture);
    let mut catalog = fixture.catalog();
    let store = fixture.store();
    catalog.update_backup_flag(true, &hashes[0]).unwrap();
    let bin = catalog.recycle_bin().unwrap();

    let report = PlaythroughIndex::new(&mut catalog, &store).delete_playthrough(fixture.playthrough_id).unwrap();
    assert_eq!(report.moved.len(), 2);

    assert!(catalog.get_playthrough_by_id(fixture.playthrough_id).unwrap().is_none());
    for hash in &hashes {
        let backup = catalog.get_backup_by_hash(hash).unwrap().unwrap();
        assert_eq!(backup.playthrough_id, bin.id);
        assert!(backup.delete);
        assert!(!backup.flag);
        assert_eq!(parse_playthrough_id(&backup.backup_filename), Some(bin.id));
        assert!(fixture.settings.backup_path.join(&backup.backup_filename).exists());
    }

    assert!(matches!(catalog.backup_unset_delete(&hashes[1]), Err(DatabaseError::Invariant(_))));
}

#[test]
fn test_deleting_playthroughs_with_same_second_backups() {
    let fixture = Fixture::new();
    let mut catalog = fixture.catalog();
    let store = fixture.store();
    let other = catalog.save_playthrough("Other Run", "", None, false).unwrap().id().unwrap();
    let bin = catalog.recycle_bin().unwrap();
    drop(catalog);

    let stamp = "20240101-120000";
    fixture.seed_backup_named(
        fixture.playthrough_id,
        "hash-a",
        &format!("id{}_{}.xml.gz", fixture.playthrough_id, stamp),
        "save_001.xml.gz",
        Utc::now(),
    );
    fixture.seed_backup_named(other, "hash-b", &format!("id{}_{}.xml.gz", other, stamp), "save_002.xml.gz", Utc::now());

    let mut catalog = fixture.catalog();
    for id in [fixture.playthrough_id, other] {
        let report = PlaythroughIndex::new(&mut catalog, &store).delete_playthrough(id).unwrap();
        assert_eq!(report.moved.len(), 1);
        assert!(report.failed.is_empty());
    }

    let mut names = Vec::new();
    for hash in ["hash-a", "hash-b"] {
        let backup = catalog.get_backup_by_hash(hash).unwrap().unwrap();
        assert_eq!(backup.playthrough_id, bin.id);
        assert_eq!(parse_playthrough_id(&backup.backup_filename), Some(bin.id));
        let path = fixture.settings.backup_path.join(&backup.backup_filename);
        assert_eq!(std::fs::read(path).unwrap(), hash.as_bytes());
        names.push(backup.backup_filename);
    }
    assert_ne!(names[0], names[1]);
}

#[test]
fn test_restore_copies_backup_into_slot() {
    let fixture = Fixture::new();
    let hashes = archive_two_saves(&fixture);
    let mut catalog = fixture.catalog();
    let store = fixture.store();

    let target = PlaythroughIndex::new(&mut catalog, &store).restore(&hashes[0], "save_010").unwrap();
    assert_eq!(target, fixture.settings.save_path.join("save_010.xml.gz"));
    assert!(inventory_saves(&store, &catalog)
        .unwrap()
        .iter()
        .any(|entry| entry.file_name == "save_010.xml.gz" && entry.backup.is_some()));
}

#[test]
fn test_import_reconciles_archive_directory() {
    let fixture = Fixture::new();
    let backup_path = &fixture.settings.backup_path;
    write_gz(&backup_path.join(format!("id{}_20240101-100000.xml.gz", fixture.playthrough_id)), &save_xml("Live", 1));
    write_gz(&backup_path.join("id999_20240101-110000.xml.gz"), &save_xml("Orphan", 2));
    std::fs::write(backup_path.join("notes.txt"), b"not a backup").unwrap();
    let mut catalog = fixture.catalog();
    let store = fixture.store();

    let report = import_archive(&store, &mut catalog).unwrap();
    assert_eq!(report.imported, 2);
    assert_eq!(report.recycled, 1);
    assert_eq!(report.failed, 0);

    let live = catalog.get_backups(fixture.playthrough_id, &BackupQuery::default()).unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].character_name, "Live");
    assert!(!live[0].delete);

    let bin = catalog.recycle_bin().unwrap();
    let query = BackupQuery { include_deleted: true, ..BackupQuery::default() };
    let recycled = catalog.get_backups(bin.id, &query).unwrap();
    assert_eq!(recycled.len(), 1);
    assert!(recycled[0].delete);
    assert_eq!(parse_playthrough_id(&recycled[0].backup_filename), Some(bin.id));
    assert!(backup_path.join(&recycled[0].backup_filename).exists());
    assert!(!backup_path.join("id999_20240101-110000.xml.gz").exists());

    let again = import_archive(&store, &mut catalog).unwrap();
    assert_eq!(again.imported, 0);
    assert_eq!(again.already_catalogued, 2);
    assert!(Utc::now() > recycled[0].x4_save_time);
}
