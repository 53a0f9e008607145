#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip_with_uploads() {
    let workspace = temp_dir("schoold-backup-src");
    let workspace2 = temp_dir("schoold-backup-dst");
    let out_dir = temp_dir("schoold-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("school.sqlite3"), bytes).expect("write source db");
    let notes_dir = workspace.join("uploads").join("notes");
    std::fs::create_dir_all(&notes_dir).expect("create uploads");
    std::fs::write(notes_dir.join("note-1.pdf"), b"%PDF-1.4").expect("write upload");

    let bundle_path = out_dir.join("workspace.schoolbackup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.upload_count, 1);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    archive
        .by_name("db/school.sqlite3")
        .expect("database entry in bundle");
    archive
        .by_name("uploads/notes/note-1.pdf")
        .expect("upload entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);
    assert_eq!(import.upload_count, 1);

    let restored = std::fs::read(workspace2.join("school.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);
    let upload = std::fs::read(workspace2.join("uploads").join("notes").join("note-1.pdf"))
        .expect("read restored upload");
    assert_eq!(upload, b"%PDF-1.4");
    assert!(!workspace2.join("school.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn plain_sqlite_import_is_supported() {
    let out_dir = temp_dir("schoold-backup-plain");
    let workspace = temp_dir("schoold-backup-plain-dst");

    let plain = out_dir.join("copy.sqlite3");
    let bytes = b"plain-sqlite-copy";
    std::fs::write(&plain, bytes).expect("write sqlite file");

    let import = backup::import_workspace_bundle(&plain, &workspace).expect("import sqlite");
    assert_eq!(import.bundle_format_detected, "sqlite3");
    assert_eq!(import.upload_count, 0);

    let restored = std::fs::read(workspace.join("school.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bundles_with_foreign_format_or_escaping_entries_are_rejected() {
    let out_dir = temp_dir("schoold-backup-bad");
    let workspace = temp_dir("schoold-backup-bad-dst");
    let opts = zip::write::FileOptions::default();

    let foreign = out_dir.join("foreign.zip");
    {
        let mut zip = zip::ZipWriter::new(File::create(&foreign).expect("create zip"));
        zip.start_file("manifest.json", opts).expect("start manifest");
        zip.write_all(br#"{"format":"something-else"}"#)
            .expect("write manifest");
        zip.finish().expect("finish zip");
    }
    let err = backup::import_workspace_bundle(&foreign, &workspace).expect_err("foreign format");
    assert!(err.to_string().contains("unsupported bundle format"));

    let escaping = out_dir.join("escaping.zip");
    {
        let mut zip = zip::ZipWriter::new(File::create(&escaping).expect("create zip"));
        zip.start_file("manifest.json", opts).expect("start manifest");
        zip.write_all(format!(r#"{{"format":"{}"}}"#, backup::BUNDLE_FORMAT_V1).as_bytes())
            .expect("write manifest");
        zip.start_file("db/school.sqlite3", opts).expect("start db");
        zip.write_all(b"db").expect("write db");
        zip.start_file("uploads/../../evil.txt", opts)
            .expect("start upload");
        zip.write_all(b"x").expect("write upload");
        zip.finish().expect("finish zip");
    }
    let err = backup::import_workspace_bundle(&escaping, &workspace).expect_err("escaping entry");
    assert!(err.to_string().contains("escapes workspace"));
    assert!(!workspace.join("school.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
