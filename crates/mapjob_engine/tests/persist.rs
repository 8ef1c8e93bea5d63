use std::fs;

use mapjob_engine::{ensure_dir, AtomicFileWriter, PersistError};
use tempfile::TempDir;

#[test]
fn creates_missing_download_dir() {
    let temp = TempDir::new().unwrap();
    let nested = temp.path().join("downloads").join("maps");
    ensure_dir(&nested).unwrap();
    assert!(nested.is_dir());
}

#[test]
fn rewriting_replaces_the_previous_archive() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());

    let first = writer.write("peit_results_ab12cd34.zip", b"PK first").unwrap();
    let second = writer.write("peit_results_ab12cd34.zip", b"PK second").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read(&second).unwrap(), b"PK second");
    // Only the target remains; the temp file was renamed into place.
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
}

#[test]
fn writing_into_a_file_path_fails_cleanly() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("not_a_dir");
    fs::write(&blocker, "x").unwrap();

    let writer = AtomicFileWriter::new(blocker.clone());
    let err = writer.write("result.zip", b"data").unwrap_err();
    assert!(matches!(err, PersistError::Directory { .. }));
    assert!(!blocker.with_file_name("result.zip").exists());
}

#[test]
fn removing_a_missing_file_is_fine() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());
    writer.remove("absent.ron").unwrap();

    let path = writer.write("present.ron", b"()").unwrap();
    writer.remove("present.ron").unwrap();
    assert!(!path.exists());
}
