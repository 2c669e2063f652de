//! Tests for migration stub creation.

use std::fs;

use floodgate::SqlCreator;
use tempfile::TempDir;

#[test]
fn creates_a_stub_with_the_canonical_name() {
    let dir = TempDir::new().unwrap();
    let path = SqlCreator::new(dir.path()).create("create_table_foo").unwrap();

    assert_eq!(path.parent().unwrap(), dir.path());
    let file_name = path.file_name().unwrap().to_str().unwrap();

    let stem = file_name.strip_suffix(".sql").expect("sql extension");
    let parts: Vec<&str> = stem.split("__").collect();
    assert_eq!(parts.len(), 3, "timestamp__name__suffix: {file_name}");

    // 2024_07_05T18_51_07 style prefix
    let timestamp = parts[0];
    assert_eq!(timestamp.len(), 19);
    assert_eq!(&timestamp[10..11], "T");
    assert!(timestamp
        .chars()
        .all(|c| c.is_ascii_digit() || c == '_' || c == 'T'));

    assert_eq!(parts[1], "create_table_foo");
    assert_eq!(parts[2].len(), 5);
    assert!(parts[2].chars().all(|c| c.is_ascii_alphabetic()));
}

#[test]
fn stub_contains_the_marker_template() {
    let dir = TempDir::new().unwrap();
    let path = SqlCreator::new(dir.path()).create("init").unwrap();

    let contents = fs::read_to_string(path).unwrap();
    assert_eq!(contents, "-- migration: up\n\n-- migration: down");
}

#[test]
fn two_stubs_in_the_same_second_get_distinct_names() {
    let dir = TempDir::new().unwrap();
    let creator = SqlCreator::new(dir.path());

    let first = creator.create("same_name").unwrap();
    let second = creator.create("same_name").unwrap();
    assert_ne!(first, second);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
}
