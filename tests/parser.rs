//! Filesystem-backed tests for the migration source parser.

use std::fs;

use floodgate::{parser, MigrateError, MigrationStatus};
use tempfile::TempDir;

const FIRST: &str = "2024_07_05T18_51_07__create_table_foo__hKnRd.sql";
const SECOND: &str = "2024_07_09T20_34_36__alter_table_foo_add_column_name__oypjB.sql";

fn write_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

#[test]
fn parses_one_record_per_file_in_ascending_name_order() {
    let dir = TempDir::new().unwrap();
    // Written out of order on purpose; the listing order must not matter.
    write_file(
        &dir,
        SECOND,
        "-- migration: up\nALTER TABLE foo ADD COLUMN name TEXT;\n-- migration: down\nALTER TABLE foo DROP COLUMN name;\n",
    );
    write_file(
        &dir,
        FIRST,
        "-- migration: up\nCREATE TABLE foo (id BIGINT PRIMARY KEY);\n-- migration: down\nDROP TABLE foo;\n",
    );

    let migrations = parser::parse_migrations(dir.path()).unwrap();

    assert_eq!(migrations.len(), 2);
    assert_eq!(migrations[0].name, FIRST);
    assert_eq!(migrations[1].name, SECOND);
    for migration in &migrations {
        assert_eq!(migration.status, MigrationStatus::Unknown);
        assert!(migration.id.is_none());
        assert!(migration.migrate_dt.is_none());
        assert!(migration.up_handler.is_some());
        assert!(migration.down_handler.is_some());
        assert!(migration.file_path.ends_with(&migration.name));
    }
}

#[test]
fn a_malformed_file_does_not_mask_its_siblings() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir,
        FIRST,
        "-- migration: up\nCREATE TABLE foo (id BIGINT PRIMARY KEY);\n-- migration: down\nDROP TABLE foo;\n",
    );
    write_file(&dir, "2024_07_01T00_00_00__broken__aaaaa.sql", "SELECT 1;\n");
    write_file(&dir, "2024_07_02T00_00_00__also_broken__bbbbb.sql", "-- migration: up\nSELECT 1;\n");

    let err = parser::parse_migrations(dir.path()).unwrap_err();
    let failures = match err {
        MigrateError::Parse(failures) => failures,
        other => panic!("expected parse failures, got: {other}"),
    };

    // Both malformed files are reported; the valid one is not.
    assert_eq!(failures.len(), 2);
    let names: Vec<&str> = failures.iter().map(|(name, _)| name).collect();
    assert_eq!(
        names,
        vec![
            "2024_07_01T00_00_00__broken__aaaaa.sql",
            "2024_07_02T00_00_00__also_broken__bbbbb.sql",
        ]
    );
    assert!(!failures.to_string().contains(FIRST));
}

#[test]
fn empty_directory_yields_no_migrations() {
    let dir = TempDir::new().unwrap();
    let migrations = parser::parse_migrations(dir.path()).unwrap();
    assert!(migrations.is_empty());
}

#[test]
fn missing_directory_is_an_io_error() {
    let err =
        parser::parse_migrations("/nonexistent/path/that/does/not/exist".as_ref()).unwrap_err();
    assert!(matches!(err, MigrateError::Io(_)));
}

#[test]
fn file_handlers_re_derives_a_single_migration() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir,
        FIRST,
        "-- migration: up\nCREATE TABLE foo (id BIGINT PRIMARY KEY);\n-- migration: down\nDROP TABLE foo;\n",
    );

    assert!(parser::file_handlers(dir.path(), FIRST).is_ok());
}

#[test]
fn file_handlers_reports_the_missing_file_by_name() {
    let dir = TempDir::new().unwrap();
    let err = parser::file_handlers(dir.path(), "2024_01_01T00_00_00__gone__ccccc.sql").unwrap_err();
    assert!(err.to_string().contains("gone__ccccc.sql"));
}

#[test]
fn handles_a_large_directory() {
    let dir = TempDir::new().unwrap();
    for i in 0..64 {
        write_file(
            &dir,
            &format!("2024_07_05T18_51_{i:02}__step_{i:02}__aaaaa.sql"),
            &format!("-- migration: up\nSELECT {i};\n-- migration: down\nSELECT -{i};\n"),
        );
    }

    let migrations = parser::parse_migrations(dir.path()).unwrap();
    assert_eq!(migrations.len(), 64);
    for (i, migration) in migrations.iter().enumerate() {
        assert!(migration.name.contains(&format!("step_{i:02}")));
    }
}
