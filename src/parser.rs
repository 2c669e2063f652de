//! Migration source parsing.
//!
//! A migration file is plain UTF-8 text holding two statement blocks
//! delimited by the literal marker lines `-- migration: up` and
//! `-- migration: down`. Everything between the markers is the up statement,
//! everything after the down marker to end-of-file is the down statement;
//! both are passed to the backend verbatim.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{MigrateError, ParseFailure, ParseFailures};
use crate::executor::PgExecutor;
use crate::migration::{Migration, MigrationHandler, MigrationStatus};

static MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?ms)-- migration: up\n(?P<up_stmt>.*)\n-- migration: down\n(?P<down_stmt>.*)")
        .expect("marker pattern is a valid regex")
});

struct ParsedFile {
    file_path: PathBuf,
    create_dt: DateTime<Utc>,
    up_stmt: String,
    down_stmt: String,
}

/// Read every entry of `migrations_dir` (non-recursive) and build migration
/// records with executable up/down handlers, ordered by ascending file name.
///
/// Each file is parsed in its own coroutine; results fan in over a channel
/// keyed by the file's index in the sorted listing so the output order is
/// deterministic. Per-file failures do not stop sibling files; they are
/// aggregated into one [`ParseFailures`] so a single malformed file cannot
/// mask diagnostics about the others.
pub fn parse_migrations(migrations_dir: &Path) -> Result<Vec<Migration>, MigrateError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(migrations_dir)? {
        let entry = entry?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    // Directory listing order is platform-dependent; the ordering contract
    // is ascending file name, which is also apply order.
    names.sort();

    let (tx, rx) = crossbeam_channel::unbounded();
    for (index, name) in names.iter().enumerate() {
        let tx = tx.clone();
        let name = name.clone();
        let path = migrations_dir.join(&name);
        may::go!(move || {
            let _ = tx.send((index, name, parse_file(&path)));
        });
    }
    drop(tx);

    let mut parsed: Vec<Option<(String, ParsedFile)>> =
        (0..names.len()).map(|_| None).collect();
    let mut failures = ParseFailures::default();
    for (index, name, result) in rx {
        match result {
            Ok(file) => parsed[index] = Some((name, file)),
            Err(failure) => failures.insert(name, failure),
        }
    }

    if !failures.is_empty() {
        return Err(failures.into());
    }

    let mut migrations = Vec::with_capacity(parsed.len());
    for slot in parsed {
        if let Some((name, file)) = slot {
            migrations.push(migration_from_file(name, file));
        }
    }
    Ok(migrations)
}

/// Re-derive one migration's executable handlers by file name.
///
/// Rollback and redo operate on records loaded from the status store, whose
/// handlers were never parsed in the current process.
pub fn file_handlers(
    migrations_dir: &Path,
    file_name: &str,
) -> Result<(MigrationHandler, MigrationHandler), MigrateError> {
    let path = migrations_dir.join(file_name);
    let file = parse_file(&path)
        .map_err(|failure| ParseFailures::single(file_name.to_string(), failure))?;
    Ok((
        statement_handler(file.up_stmt),
        statement_handler(file.down_stmt),
    ))
}

fn migration_from_file(name: String, file: ParsedFile) -> Migration {
    Migration {
        id: None,
        file_path: file.file_path.to_string_lossy().into_owned(),
        name,
        status: MigrationStatus::Unknown,
        create_dt: file.create_dt,
        migrate_dt: None,
        up_handler: Some(statement_handler(file.up_stmt)),
        down_handler: Some(statement_handler(file.down_stmt)),
    }
}

/// Build a handler executing `stmt` verbatim against the given transaction.
fn statement_handler(stmt: String) -> MigrationHandler {
    Box::new(move |tx| {
        tx.execute(&stmt, &[])?;
        Ok(())
    })
}

fn parse_file(path: &Path) -> Result<ParsedFile, ParseFailure> {
    let metadata = fs::metadata(path)?;
    let create_dt = DateTime::<Utc>::from(metadata.modified()?);
    let contents = fs::read_to_string(path)?;
    let (up_stmt, down_stmt) =
        split_statements(&contents).ok_or(ParseFailure::MissingMarkers)?;

    Ok(ParsedFile {
        file_path: path.to_path_buf(),
        create_dt,
        up_stmt,
        down_stmt,
    })
}

fn split_statements(contents: &str) -> Option<(String, String)> {
    let caps = MARKERS.captures(contents)?;
    Some((caps["up_stmt"].to_string(), caps["down_stmt"].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_pattern_compiles() {
        assert!(MARKERS.is_match("-- migration: up\nA\n-- migration: down\nB"));
    }

    #[test]
    fn split_keeps_statement_text_verbatim() {
        let contents = "-- migration: up\nCREATE TABLE foo (\n    id BIGINT\n);\n-- migration: down\nDROP TABLE foo;\n";
        let (up, down) = split_statements(contents).unwrap();
        assert_eq!(up, "CREATE TABLE foo (\n    id BIGINT\n);");
        assert_eq!(down, "DROP TABLE foo;\n");
    }

    #[test]
    fn split_rejects_missing_markers() {
        assert!(split_statements("CREATE TABLE foo (id BIGINT);").is_none());
        assert!(split_statements("-- migration: up\nCREATE TABLE foo (id BIGINT);").is_none());
    }

    #[test]
    fn empty_sections_are_allowed() {
        let (up, down) = split_statements("-- migration: up\n\n-- migration: down\n").unwrap();
        assert_eq!(up, "");
        assert_eq!(down, "");
    }
}
