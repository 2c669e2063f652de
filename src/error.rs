//! Crate-wide error types.

use std::collections::BTreeMap;
use std::fmt;

use crate::connection::ConnectionError;
use crate::migration::MigrationStatus;
use crate::transaction::TransactionError;

/// One migration file that could not be turned into an executable unit.
#[derive(Debug, thiserror::Error)]
pub enum ParseFailure {
    /// The file (or the directory entry) could not be read.
    #[error("unreadable migration file: {0}")]
    Io(#[from] std::io::Error),
    /// The `-- migration: up` / `-- migration: down` marker pair is missing.
    #[error("missing '-- migration: up' / '-- migration: down' markers")]
    MissingMarkers,
}

/// Per-file parse failures, keyed by file name.
///
/// A malformed file must not mask diagnostics about its siblings, so the
/// parser collects every failure before reporting.
#[derive(Debug, Default)]
pub struct ParseFailures {
    failures: BTreeMap<String, ParseFailure>,
}

impl ParseFailures {
    pub(crate) fn insert(&mut self, file_name: String, failure: ParseFailure) {
        self.failures.insert(file_name, failure);
    }

    pub(crate) fn single(file_name: String, failure: ParseFailure) -> Self {
        let mut failures = Self::default();
        failures.insert(file_name, failure);
        failures
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Failures in file-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParseFailure)> {
        self.failures
            .iter()
            .map(|(name, failure)| (name.as_str(), failure))
    }
}

impl fmt::Display for ParseFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error while parsing migration files: ")?;
        for (i, (name, failure)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{name}: {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseFailures {}

/// Errors produced by the migration engine.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The migrations directory itself could not be read.
    #[error("migrations directory error: {0}")]
    Io(#[from] std::io::Error),

    /// One or more migration files failed to parse.
    #[error(transparent)]
    Parse(#[from] ParseFailures),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("database error: {0}")]
    Database(#[from] may_postgres::Error),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("row decode error: {0}")]
    Decode(String),

    /// An operation was invoked before `connect`.
    #[error("backend is not connected")]
    NotConnected,

    /// Registering the status row or taking the advisory lock failed.
    #[error("error while locking migration row: {source}")]
    Lock { source: Box<MigrateError> },

    /// A status write failed. After the schema-change transaction has
    /// resolved this leaves the stored status inconsistent with reality and
    /// requires manual inspection.
    #[error("failed to record migration status '{status}': {source}")]
    StatusWrite {
        status: MigrationStatus,
        source: Box<MigrateError>,
    },

    /// One migration's apply or rollback attempt failed, aborting the batch.
    #[error("error while {action} migration {name}: {source}")]
    Apply {
        name: String,
        action: &'static str,
        source: Box<MigrateError>,
    },

    /// A record loaded from the store was asked to run without its handlers
    /// having been re-derived from disk.
    #[error("migration {0} has no executable handlers")]
    MissingHandlers(String),

    #[error("deadline exceeded while {0}")]
    DeadlineExceeded(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failures_display_lists_files_in_name_order() {
        let mut failures = ParseFailures::default();
        failures.insert("b.sql".to_string(), ParseFailure::MissingMarkers);
        failures.insert(
            "a.sql".to_string(),
            ParseFailure::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
        );

        let rendered = failures.to_string();
        assert!(rendered.starts_with("error while parsing migration files: a.sql:"));
        assert!(rendered.contains("b.sql: missing '-- migration: up'"));
        let a_pos = rendered.find("a.sql").unwrap();
        let b_pos = rendered.find("b.sql").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn apply_error_names_the_migration() {
        let err = MigrateError::Apply {
            name: "2024_07_05T18_51_07__create_table_foo__hKnRd.sql".to_string(),
            action: "up",
            source: Box::new(MigrateError::NotConnected),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("error while up migration"));
        assert!(rendered.contains("create_table_foo"));
        assert!(rendered.contains("backend is not connected"));
    }

    #[test]
    fn status_write_error_carries_the_intended_status() {
        let err = MigrateError::StatusWrite {
            status: MigrationStatus::Migrated,
            source: Box::new(MigrateError::NotConnected),
        };
        assert!(err.to_string().contains("'migrated'"));
    }
}
