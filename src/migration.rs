//! Migration records and lifecycle states.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use may_postgres::Row;

use crate::error::MigrateError;
use crate::transaction::Transaction;

/// Executable unit for one direction of a migration.
///
/// Handlers receive the open transaction the schema change must run in and
/// report failure by propagating the execution error.
pub type MigrationHandler = Box<dyn Fn(&Transaction) -> Result<(), MigrateError> + Send + Sync>;

/// One named, ordered, reversible schema-change unit.
///
/// Records are materialized from disk on every parse; only status, id and
/// timestamps persist in the status table, keyed by `name`. Records loaded
/// back from the store carry no handlers until the parser re-derives them.
pub struct Migration {
    /// Assigned by the status store on first registration; doubles as the
    /// database version number.
    pub id: Option<i32>,
    pub file_path: String,
    /// File name. Globally unique, and its lexicographic order is the apply
    /// order thanks to the sortable timestamp prefix.
    pub name: String,
    pub status: MigrationStatus,
    /// Authoring time (file mtime on parse, registration time in the store).
    pub create_dt: DateTime<Utc>,
    /// Last status change, if the migration has ever been registered.
    pub migrate_dt: Option<DateTime<Utc>>,
    pub up_handler: Option<MigrationHandler>,
    pub down_handler: Option<MigrationHandler>,
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("file_path", &self.file_path)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("create_dt", &self.create_dt)
            .field("migrate_dt", &self.migrate_dt)
            .field("up_handler", &self.up_handler.is_some())
            .field("down_handler", &self.down_handler.is_some())
            .finish()
    }
}

impl Migration {
    /// Decode a status-table row.
    ///
    /// Expected column order: `id`, `file_path`, `file_name`, `status`,
    /// `create_dt::text`, `migrate_dt::text`.
    pub fn from_row(row: &Row) -> Result<Self, MigrateError> {
        let id: i32 = row.get(0);
        let file_path: String = row.get(1);
        let name: String = row.get(2);
        let status: String = row.get(3);
        let create_dt: String = row.get(4);
        let migrate_dt: String = row.get(5);

        Ok(Self {
            id: Some(id),
            file_path,
            name,
            status: MigrationStatus::from_db(&status),
            create_dt: parse_pg_timestamp(&create_dt)?,
            migrate_dt: Some(parse_pg_timestamp(&migrate_dt)?),
            up_handler: None,
            down_handler: None,
        })
    }
}

/// Parse a `timestamp` column rendered as text.
pub(crate) fn parse_pg_timestamp(value: &str) -> Result<DateTime<Utc>, MigrateError> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];

    for format in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(MigrateError::Decode(format!(
        "unrecognized timestamp format: '{value}'"
    )))
}

/// Lifecycle state of a migration.
///
/// `Migrating` exists only for the span of one apply attempt, held under the
/// migration's advisory lock; it is never a stable end state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Not yet registered in the status table.
    Unknown,
    /// Registered but never successfully applied, or rolled back.
    New,
    /// Application in progress.
    Migrating,
    /// Successfully applied.
    Migrated,
    /// The last apply attempt raised an error.
    Failed,
}

impl MigrationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Unknown => "unknown",
            MigrationStatus::New => "new",
            MigrationStatus::Migrating => "migrating",
            MigrationStatus::Migrated => "migrated",
            MigrationStatus::Failed => "failed",
        }
    }

    /// Map a stored status value. Unrecognized values become `Unknown`.
    #[must_use]
    pub fn from_db(value: &str) -> Self {
        match value {
            "new" => MigrationStatus::New,
            "migrating" => MigrationStatus::Migrating,
            "migrated" => MigrationStatus::Migrated,
            "failed" => MigrationStatus::Failed,
            _ => MigrationStatus::Unknown,
        }
    }

    /// Whether `up` must skip this migration.
    ///
    /// `migrating` counts as applied: a crash mid-apply leaves that status
    /// behind, and blindly re-running is the more dangerous default.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, MigrationStatus::Migrated | MigrationStatus::Migrating)
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction a migration runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    Up,
    Down,
}

impl MigrationDirection {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationDirection::Up => "up",
            MigrationDirection::Down => "down",
        }
    }
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
