//! Backend seam: the store-facing interface the orchestrator drives.

mod pg;

pub use pg::PgBackend;
pub(crate) use pg::DEFAULT_LOCK_TIMEOUT;

use crate::deadline::Deadline;
use crate::error::MigrateError;
use crate::migration::{Migration, MigrationStatus};

/// Store operations the orchestrator sequences.
///
/// One implementation per database engine, selected once at orchestrator
/// construction via [`BackendKind`] and never branched on thereafter.
pub trait Backend {
    /// Establish the store connection. Idempotent.
    fn connect(&mut self, deadline: &Deadline) -> Result<(), MigrateError>;

    /// Tear the connection down. Idempotent.
    fn close(&mut self) -> Result<(), MigrateError>;

    /// Idempotent bootstrap of the status table and its unique index,
    /// tolerating a race where a concurrent process created them first.
    fn ensure_schema(&self, deadline: &Deadline) -> Result<(), MigrateError>;

    /// Apply every not-yet-applied migration in the given order, fail-fast.
    fn up(&self, migrations: &[Migration], deadline: &Deadline) -> Result<(), MigrateError>;

    /// Roll back the given migrations, fail-fast.
    fn down(&self, migrations: &[Migration], deadline: &Deadline) -> Result<(), MigrateError>;

    /// The most recently registered migrations with `status`, newest first.
    fn last_migrations(
        &self,
        status: MigrationStatus,
        count: i64,
        deadline: &Deadline,
    ) -> Result<Vec<Migration>, MigrateError>;

    /// Every registered migration, newest first.
    fn migrations(&self, deadline: &Deadline) -> Result<Vec<Migration>, MigrateError>;
}

/// Store implementations floodgate can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Postgres,
}
