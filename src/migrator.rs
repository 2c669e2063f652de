//! Orchestration of the user-facing migration operations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::{Backend, BackendKind, PgBackend};
use crate::config::MigratorConfig;
use crate::creator::SqlCreator;
use crate::deadline::Deadline;
use crate::error::MigrateError;
use crate::migration::{Migration, MigrationStatus};
use crate::parser;

/// Sequences the source parser and a store backend into the user-facing
/// operations: apply-all-pending, rollback-last, redo-last, status and
/// version reporting, and stub creation.
///
/// One `Migrator` drives one migrations directory against one database.
/// Every operation opens its own connection and tears it down on all paths.
pub struct Migrator {
    migrations_dir: PathBuf,
    dsn: String,
    backend_kind: BackendKind,
    lock_timeout: Duration,
}

impl Migrator {
    pub fn new(
        migrations_dir: impl AsRef<Path>,
        dsn: impl Into<String>,
        backend_kind: BackendKind,
    ) -> Self {
        Self {
            migrations_dir: migrations_dir.as_ref().to_path_buf(),
            dsn: dsn.into(),
            backend_kind,
            lock_timeout: crate::backend::DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn from_config(config: &MigratorConfig) -> Self {
        Self::new(
            &config.migrations_dir,
            config.dsn.clone(),
            BackendKind::Postgres,
        )
        .with_lock_timeout(Duration::from_secs(config.lock_timeout_seconds))
    }

    /// Bound one advisory-lock wait. `Duration::ZERO` removes the bound.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Apply every pending migration in ascending file-name order.
    pub fn up(&self, deadline: &Deadline) -> Result<(), MigrateError> {
        let migrations = parser::parse_migrations(&self.migrations_dir)?;
        self.with_connection(deadline, |backend| {
            backend.ensure_schema(deadline)?;
            backend.up(&migrations, deadline)
        })
    }

    /// Roll back the most recently applied migration. A no-op when nothing
    /// is currently applied.
    pub fn down(&self, deadline: &Deadline) -> Result<(), MigrateError> {
        self.with_connection(deadline, |backend| {
            backend.ensure_schema(deadline)?;
            let migrations = self.attach_handlers(backend.last_migrations(
                MigrationStatus::Migrated,
                1,
                deadline,
            )?)?;
            backend.down(&migrations, deadline)
        })
    }

    /// Roll back and immediately re-apply the most recently applied
    /// migration, within a single connection.
    pub fn redo(&self, deadline: &Deadline) -> Result<(), MigrateError> {
        self.with_connection(deadline, |backend| {
            backend.ensure_schema(deadline)?;
            let migrations = self.attach_handlers(backend.last_migrations(
                MigrationStatus::Migrated,
                1,
                deadline,
            )?)?;
            backend.down(&migrations, deadline)?;
            backend.up(&migrations, deadline)
        })
    }

    /// Every registered migration, newest first (descending id).
    pub fn status(&self, deadline: &Deadline) -> Result<Vec<Migration>, MigrateError> {
        self.with_connection(deadline, |backend| {
            backend.ensure_schema(deadline)?;
            backend.migrations(deadline)
        })
    }

    /// The id of the most recently applied migration, or `None` if no
    /// migration has ever succeeded.
    pub fn db_version(&self, deadline: &Deadline) -> Result<Option<i32>, MigrateError> {
        self.with_connection(deadline, |backend| {
            backend.ensure_schema(deadline)?;
            let last = backend.last_migrations(MigrationStatus::Migrated, 1, deadline)?;
            Ok(last.first().and_then(|migration| migration.id))
        })
    }

    /// Write a new empty migration stub and return its path.
    pub fn create_migration(&self, name: &str) -> Result<PathBuf, MigrateError> {
        SqlCreator::new(&self.migrations_dir).create(name)
    }

    fn backend(&self) -> Box<dyn Backend> {
        match self.backend_kind {
            BackendKind::Postgres => {
                Box::new(PgBackend::new(self.dsn.clone()).with_lock_timeout(self.lock_timeout))
            }
        }
    }

    /// Connect, run `op`, and tear the connection down on all paths.
    fn with_connection<T>(
        &self,
        deadline: &Deadline,
        op: impl FnOnce(&mut dyn Backend) -> Result<T, MigrateError>,
    ) -> Result<T, MigrateError> {
        let mut backend = self.backend();
        backend.connect(deadline)?;
        let result = op(backend.as_mut());
        if let Err(close_err) = backend.close() {
            log::warn!("failed to close database connection: {close_err}");
        }
        result
    }

    /// Records loaded from the store carry no handlers; re-derive them from
    /// the on-disk files so rollback works in a fresh process.
    fn attach_handlers(
        &self,
        mut migrations: Vec<Migration>,
    ) -> Result<Vec<Migration>, MigrateError> {
        for migration in &mut migrations {
            let (up, down) = parser::file_handlers(&self.migrations_dir, &migration.name)?;
            migration.up_handler = Some(up);
            migration.down_handler = Some(down);
        }
        Ok(migrations)
    }
}
