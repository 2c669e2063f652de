//! PostgreSQL migration backend: status store, advisory locking, and the
//! transactional apply state machine.
//!
//! The advisory lock is the sole cross-process mutual-exclusion primitive.
//! It keys on the status row's integer id, so the row is inserted (or found
//! already inserted) before the lock is taken; because that insert-then-lock
//! pair is not atomic across processes, every apply re-checks the stored
//! status after the lock is granted.

use std::time::Duration;

use may_postgres::error::SqlState;

use crate::backend::Backend;
use crate::connection::connect;
use crate::deadline::Deadline;
use crate::error::MigrateError;
use crate::executor::{ClientExecutor, PgExecutor};
use crate::migration::{Migration, MigrationDirection, MigrationStatus};

const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_TABLE: &str = "floodgate_migrations";

pub(crate) const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Migration backend for PostgreSQL over `may_postgres`.
pub struct PgBackend {
    dsn: String,
    schema: String,
    table: String,
    lock_timeout: Duration,
    executor: Option<ClientExecutor>,
}

impl PgBackend {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            schema: DEFAULT_SCHEMA.to_string(),
            table: DEFAULT_TABLE.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            executor: None,
        }
    }

    /// Bound one advisory-lock wait. `Duration::ZERO` removes the bound.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    fn executor(&self) -> Result<&ClientExecutor, MigrateError> {
        self.executor.as_ref().ok_or(MigrateError::NotConnected)
    }

    /// One guarded apply attempt: lock, re-check, move through the status
    /// arc `start -> {success | fail}` around the handler's transaction.
    ///
    /// Returns `Ok(false)` when the post-lock re-check found the migration
    /// already applied by another session (up direction only).
    fn apply_migration(
        &self,
        migration: &Migration,
        direction: MigrationDirection,
        start_status: MigrationStatus,
        success_status: MigrationStatus,
        fail_status: MigrationStatus,
        deadline: &Deadline,
    ) -> Result<bool, MigrateError> {
        let executor = self.executor()?;
        deadline.check("acquiring migration lock")?;

        let _lock = self.register_and_lock(executor, migration, deadline)?;

        if direction == MigrationDirection::Up
            && self.stored_status(&migration.name)?.is_applied()
        {
            // Lost the registration race: another session applied this
            // migration between our pending check and the lock grant.
            return Ok(false);
        }

        let handler = match direction {
            MigrationDirection::Up => migration.up_handler.as_ref(),
            MigrationDirection::Down => migration.down_handler.as_ref(),
        }
        .ok_or_else(|| MigrateError::MissingHandlers(migration.name.clone()))?;

        deadline.check("starting migration transaction")?;

        // Recorded durably before any schema change, so a crash from here on
        // leaves visible evidence of the interrupted attempt.
        self.update_status(migration, start_status)?;

        let tx = executor.begin()?;
        if let Err(exec_err) = handler(&tx) {
            if let Err(rb_err) = tx.rollback() {
                log::warn!(
                    "rollback after failed migration {} also failed: {rb_err}",
                    migration.name
                );
            }
            self.record_outcome(migration, fail_status)?;
            return Err(exec_err);
        }

        if let Err(commit_err) = tx.commit() {
            // An uncommitted transaction changed nothing.
            self.record_outcome(migration, fail_status)?;
            return Err(commit_err.into());
        }

        self.record_outcome(migration, success_status)?;
        Ok(true)
    }

    /// Register the status row if absent, then take the advisory lock keyed
    /// by its id. Returns a guard that releases the lock on drop.
    fn register_and_lock<'a>(
        &self,
        executor: &'a ClientExecutor,
        migration: &Migration,
        deadline: &Deadline,
    ) -> Result<AdvisoryLockGuard<'a>, MigrateError> {
        let insert_sql = format!(
            "INSERT INTO {} (file_path, file_name, status, create_dt, migrate_dt) \
             VALUES ($1, $2, $3, NOW(), NOW())",
            self.qualified_table()
        );
        match executor.execute(
            &insert_sql,
            &[
                &migration.file_path,
                &migration.name,
                &MigrationStatus::New.as_str(),
            ],
        ) {
            Ok(_) => {}
            // A duplicate key on file_name means another run already
            // registered this migration; the post-lock re-check decides.
            Err(MigrateError::Database(ref err)) if is_unique_violation(err) => {}
            Err(source) => {
                return Err(MigrateError::Lock {
                    source: Box::new(source),
                })
            }
        }

        // The lock primitive operates on integers, so it keys on the row id;
        // the insert above guarantees the row exists.
        let lock_sql = format!(
            "SELECT pg_advisory_lock(id) FROM {} WHERE file_name = $1",
            self.qualified_table()
        );
        let wait = self.lock_wait(deadline);
        if let Some(timeout) = wait {
            let millis = timeout.as_millis().max(1);
            executor
                .execute(&format!("SET statement_timeout = '{millis}ms'"), &[])
                .map_err(|source| MigrateError::Lock {
                    source: Box::new(source),
                })?;
        }
        let locked = executor.execute(&lock_sql, &[&migration.name]);
        if wait.is_some() {
            if let Err(err) = executor.execute("RESET statement_timeout", &[]) {
                log::warn!("failed to reset statement_timeout: {err}");
            }
        }
        locked.map_err(|source| MigrateError::Lock {
            source: Box::new(source),
        })?;

        Ok(AdvisoryLockGuard {
            executor,
            unlock_sql: format!(
                "SELECT pg_advisory_unlock(id) FROM {} WHERE file_name = $1",
                self.qualified_table()
            ),
            name: migration.name.clone(),
        })
    }

    /// Bound for one lock wait: the configured timeout capped by whatever is
    /// left of the caller's deadline.
    fn lock_wait(&self, deadline: &Deadline) -> Option<Duration> {
        let configured = (!self.lock_timeout.is_zero()).then_some(self.lock_timeout);
        match (configured, deadline.remaining()) {
            (Some(timeout), Some(remaining)) => Some(timeout.min(remaining)),
            (Some(timeout), None) => Some(timeout),
            (None, Some(remaining)) => Some(remaining),
            (None, None) => None,
        }
    }

    fn stored_status(&self, name: &str) -> Result<MigrationStatus, MigrateError> {
        let executor = self.executor()?;
        let sql = format!(
            "SELECT status FROM {} WHERE file_name = $1",
            self.qualified_table()
        );
        let rows = executor.query_all(&sql, &[&name])?;
        Ok(match rows.first() {
            Some(row) => {
                let status: String = row.get(0);
                MigrationStatus::from_db(&status)
            }
            None => MigrationStatus::Unknown,
        })
    }

    /// Upsert the migration's status and refresh `migrate_dt`. The row
    /// normally pre-exists (register-and-lock inserts it), but the write is
    /// total either way; `create_dt` is written once and never touched again.
    fn update_status(
        &self,
        migration: &Migration,
        status: MigrationStatus,
    ) -> Result<(), MigrateError> {
        let executor = self.executor()?;
        let sql = format!(
            "INSERT INTO {} (file_path, file_name, status, create_dt, migrate_dt) \
             VALUES ($1, $2, $3, NOW(), NOW()) \
             ON CONFLICT (file_name) DO UPDATE SET status = EXCLUDED.status, migrate_dt = NOW()",
            self.qualified_table()
        );
        executor
            .execute(
                &sql,
                &[&migration.file_path, &migration.name, &status.as_str()],
            )
            .map_err(|source| MigrateError::StatusWrite {
                status,
                source: Box::new(source),
            })?;
        Ok(())
    }

    /// Record the post-transaction status. A failure here leaves the stored
    /// status inconsistent with what actually happened to the schema, so it
    /// is logged for manual inspection as well as propagated.
    fn record_outcome(
        &self,
        migration: &Migration,
        status: MigrationStatus,
    ) -> Result<(), MigrateError> {
        if let Err(status_err) = self.update_status(migration, status) {
            log::error!(
                "migration {} finished but its status could not be recorded as \
                 '{status}'; inspect {} manually: {status_err}",
                migration.name,
                self.qualified_table()
            );
            return Err(status_err);
        }
        Ok(())
    }

    fn select_migrations(
        &self,
        tail: &str,
        params: &[&dyn may_postgres::types::ToSql],
    ) -> Result<Vec<Migration>, MigrateError> {
        let executor = self.executor()?;
        let sql = format!(
            "SELECT id, file_path, file_name, status, create_dt::text, migrate_dt::text \
             FROM {} {tail}",
            self.qualified_table()
        );
        let rows = executor.query_all(&sql, params)?;
        rows.iter().map(Migration::from_row).collect()
    }
}

impl Backend for PgBackend {
    fn connect(&mut self, deadline: &Deadline) -> Result<(), MigrateError> {
        if self.executor.is_some() {
            return Ok(());
        }
        deadline.check("connecting to the database")?;
        let client = connect(&self.dsn)?;
        self.executor = Some(ClientExecutor::new(client));
        Ok(())
    }

    fn close(&mut self) -> Result<(), MigrateError> {
        // Dropping the client closes the connection and with it any advisory
        // locks the session still holds.
        self.executor = None;
        Ok(())
    }

    fn ensure_schema(&self, deadline: &Deadline) -> Result<(), MigrateError> {
        let executor = self.executor()?;
        deadline.check("bootstrapping the status table")?;

        let exists_row = executor.query_one(
            "SELECT EXISTS (
                SELECT FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )",
            &[&self.schema, &self.table],
        )?;
        let table_exists: bool = exists_row.get(0);
        if table_exists {
            return Ok(());
        }

        let create_sql = format!(
            "CREATE TABLE {} (
                id SERIAL NOT NULL,
                file_path VARCHAR(255) NOT NULL,
                file_name VARCHAR(255) NOT NULL,
                status VARCHAR(10) NOT NULL,
                create_dt TIMESTAMP NOT NULL,
                migrate_dt TIMESTAMP NOT NULL,
                CONSTRAINT {}_pk PRIMARY KEY (id)
            )",
            self.qualified_table(),
            self.table
        );
        match executor.execute(&create_sql, &[]) {
            Ok(_) => {}
            // A concurrent process created the table between our existence
            // check and this statement; it also owns the index. Depending on
            // timing Postgres reports this as a duplicate relation or as a
            // duplicate key in the catalog indexes.
            Err(MigrateError::Database(ref err)) if is_already_created(err) => return Ok(()),
            Err(err) => return Err(err),
        }

        let index_sql = format!(
            "CREATE UNIQUE INDEX unq_{}_file_name ON {} (file_name)",
            self.table,
            self.qualified_table()
        );
        executor.execute(&index_sql, &[])?;
        Ok(())
    }

    fn up(&self, migrations: &[Migration], deadline: &Deadline) -> Result<(), MigrateError> {
        for migration in migrations {
            log::info!("start migration: {}", migration.name);

            let status = self.stored_status(&migration.name)?;
            if status.is_applied() {
                if status == MigrationStatus::Migrating {
                    log::warn!(
                        "migration {} is recorded as 'migrating'; a previous run may have \
                         been interrupted mid-apply, inspect {} manually",
                        migration.name,
                        self.qualified_table()
                    );
                }
                log::info!("skip migration: {}", migration.name);
                continue;
            }

            let migrated = self
                .apply_migration(
                    migration,
                    MigrationDirection::Up,
                    MigrationStatus::Migrating,
                    MigrationStatus::Migrated,
                    MigrationStatus::Failed,
                    deadline,
                )
                .map_err(|source| MigrateError::Apply {
                    name: migration.name.clone(),
                    action: "up",
                    source: Box::new(source),
                })?;

            if migrated {
                log::info!("success migration: {}", migration.name);
            } else {
                log::info!("skip migration: {}", migration.name);
            }
        }
        Ok(())
    }

    fn down(&self, migrations: &[Migration], deadline: &Deadline) -> Result<(), MigrateError> {
        for migration in migrations {
            log::info!("start rollback: {}", migration.name);

            // Rolling back reverses the status arc. The fail status is
            // `migrated`: an unsuccessful rollback reads as unchanged.
            self.apply_migration(
                migration,
                MigrationDirection::Down,
                MigrationStatus::Migrating,
                MigrationStatus::New,
                MigrationStatus::Migrated,
                deadline,
            )
            .map_err(|source| MigrateError::Apply {
                name: migration.name.clone(),
                action: "rollback",
                source: Box::new(source),
            })?;

            log::info!("success rollback: {}", migration.name);
        }
        Ok(())
    }

    fn last_migrations(
        &self,
        status: MigrationStatus,
        count: i64,
        deadline: &Deadline,
    ) -> Result<Vec<Migration>, MigrateError> {
        deadline.check("querying migration history")?;
        self.select_migrations(
            "WHERE status = $1 ORDER BY id DESC LIMIT $2",
            &[&status.as_str(), &count],
        )
    }

    fn migrations(&self, deadline: &Deadline) -> Result<Vec<Migration>, MigrateError> {
        deadline.check("querying migration history")?;
        self.select_migrations("ORDER BY id DESC", &[])
    }
}

/// Holds the advisory lock for one migration. Release on drop is best-effort:
/// the lock is session-scoped and clears on disconnect regardless, so a
/// failed unlock is logged, never propagated.
struct AdvisoryLockGuard<'a> {
    executor: &'a ClientExecutor,
    unlock_sql: String,
    name: String,
}

impl Drop for AdvisoryLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.executor.execute(&self.unlock_sql, &[&self.name]) {
            log::warn!(
                "failed to release advisory lock for migration {}: {err}",
                self.name
            );
        }
    }
}

fn is_unique_violation(err: &may_postgres::Error) -> bool {
    err.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

fn is_already_created(err: &may_postgres::Error) -> bool {
    matches!(
        err.code(),
        Some(&SqlState::UNIQUE_VIOLATION) | Some(&SqlState::DUPLICATE_TABLE)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_wait_is_capped_by_the_deadline() {
        let backend = PgBackend::new("postgres://u:p@localhost/db")
            .with_lock_timeout(Duration::from_secs(60));

        let unbounded = backend.lock_wait(&Deadline::none());
        assert_eq!(unbounded, Some(Duration::from_secs(60)));

        let capped = backend.lock_wait(&Deadline::within(Duration::from_secs(5)));
        assert!(capped.unwrap() <= Duration::from_secs(5));
    }

    #[test]
    fn zero_lock_timeout_means_unbounded_wait() {
        let backend =
            PgBackend::new("postgres://u:p@localhost/db").with_lock_timeout(Duration::ZERO);
        assert_eq!(backend.lock_wait(&Deadline::none()), None);
        // A caller deadline still bounds the wait.
        assert!(backend
            .lock_wait(&Deadline::within(Duration::from_secs(5)))
            .is_some());
    }

    #[test]
    fn operations_require_a_connection() {
        let backend = PgBackend::new("postgres://u:p@localhost/db");
        let err = backend.stored_status("any").unwrap_err();
        assert!(matches!(err, MigrateError::NotConnected));
    }
}
