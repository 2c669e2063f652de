//! Explicit transaction wrapper.
//!
//! Migration handlers run against a [`Transaction`]; the applier commits on
//! handler success and rolls back on handler failure, so the schema either
//! fully changes or stays untouched.

use may_postgres::types::ToSql;
use may_postgres::{Client, Row};
use thiserror::Error;

use crate::error::MigrateError;
use crate::executor::PgExecutor;

/// Transaction error type.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] may_postgres::Error),
    #[error("transaction has already been committed or rolled back")]
    Closed,
}

/// A top-level database transaction.
///
/// Created via [`ClientExecutor::begin`](crate::executor::ClientExecutor::begin).
/// All operations within it are either committed together or discarded
/// together; after either, the transaction is closed.
pub struct Transaction {
    client: Client,
    closed: bool,
}

impl Transaction {
    pub(crate) fn new(client: Client) -> Result<Self, TransactionError> {
        client.execute("BEGIN", &[])?;
        Ok(Self {
            client,
            closed: false,
        })
    }

    /// Permanently apply all changes made within the transaction.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::Closed);
        }
        self.client.execute("COMMIT", &[])?;
        self.closed = true;
        Ok(())
    }

    /// Discard all changes made within the transaction.
    pub fn rollback(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::Closed);
        }
        self.client.execute("ROLLBACK", &[])?;
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl PgExecutor for Transaction {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, MigrateError> {
        if self.closed {
            return Err(TransactionError::Closed.into());
        }
        self.client
            .execute(query, params)
            .map_err(MigrateError::Database)
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, MigrateError> {
        if self.closed {
            return Err(TransactionError::Closed.into());
        }
        self.client
            .query_one(query, params)
            .map_err(MigrateError::Database)
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, MigrateError> {
        if self.closed {
            return Err(TransactionError::Closed.into());
        }
        self.client
            .query(query, params)
            .map_err(MigrateError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_error_display() {
        let err = TransactionError::Closed;
        assert!(err
            .to_string()
            .contains("already been committed or rolled back"));
    }

    #[test]
    fn test_transaction_error_conversion() {
        let err: MigrateError = TransactionError::Closed.into();
        assert!(err.to_string().contains("already been committed"));
    }
}
