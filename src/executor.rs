//! Database execution seam.
//!
//! The [`PgExecutor`] trait abstracts statement execution so the same code
//! can run against a plain connection or inside a [`Transaction`]; migration
//! handlers only ever see the latter.

use may_postgres::types::ToSql;
use may_postgres::{Client, Row};

use crate::error::MigrateError;
use crate::transaction::{Transaction, TransactionError};

/// Trait for executing database operations.
pub trait PgExecutor {
    /// Execute a statement and return the number of rows affected.
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, MigrateError>;

    /// Execute a query expected to return exactly one row.
    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, MigrateError>;

    /// Execute a query and return all rows.
    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, MigrateError>;
}

/// Executor backed by a connected `may_postgres` client.
pub struct ClientExecutor {
    client: Client,
}

impl ClientExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Start a transaction on this connection.
    ///
    /// The transaction must be committed or rolled back explicitly.
    pub fn begin(&self) -> Result<Transaction, TransactionError> {
        Transaction::new(self.client.clone())
    }
}

impl PgExecutor for ClientExecutor {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, MigrateError> {
        self.client
            .execute(query, params)
            .map_err(MigrateError::Database)
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, MigrateError> {
        self.client
            .query_one(query, params)
            .map_err(MigrateError::Database)
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, MigrateError> {
        self.client
            .query(query, params)
            .map_err(MigrateError::Database)
    }
}
