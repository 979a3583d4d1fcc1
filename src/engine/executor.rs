//! SQL execution boundary.
//!
//! The translator emits SQL strings; everything touching a live database goes
//! through [`SqlExecutor`]. The provided [`PgExecutor`] runs against a
//! deadpool-managed PostgreSQL pool; tests substitute their own
//! implementation.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::{NoTls, SimpleQueryMessage};

use crate::error::{SparqlError, SparqlResult};

/// One result row: column names plus text values (`None` = SQL NULL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlRow {
    pub columns: Vec<String>,
    pub values: Vec<Option<String>>,
}

impl SqlRow {
    pub fn new(columns: Vec<String>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    pub fn get_named(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.get(idx))
    }
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run one SELECT and materialize the row set.
    async fn query(&self, sql: &str) -> SparqlResult<Vec<SqlRow>>;

    /// Run one data-modifying statement.
    async fn execute(&self, sql: &str) -> SparqlResult<u64>;

    /// Run a statement sequence inside a single transaction, in order.
    async fn execute_transactional(&self, statements: &[String]) -> SparqlResult<()>;
}

/// PostgreSQL executor over a deadpool connection pool.
pub struct PgExecutor {
    pool: Pool,
}

impl PgExecutor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build an executor from a database URL with a small default pool.
    pub fn from_url(database_url: &str) -> SparqlResult<Self> {
        let pg_config: tokio_postgres::Config = database_url
            .parse()
            .map_err(|e: tokio_postgres::Error| SparqlError::Execution(e.to_string()))?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(16)
            .build()
            .map_err(|e| SparqlError::Execution(e.to_string()))?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn query(&self, sql: &str) -> SparqlResult<Vec<SqlRow>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SparqlError::Execution(e.to_string()))?;
        let messages = client
            .simple_query(sql)
            .await
            .map_err(|e| SparqlError::Execution(e.to_string()))?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let columns: Vec<String> =
                    row.columns().iter().map(|c| c.name().to_string()).collect();
                let values: Vec<Option<String>> = (0..row.len())
                    .map(|idx| row.get(idx).map(|v| v.to_string()))
                    .collect();
                rows.push(SqlRow::new(columns, values));
            }
        }
        Ok(rows)
    }

    async fn execute(&self, sql: &str) -> SparqlResult<u64> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SparqlError::Execution(e.to_string()))?;
        client
            .execute(sql, &[])
            .await
            .map_err(|e| SparqlError::Execution(e.to_string()))
    }

    async fn execute_transactional(&self, statements: &[String]) -> SparqlResult<()> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| SparqlError::Execution(e.to_string()))?;
        let transaction = client
            .transaction()
            .await
            .map_err(|e| SparqlError::Execution(e.to_string()))?;
        for statement in statements {
            transaction
                .batch_execute(statement)
                .await
                .map_err(|e| SparqlError::Execution(e.to_string()))?;
        }
        transaction
            .commit()
            .await
            .map_err(|e| SparqlError::Execution(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_lookup_by_name_and_index() {
        let row = SqlRow::new(
            vec!["x".to_string(), "n".to_string()],
            vec![Some("ex:alice".to_string()), None],
        );
        assert_eq!(row.get(0), Some("ex:alice"));
        assert_eq!(row.get(1), None);
        assert_eq!(row.get_named("x"), Some("ex:alice"));
        assert_eq!(row.get_named("n"), None);
        assert_eq!(row.get_named("missing"), None);
    }
}
