//! Driver Interface and Connection Manager
//!
//! This module defines the narrow driver surface the batch pipeline consumes:
//! - [`SqlDriver::connect`] opens a pool for one resolved descriptor
//! - [`Request`] carries bound parameters and an optional timeout
//! - [`ConnectionPool::query`] runs one statement and returns every result set
//! - [`ConnectionPool::close`] releases the pool
//!
//! # Scoped Acquisition
//! [`with_pool`] is the only place pools are opened by the pipeline. It closes the pool on
//! every exit path, so a work item can never leave a connection behind.
//!
//! # Engine Implementations
//! - [`sqlserver`]: Microsoft SQL Server over TDS (tiberius)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::ops::AsyncFnOnce;
use std::time::Duration;

use crate::config::ConnectionDescriptor;
use crate::error::Result;

pub mod params;
pub mod sqlserver;

pub use params::{bind_parameters, BoundParameter, ParameterType, QueryParameter, SqlValue};

/// One result row: column name to JSON value, in server column order
pub type Row = Map<String, Value>;

/// Raw result of one statement execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    /// Every result set the statement produced, in order
    pub recordsets: Vec<Vec<Row>>,

    /// One count per statement, in order
    pub rows_affected: Vec<u64>,
}

impl QueryOutcome {
    /// Build an outcome for statements that return rows; each count is its set's row count
    #[must_use]
    pub fn from_recordsets(recordsets: Vec<Vec<Row>>) -> Self {
        let rows_affected = recordsets.iter().map(|set| set.len() as u64).collect();
        Self { recordsets, rows_affected }
    }

    /// Build an outcome for statements that return no rows, from server-reported counts
    #[must_use]
    pub const fn affected(rows_affected: Vec<u64>) -> Self {
        Self { recordsets: Vec::new(), rows_affected }
    }

    /// The first result set (empty when the statement produced none)
    #[must_use]
    pub fn recordset(&self) -> &[Row] {
        self.recordsets.first().map_or(&[], Vec::as_slice)
    }

    /// Total rows across all result sets
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.recordsets.iter().map(Vec::len).sum()
    }
}

/// A prepared request: bound parameters plus an optional timeout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    /// Parameters in declaration order
    pub parameters: Vec<BoundParameter>,

    /// Per-request timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create an empty request
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bound parameter
    pub fn input(&mut self, param: BoundParameter) -> &mut Self {
        self.parameters.push(param);
        self
    }

    /// Set the timeout in milliseconds; zero leaves the request without a timeout
    pub fn with_timeout(&mut self, timeout_ms: u64) -> &mut Self {
        self.timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
        self
    }
}

/// An open connection pool for one work item
///
/// Futures are `Send` so a pipeline can be driven from any tokio runtime flavour.
pub trait ConnectionPool: Send {
    /// Execute `sql` with the request's parameters and timeout
    ///
    /// Timeouts and server errors both surface as `QueryFailed`.
    fn query(
        &mut self,
        sql: &str,
        request: &Request,
    ) -> impl Future<Output = Result<QueryOutcome>> + Send;

    /// Close the pool and its connections
    fn close(self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens pools from resolved connection descriptors
pub trait SqlDriver: Sync {
    type Pool: ConnectionPool;

    /// Open a pool; failures surface as `ConnectionFailed`
    fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> impl Future<Output = Result<Self::Pool>> + Send;
}

/// Open a pool, run `body` against it, and close the pool on every exit path
///
/// A failed close is logged and swallowed: it never masks the body's error, and the pool
/// handle is consumed either way.
pub async fn with_pool<D, T, F>(driver: &D, descriptor: &ConnectionDescriptor, body: F) -> Result<T>
where
    D: SqlDriver,
    F: AsyncFnOnce(&mut D::Pool) -> Result<T>,
{
    let mut pool = driver.connect(descriptor).await?;
    tracing::debug!(server = %descriptor.server, database = %descriptor.database, "pool opened");

    let result = body(&mut pool).await;

    match pool.close().await {
        Ok(()) => tracing::debug!("pool closed"),
        Err(e) => tracing::warn!(error = %e, "failed to close pool"),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(n: i64) -> Row {
        let mut map = Map::new();
        map.insert("n".to_string(), json!(n));
        map
    }

    #[test]
    fn test_outcome_counts() {
        let outcome = QueryOutcome::from_recordsets(vec![vec![row(1), row(2)], vec![], vec![row(3)]]);
        assert_eq!(outcome.rows_affected, vec![2, 0, 1]);
        assert_eq!(outcome.recordset().len(), 2);
        assert_eq!(outcome.row_count(), 3);
    }

    #[test]
    fn test_outcome_without_recordsets() {
        let outcome = QueryOutcome::default();
        assert!(outcome.recordset().is_empty());
        assert_eq!(outcome.row_count(), 0);

        let outcome = QueryOutcome::affected(vec![3, 1]);
        assert!(outcome.recordsets.is_empty());
        assert_eq!(outcome.rows_affected, vec![3, 1]);
        assert_eq!(outcome.row_count(), 0);
    }

    #[test]
    fn test_request_timeout() {
        let mut request = Request::new();
        request.with_timeout(1500);
        assert_eq!(request.timeout, Some(Duration::from_millis(1500)));

        request.with_timeout(0);
        assert_eq!(request.timeout, None);
    }
}
