//! Query Executor
//!
//! Chooses the statement for a work item and runs it on an open pool.
//!
//! # Statement Modes
//! - `executeQuery`: the caller's statement, sent verbatim with its bound parameters
//! - `listAll` / `listUser` / `listSystem`: a synthesized `sys.databases` query built only from
//!   fixed literals, never from caller input
//!
//! A positive `timeout` in [`ExecutionOptions`] is applied to the request in both modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::engine::{BoundParameter, ConnectionPool, QueryOutcome, Request};
use crate::error::{BatchError, Result};
use crate::mapper::RowGranularity;

const SYSTEM_DATABASES: &str = "('master','tempdb','model','msdb')";

/// Batch operation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// Run the caller's statement
    ExecuteQuery,
    /// List every database
    ListAll,
    /// List user databases only
    ListUser,
    /// List the four system databases only
    ListSystem,
}

impl Operation {
    pub const ALL: [Self; 4] = [Self::ExecuteQuery, Self::ListAll, Self::ListUser, Self::ListSystem];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ExecuteQuery => "executeQuery",
            Self::ListAll => "listAll",
            Self::ListUser => "listUser",
            Self::ListSystem => "listSystem",
        }
    }

    /// Whether this operation runs a synthesized database listing
    #[must_use]
    pub const fn is_listing(&self) -> bool {
        !matches!(self, Self::ExecuteQuery)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|op| op.as_str() == s).ok_or_else(|| {
            format!(
                "unknown operation '{s}' (expected one of: executeQuery, listAll, listUser, listSystem)"
            )
        })
    }
}

/// Extra `sys.databases` columns for listing operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdditionalFields {
    /// Append `database_id`
    pub include_database_id: bool,
    /// Append `create_date`
    pub include_create_date: bool,
    /// Append `state_desc, user_access_desc, is_read_only`
    pub include_state: bool,
}

/// Per-item execution options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    /// Request timeout in milliseconds; absent or zero means no timeout
    #[serde(rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Row granularity for `executeQuery` results
    pub return_type: RowGranularity,
}

/// Synthesize the database listing statement for a listing operation
///
/// Columns are appended in a fixed order: `name`, then `database_id`, `create_date`, and
/// `state_desc, user_access_desc, is_read_only` as requested.
pub fn build_list_databases_query(operation: Operation, fields: &AdditionalFields) -> Result<String> {
    let mut columns = vec!["name"];
    if fields.include_database_id {
        columns.push("database_id");
    }
    if fields.include_create_date {
        columns.push("create_date");
    }
    if fields.include_state {
        columns.extend(["state_desc", "user_access_desc", "is_read_only"]);
    }

    let filter = match operation {
        Operation::ListAll => String::new(),
        Operation::ListUser => format!(" WHERE name NOT IN {SYSTEM_DATABASES}"),
        Operation::ListSystem => format!(" WHERE name IN {SYSTEM_DATABASES}"),
        Operation::ExecuteQuery => {
            return Err(BatchError::invalid_input(
                "executeQuery does not synthesize a listing statement",
            ))
        }
    };

    Ok(format!("SELECT {} FROM sys.databases{filter} ORDER BY name", columns.join(", ")))
}

/// Statement text for one work item
///
/// `executeQuery` requires a non-blank `query`, which is returned untouched.
pub fn statement_for(
    operation: Operation,
    query: Option<&str>,
    fields: &AdditionalFields,
) -> Result<String> {
    if operation.is_listing() {
        return build_list_databases_query(operation, fields);
    }

    match query {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(BatchError::invalid_input("executeQuery requires a non-empty 'query'")),
    }
}

/// Run `statement` on an open pool
///
/// Parameters are added in order; a positive timeout is set on the request first.
pub async fn execute<P: ConnectionPool>(
    pool: &mut P,
    statement: &str,
    params: Vec<BoundParameter>,
    options: &ExecutionOptions,
) -> Result<QueryOutcome> {
    let mut request = Request::new();
    if let Some(timeout_ms) = options.timeout_ms {
        request.with_timeout(timeout_ms);
    }
    for param in params {
        request.input(param);
    }

    tracing::debug!(
        parameters = request.parameters.len(),
        timeout_ms = options.timeout_ms.unwrap_or(0),
        "executing statement"
    );
    pool.query(statement, &request).await
}
