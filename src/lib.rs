//! tsql-batch - Batch T-SQL Execution for SQL Server
//!
//! tsql-batch runs a batch of work items against Microsoft SQL Server. Each item carries an
//! optional connection override, a statement (or a database-listing request), named
//! parameters, and execution options. Items are processed strictly in order, each on its own
//! connection pool, and every output record is tagged with the index of the item that
//! produced it.
//!
//! # Core Principles
//! - One pool per work item, always closed before the next item starts
//! - Per-item failure isolation: record the error and continue, or abort with partial results
//! - Freeform statements are sent verbatim; listing statements use fixed literals only
//! - JSON-only stdout, logs on stderr
//!
//! # Module Organization
//! - [`error`] - Error types and codes
//! - [`output`] - Output items and JSON envelopes
//! - [`config`] - Credential store and per-item connection resolution
//! - [`engine`] - Driver interface, parameter binding, and the SQL Server driver
//! - [`executor`] - Operation selection and statement execution
//! - [`mapper`] - Result-to-output mapping
//! - [`batch`] - Sequential batch runner with failure isolation
//! - [`logging`] - stderr tracing subscriber

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod logging;
pub mod mapper;
pub mod output;

pub use batch::{run_batch, BatchSettings, ItemStage, WorkItem};
pub use config::{
    list_credentials, remove_credentials, resolve_credentials, resolve_descriptor,
    save_credentials, ConfigLocation, ConnectionDescriptor, ConnectionOverride, CredentialStore,
    StoredCredentials,
};
pub use engine::sqlserver::SqlServerDriver;
pub use engine::{
    with_pool, BoundParameter, ConnectionPool, ParameterType, QueryOutcome, QueryParameter,
    Request, Row, SqlDriver, SqlValue,
};
pub use error::{BatchAborted, BatchError, Result};
pub use executor::{
    build_list_databases_query, execute, AdditionalFields, ExecutionOptions, Operation,
};
pub use mapper::{map_results, RowGranularity};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, OutputItem, SuccessEnvelope};
