//! Batch Runner and Failure Isolator
//!
//! Processes work items strictly in input order, one pool at a time.
//!
//! Each item moves through
//! `Start → ResolveConfig → OpenConnection → Execute → MapResults → Release → Done`,
//! dropping to `Failed` from any stage. The pool is closed on every path once it is open.
//!
//! On failure the batch either records `{"error": message}` for the item and moves on
//! (`continue_on_fail`), or stops and returns [`BatchAborted`] carrying everything emitted
//! so far.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::Instrument;

use crate::config::{resolve_descriptor, ConnectionOverride, StoredCredentials};
use crate::engine::{bind_parameters, with_pool, QueryParameter, SqlDriver};
use crate::error::{BatchAborted, BatchError, Result};
use crate::executor::{execute, statement_for, AdditionalFields, ExecutionOptions, Operation};
use crate::mapper::map_results;
use crate::output::OutputItem;

/// One unit of input: per-item connection override plus statement details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkItem {
    /// Fields that replace the stored credentials for this item only
    pub connection: ConnectionOverride,

    /// Statement text for `executeQuery`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Named parameters for `executeQuery`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<QueryParameter>,

    /// Extra columns for listing operations
    pub additional_fields: AdditionalFields,

    pub options: ExecutionOptions,
}

impl WorkItem {
    /// A freeform work item with no override
    pub fn freeform(sql: impl Into<String>) -> Self {
        Self { query: Some(sql.into()), ..Self::default() }
    }

    /// Add a named parameter
    #[must_use]
    pub fn with_parameter(mut self, param: QueryParameter) -> Self {
        self.parameters.push(param);
        self
    }
}

/// Batch-wide settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub operation: Operation,

    /// Record failed items as error items instead of aborting the batch
    pub continue_on_fail: bool,
}

impl BatchSettings {
    #[must_use]
    pub const fn new(operation: Operation) -> Self {
        Self { operation, continue_on_fail: false }
    }

    #[must_use]
    pub const fn continue_on_fail(mut self, enabled: bool) -> Self {
        self.continue_on_fail = enabled;
        self
    }
}

/// Processing stage of a single work item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStage {
    Start,
    ResolveConfig,
    OpenConnection,
    Execute,
    MapResults,
    Release,
    Done,
    Failed,
}

impl fmt::Display for ItemStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::ResolveConfig => "resolve_config",
            Self::OpenConnection => "open_connection",
            Self::Execute => "execute",
            Self::MapResults => "map_results",
            Self::Release => "release",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Run every work item against `driver` using the resolved `credentials`
///
/// Output order follows input order; every item is tagged with its input index.
pub async fn run_batch<D: SqlDriver>(
    driver: &D,
    credentials: &StoredCredentials,
    items: &[WorkItem],
    settings: &BatchSettings,
) -> std::result::Result<Vec<OutputItem>, BatchAborted> {
    tracing::info!(
        operation = %settings.operation,
        items = items.len(),
        continue_on_fail = settings.continue_on_fail,
        "starting batch"
    );

    let mut outputs = Vec::new();

    for (index, item) in items.iter().enumerate() {
        let span = tracing::info_span!("item", index);
        let result = process_item(driver, credentials, item, index, settings.operation)
            .instrument(span)
            .await;

        match result {
            Ok(mut items_out) => outputs.append(&mut items_out),
            Err(error) if settings.continue_on_fail => {
                tracing::warn!(
                    index,
                    code = error.error_code(),
                    error = %error,
                    "item failed, continuing"
                );
                outputs.push(OutputItem::error(index, error.message()));
            }
            Err(error) => {
                tracing::warn!(
                    index,
                    code = error.error_code(),
                    error = %error,
                    "item failed, aborting batch"
                );
                return Err(BatchAborted { item_index: index, error, completed: outputs });
            }
        }
    }

    tracing::info!(outputs = outputs.len(), "batch complete");
    Ok(outputs)
}

async fn process_item<D: SqlDriver>(
    driver: &D,
    credentials: &StoredCredentials,
    item: &WorkItem,
    index: usize,
    operation: Operation,
) -> Result<Vec<OutputItem>> {
    let mut stage = ItemStage::Start;
    tracing::debug!(%stage);

    stage = ItemStage::ResolveConfig;
    tracing::debug!(%stage);
    let descriptor = resolve_descriptor(credentials, &item.connection);
    let statement = statement_for(operation, item.query.as_deref(), &item.additional_fields)
        .inspect_err(|e| log_failure(stage, e))?;
    let params = if operation.is_listing() {
        Vec::new()
    } else {
        bind_parameters(&item.parameters, index).inspect_err(|e| log_failure(stage, e))?
    };

    stage = ItemStage::OpenConnection;
    tracing::debug!(%stage, server = %descriptor.server, database = %descriptor.database);

    let outcome = with_pool(driver, &descriptor, async |pool| {
        stage = ItemStage::Execute;
        tracing::debug!(%stage);
        execute(pool, &statement, params, &item.options).await
    })
    .await;

    tracing::debug!(stage = %ItemStage::Release);
    let outcome = outcome.inspect_err(|e| log_failure(stage, e))?;

    tracing::debug!(stage = %ItemStage::MapResults, rows = outcome.row_count());
    let mapped = map_results(outcome, operation, item.options.return_type, index);

    tracing::debug!(stage = %ItemStage::Done, outputs = mapped.len());
    Ok(mapped)
}

fn log_failure(at: ItemStage, error: &BatchError) {
    tracing::debug!(stage = %ItemStage::Failed, at = %at, code = error.error_code());
}
