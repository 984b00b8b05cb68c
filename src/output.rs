//! JSON Output Types
//!
//! This module defines the output item contract and the JSON envelope the CLI prints.
//!
//! # Output Contract
//! - Item: `{"json": {...}, "item": 0}` where `item` is the originating work-item index
//! - Success: `{"ok": true, "operation": "...", "data": [items], "meta": {...}}`
//! - Error: `{"ok": false, "operation": "...", "error": {"code": "...", "message": "...", "item": 0}, "data": [items]}`
//!
//! Stdout carries exactly one envelope per run; logs go to stderr.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BatchAborted, BatchError};

/// One output record, paired with the work item that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
    /// Payload: column name to value, the aggregated bundle, or `{"error": ...}`
    pub json: Map<String, Value>,

    /// Index of the originating work item
    pub item: usize,

    /// Set only by [`OutputItem::error`]; never serialized
    #[serde(skip)]
    failed: bool,
}

impl OutputItem {
    /// Create an output item from a payload
    #[must_use]
    pub const fn new(json: Map<String, Value>, item: usize) -> Self {
        Self { json, item, failed: false }
    }

    /// Create the error item recorded in place of a failed work item
    pub fn error(item: usize, message: impl Into<String>) -> Self {
        let mut json = Map::new();
        json.insert("error".to_string(), Value::String(message.into()));
        Self { json, item, failed: true }
    }

    /// Whether this item was recorded in place of a failed work item
    ///
    /// A result row that happens to have an `error` column is not a failure.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.failed
    }
}

/// Success envelope for a completed batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope {
    /// Always true for success envelopes
    pub ok: bool,

    /// Operation that was executed (executeQuery, listAll, listUser, listSystem)
    pub operation: String,

    /// Output items in emission order
    pub data: Vec<OutputItem>,

    /// Execution metadata
    pub meta: Metadata,
}

impl SuccessEnvelope {
    /// Create a new success envelope
    pub fn new(operation: impl Into<String>, data: Vec<OutputItem>, meta: Metadata) -> Self {
        Self { ok: true, operation: operation.into(), data, meta }
    }
}

/// Error envelope for an aborted batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Operation that was attempted
    pub operation: String,

    /// Error information
    pub error: ErrorInfo,

    /// Items emitted before the batch stopped
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<OutputItem>,
}

impl ErrorEnvelope {
    /// Create a new error envelope
    pub fn new(operation: impl Into<String>, error: ErrorInfo, data: Vec<OutputItem>) -> Self {
        Self { ok: false, operation: operation.into(), error, data }
    }

    /// Create error envelope from a standalone error (no item context)
    pub fn from_error(operation: impl Into<String>, err: &BatchError) -> Self {
        Self::new(operation, ErrorInfo::from_error(err, None), Vec::new())
    }

    /// Create error envelope from an aborted batch, keeping completed items
    pub fn from_aborted(operation: impl Into<String>, aborted: BatchAborted) -> Self {
        let info = ErrorInfo::from_error(&aborted.error, Some(aborted.item_index));
        Self::new(operation, info, aborted.completed)
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "CONNECTION_FAILED", "UNSUPPORTED_PARAMETER_TYPE")
    pub code: String,

    /// Human-readable error message (no credentials)
    pub message: String,

    /// Offending work-item index, when the failure is item-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<usize>,
}

impl ErrorInfo {
    /// Create a new error info
    pub fn new(code: impl Into<String>, message: impl Into<String>, item: Option<usize>) -> Self {
        Self { code: code.into(), message: message.into(), item }
    }

    fn from_error(err: &BatchError, item: Option<usize>) -> Self {
        Self::new(err.error_code(), err.message(), item)
    }
}

/// Execution metadata included in success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Wall-clock time for the whole batch in milliseconds
    pub execution_ms: u64,

    /// Number of work items read
    pub items_in: usize,

    /// Number of output items emitted (error items included)
    pub items_out: usize,

    /// Number of work items that were converted to error items
    #[serde(skip_serializing_if = "is_zero")]
    pub items_failed: usize,
}

impl Metadata {
    /// Build metadata from the emitted items
    #[must_use]
    pub fn from_items(execution_ms: u64, items_in: usize, data: &[OutputItem]) -> Self {
        Self {
            execution_ms,
            items_in,
            items_out: data.len(),
            items_failed: data.iter().filter(|item| item.is_error()).count(),
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(n: &usize) -> bool {
    *n == 0
}
