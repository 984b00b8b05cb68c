//! Result Mapper
//!
//! Turns a [`QueryOutcome`] into output items tagged with the originating work-item index.
//!
//! - Per row: one item per row, across every result set, in server order
//! - Aggregated (`executeQuery` only): a single item
//!   `{"recordset": [...], "rowsAffected": [...], "recordsets": [[...], ...]}`
//!
//! Listing operations are always mapped per row.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::engine::{QueryOutcome, Row};
use crate::executor::Operation;
use crate::output::OutputItem;

/// How rows of a statement result become output items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowGranularity {
    /// One output item per row
    #[default]
    #[serde(rename = "eachRow")]
    PerRow,
    /// One output item for the whole statement result
    #[serde(rename = "allRows")]
    Aggregated,
}

impl RowGranularity {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PerRow => "eachRow",
            Self::Aggregated => "allRows",
        }
    }
}

impl fmt::Display for RowGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eachRow" => Ok(Self::PerRow),
            "allRows" => Ok(Self::Aggregated),
            other => Err(format!("unknown return type '{other}' (expected eachRow or allRows)")),
        }
    }
}

/// Map a statement result to output items for work item `item_index`
#[must_use]
pub fn map_results(
    outcome: QueryOutcome,
    operation: Operation,
    granularity: RowGranularity,
    item_index: usize,
) -> Vec<OutputItem> {
    let granularity =
        if operation.is_listing() { RowGranularity::PerRow } else { granularity };

    match granularity {
        RowGranularity::PerRow => outcome
            .recordsets
            .into_iter()
            .flatten()
            .map(|row| OutputItem::new(row, item_index))
            .collect(),
        RowGranularity::Aggregated => vec![OutputItem::new(aggregate(outcome), item_index)],
    }
}

fn aggregate(outcome: QueryOutcome) -> Map<String, Value> {
    let recordset = outcome.recordset().to_vec();
    let QueryOutcome { recordsets, rows_affected } = outcome;

    let mut json = Map::new();
    json.insert("recordset".to_string(), rows_to_json(recordset));
    json.insert("rowsAffected".to_string(), Value::from(rows_affected));
    json.insert(
        "recordsets".to_string(),
        Value::Array(recordsets.into_iter().map(rows_to_json).collect()),
    );
    json
}

fn rows_to_json(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}
