//! Parameter Binder
//!
//! Maps a declared parameter type name onto a typed value the driver can bind.
//! The supported set is closed: `Int`, `BigInt`, `VarChar`, `NVarChar`, `Text`, `Bit`,
//! `Float`, `Decimal`, `DateTime`, `Date`. Anything else fails the work item with
//! `UnsupportedParameterType` before a connection is opened.
//!
//! Values arrive as strings (already resolved by the host). Non-character types are parsed
//! here; an empty value binds SQL NULL for those types.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BatchError, Result};

/// Declared logical type of a query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    Int,
    BigInt,
    VarChar,
    NVarChar,
    Text,
    Bit,
    Float,
    Decimal,
    DateTime,
    Date,
}

impl ParameterType {
    /// Every supported type, in declaration order
    pub const ALL: [Self; 10] = [
        Self::Int,
        Self::BigInt,
        Self::VarChar,
        Self::NVarChar,
        Self::Text,
        Self::Bit,
        Self::Float,
        Self::Decimal,
        Self::DateTime,
        Self::Date,
    ];

    /// Canonical type name as accepted in work items
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "Int",
            Self::BigInt => "BigInt",
            Self::VarChar => "VarChar",
            Self::NVarChar => "NVarChar",
            Self::Text => "Text",
            Self::Bit => "Bit",
            Self::Float => "Float",
            Self::Decimal => "Decimal",
            Self::DateTime => "DateTime",
            Self::Date => "Date",
        }
    }

    /// Look up a declared type name (case-sensitive, canonical names only)
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Look up a declared type name, failing the work item when it is unsupported
    pub fn lookup(name: &str, item_index: usize) -> Result<Self> {
        Self::from_name(name).ok_or_else(|| BatchError::unsupported_type(name, item_index))
    }

    /// Whether values of this type are passed through as strings
    #[must_use]
    pub const fn is_character(&self) -> bool {
        matches!(self, Self::VarChar | Self::NVarChar | Self::Text)
    }

    /// T-SQL type used when declaring a parameter bound with `value`
    #[must_use]
    pub fn sql_declaration(&self, value: &SqlValue) -> String {
        match self {
            Self::Int => "INT".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::VarChar | Self::Text => "VARCHAR(MAX)".to_string(),
            Self::NVarChar => "NVARCHAR(MAX)".to_string(),
            Self::Bit => "BIT".to_string(),
            Self::Float => "FLOAT".to_string(),
            Self::Decimal => {
                let scale = match value {
                    SqlValue::Decimal(Some(d)) => d.scale(),
                    _ => 0,
                };
                format!("DECIMAL(38, {scale})")
            }
            Self::DateTime => "DATETIME".to_string(),
            Self::Date => "DATE".to_string(),
        }
    }

    fn coerce(self, name: &str, raw: &str) -> Result<SqlValue> {
        let trimmed = raw.trim();
        let invalid = |detail: String| BatchError::invalid_parameter(name, detail);

        let value = match self {
            Self::VarChar | Self::NVarChar | Self::Text => SqlValue::String(raw.to_string()),
            _ if trimmed.is_empty() => SqlValue::null_of(self),
            Self::Int => SqlValue::Int(Some(
                trimmed.parse::<i32>().map_err(|e| invalid(format!("'{trimmed}' is not an Int: {e}")))?,
            )),
            Self::BigInt => SqlValue::BigInt(Some(
                trimmed
                    .parse::<i64>()
                    .map_err(|e| invalid(format!("'{trimmed}' is not a BigInt: {e}")))?,
            )),
            Self::Bit => SqlValue::Bit(Some(
                parse_bit(trimmed).ok_or_else(|| invalid(format!("'{trimmed}' is not a Bit")))?,
            )),
            Self::Float => SqlValue::Float(Some(
                trimmed
                    .parse::<f64>()
                    .map_err(|e| invalid(format!("'{trimmed}' is not a Float: {e}")))?,
            )),
            Self::Decimal => SqlValue::Decimal(Some(
                Decimal::from_str(trimmed)
                    .map_err(|e| invalid(format!("'{trimmed}' is not a Decimal: {e}")))?,
            )),
            Self::DateTime => SqlValue::DateTime(Some(
                parse_datetime(trimmed)
                    .ok_or_else(|| invalid(format!("'{trimmed}' is not a DateTime")))?,
            )),
            Self::Date => SqlValue::Date(Some(
                parse_date(trimmed).ok_or_else(|| invalid(format!("'{trimmed}' is not a Date")))?,
            )),
        };

        Ok(value)
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed parameter value ready for the driver
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(Option<i32>),
    BigInt(Option<i64>),
    String(String),
    Bit(Option<bool>),
    Float(Option<f64>),
    Decimal(Option<Decimal>),
    DateTime(Option<NaiveDateTime>),
    Date(Option<NaiveDate>),
}

impl SqlValue {
    fn null_of(kind: ParameterType) -> Self {
        match kind {
            ParameterType::Int => Self::Int(None),
            ParameterType::BigInt => Self::BigInt(None),
            ParameterType::Bit => Self::Bit(None),
            ParameterType::Float => Self::Float(None),
            ParameterType::Decimal => Self::Decimal(None),
            ParameterType::DateTime => Self::DateTime(None),
            ParameterType::Date => Self::Date(None),
            ParameterType::VarChar | ParameterType::NVarChar | ParameterType::Text => {
                Self::String(String::new())
            }
        }
    }

    /// Whether this value binds SQL NULL
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(
            self,
            Self::Int(None)
                | Self::BigInt(None)
                | Self::Bit(None)
                | Self::Float(None)
                | Self::Decimal(None)
                | Self::DateTime(None)
                | Self::Date(None)
        )
    }
}

/// A query parameter as declared in a work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParameter {
    /// Parameter name without the `@` sigil
    #[serde(default)]
    pub name: String,

    /// Declared type name (validated by the binder, not at parse time)
    #[serde(rename = "type", default = "default_type_name")]
    pub type_name: String,

    /// Resolved value; JSON numbers and booleans are accepted and stringified
    #[serde(default, deserialize_with = "value_as_string")]
    pub value: String,
}

impl QueryParameter {
    /// Create a parameter declaration
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), type_name: type_name.into(), value: value.into() }
    }
}

fn default_type_name() -> String {
    ParameterType::VarChar.as_str().to_string()
}

fn value_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// A parameter after type lookup and value coercion
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    /// Validated name, without the `@` sigil
    pub name: String,
    pub kind: ParameterType,
    pub value: SqlValue,
}

impl BoundParameter {
    /// T-SQL declaration fragment, e.g. `@id INT`
    #[must_use]
    pub fn declaration(&self) -> String {
        format!("@{} {}", self.name, self.kind.sql_declaration(&self.value))
    }
}

/// Bind declared parameters in declaration order
///
/// Fails on the first unsupported type, invalid name, or unparseable value.
pub fn bind_parameters(params: &[QueryParameter], item_index: usize) -> Result<Vec<BoundParameter>> {
    params
        .iter()
        .map(|param| {
            let kind = ParameterType::lookup(&param.type_name, item_index)?;
            let name = validate_name(&param.name)?;
            let value = kind.coerce(&name, &param.value)?;
            Ok(BoundParameter { name, kind, value })
        })
        .collect()
}

/// Validate a parameter name as a T-SQL variable identifier (leading `@` tolerated)
fn validate_name(raw: &str) -> Result<String> {
    let name = raw.trim().strip_prefix('@').unwrap_or(raw.trim());

    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '#');
    let valid_rest = chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '@' | '#' | '$'));

    if !valid_start || !valid_rest || name.chars().count() > 127 {
        return Err(BatchError::invalid_parameter(raw, "name is not a valid T-SQL identifier"));
    }

    Ok(name.to_string())
}

fn parse_bit(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

const DATETIME_FORMATS: [&str; 4] =
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];

/// RFC 3339 values are converted to UTC; naive values are taken as-is
fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| parse_date(value).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}
