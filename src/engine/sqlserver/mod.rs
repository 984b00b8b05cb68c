//! SQL Server Driver Implementation
//!
//! This module implements [`SqlDriver`] and [`ConnectionPool`] for Microsoft SQL Server.
//!
//! # Features
//! - SQL Server authentication over TCP
//! - Named instances resolved through the SQL Browser service
//! - Optional TLS (`encrypt`) with optional certificate trust
//! - Named parameters passed through `sp_executesql`
//! - Every result set of a multi-statement batch is returned
//!
//! # Implementation Notes
//! - Uses `tiberius` (async TDS driver) on tokio TCP via the `tokio-util` compat layer
//! - Parameterless statements are sent verbatim as a SQL batch
//! - Timeouts enforced via `tokio::time::timeout`
//! - Binary data is Base64-encoded for JSON safety
//! - `DATETIME`/`DATETIME2` are rendered as ISO-8601 without offset; `DATETIMEOFFSET` as RFC 3339
//! - Batches that return no rows run through `Client::execute`, so `rows_affected` carries the
//!   server's per-statement counts; row-returning batches report each result set's row count

use std::borrow::Cow;

use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use tiberius::numeric::Numeric;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, SqlBrowser, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::ConnectionDescriptor;
use crate::engine::params::{BoundParameter, SqlValue};
use crate::engine::{ConnectionPool, QueryOutcome, Request, Row, SqlDriver};
use crate::error::{BatchError, Result};

/// SQL Server driver
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDriver;

impl SqlDriver for SqlServerDriver {
    type Pool = SqlServerPool;

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<SqlServerPool> {
        let config = build_config(descriptor);

        let tcp = if descriptor.instance_name().is_some() {
            TcpStream::connect_named(&config).await.map_err(|e| {
                BatchError::connection_failed(format!(
                    "Failed to resolve instance on {}: {}",
                    descriptor.server,
                    driver_message(e)
                ))
            })?
        } else {
            TcpStream::connect(config.get_addr()).await.map_err(|e| {
                BatchError::connection_failed(format!(
                    "Failed to connect to {}:{} - {e}",
                    descriptor.server, descriptor.port
                ))
            })?
        };
        tcp.set_nodelay(true).ok();

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| BatchError::connection_failed(driver_message(e)))?;

        Ok(SqlServerPool { client })
    }
}

/// An open SQL Server connection owned by one work item
pub struct SqlServerPool {
    client: Client<Compat<TcpStream>>,
}

impl ConnectionPool for SqlServerPool {
    async fn query(&mut self, sql: &str, request: &Request) -> Result<QueryOutcome> {
        match request.timeout {
            Some(timeout) => {
                tokio::time::timeout(timeout, run_statement(&mut self.client, sql, request))
                    .await
                    .map_err(|_| {
                        BatchError::query_failed(format!(
                            "Query exceeded timeout of {}ms",
                            timeout.as_millis()
                        ))
                    })?
            }
            None => run_statement(&mut self.client, sql, request).await,
        }
    }

    async fn close(self) -> Result<()> {
        self.client.close().await.map_err(|e| BatchError::release_failed(driver_message(e)))
    }
}

/// Build the tiberius config for a resolved descriptor
///
/// `encrypt = true` requires TLS for the whole session. `encrypt = false` maps to
/// [`EncryptionLevel::Off`]: the login packet is still encrypted and servers that force
/// encryption are still reachable, but the rest of the session is plaintext.
fn build_config(descriptor: &ConnectionDescriptor) -> Config {
    let mut config = Config::new();
    config.host(&descriptor.server);
    config.port(descriptor.port);
    config.database(&descriptor.database);
    config.authentication(AuthMethod::sql_server(&descriptor.user, &descriptor.password));

    config.encryption(encryption_level(descriptor.encrypt));
    if descriptor.trust_server_certificate {
        config.trust_cert();
    }
    if let Some(instance) = descriptor.instance_name() {
        config.instance_name(instance);
    }

    config
}

const fn encryption_level(encrypt: bool) -> EncryptionLevel {
    if encrypt {
        EncryptionLevel::Required
    } else {
        EncryptionLevel::Off
    }
}

async fn run_statement(
    client: &mut Client<Compat<TcpStream>>,
    sql: &str,
    request: &Request,
) -> Result<QueryOutcome> {
    let statement = sql.to_string();
    let declarations = declaration_list(&request.parameters);

    let (text, args) = if request.parameters.is_empty() {
        (statement.clone(), Vec::new())
    } else {
        let mut args: Vec<&dyn ToSql> = vec![&statement, &declarations];
        args.extend(request.parameters.iter().map(|p| &p.value as &dyn ToSql));
        (executesql_statement(&request.parameters), args)
    };

    if !returns_rows(sql) {
        let result = client
            .execute(text, &args)
            .await
            .map_err(|e| BatchError::query_failed(driver_message(e)))?;
        return Ok(QueryOutcome::affected(result.rows_affected().to_vec()));
    }

    let stream = if args.is_empty() {
        client.simple_query(text).await
    } else {
        client.query(text, &args).await
    }
    .map_err(|e| BatchError::query_failed(driver_message(e)))?;

    let results =
        stream.into_results().await.map_err(|e| BatchError::query_failed(driver_message(e)))?;

    let recordsets: Vec<Vec<Row>> =
        results.iter().map(|rows| rows.iter().map(convert_row).collect()).collect();
    Ok(QueryOutcome::from_recordsets(recordsets))
}

/// Keywords that open a batch producing no result sets
const NON_QUERY_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "TRUNCATE", "CREATE", "ALTER", "DROP", "GRANT", "REVOKE",
    "DENY",
];

/// Keywords that may produce a result set anywhere in a batch
const ROW_KEYWORDS: &[&str] = &["SELECT", "OUTPUT", "EXEC", "EXECUTE"];

/// Whether a batch may return rows
///
/// Only a batch that opens with a DML/DDL keyword and never mentions a row-producing keyword is
/// treated as row-less. Everything else takes the row-returning path, so no rows are ever lost.
fn returns_rows(sql: &str) -> bool {
    let words = bare_words(sql);
    let Some(first) = words.first() else {
        return true;
    };
    !NON_QUERY_KEYWORDS.contains(&first.as_str())
        || words.iter().any(|w| ROW_KEYWORDS.contains(&w.as_str()))
}

/// Upper-cased words outside comments, string literals, and quoted identifiers
fn bare_words(sql: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '#') {
            current.push(c.to_ascii_uppercase());
            continue;
        }
        if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        match c {
            '-' if chars.peek() == Some(&'-') => skip_past(&mut chars, '\n'),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            '\'' => skip_past(&mut chars, '\''),
            '"' => skip_past(&mut chars, '"'),
            '[' => skip_past(&mut chars, ']'),
            _ => {}
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn skip_past(chars: &mut impl Iterator<Item = char>, end: char) {
    for c in chars.by_ref() {
        if c == end {
            break;
        }
    }
}

/// `sp_executesql` call binding each named parameter to its positional slot
///
/// `@P1` carries the user statement verbatim and `@P2` its declaration list, so the statement
/// can reference `@name` directly.
fn executesql_statement(params: &[BoundParameter]) -> String {
    let mut sql = String::from("EXEC sp_executesql @P1, @P2");
    for (i, param) in params.iter().enumerate() {
        sql.push_str(&format!(", @{} = @P{}", param.name, i + 3));
    }
    sql
}

/// Declaration list passed as the `@params` argument of `sp_executesql`
fn declaration_list(params: &[BoundParameter]) -> String {
    params.iter().map(BoundParameter::declaration).collect::<Vec<_>>().join(", ")
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            Self::Int(v) => ColumnData::I32(*v),
            Self::BigInt(v) => ColumnData::I64(*v),
            Self::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            Self::Bit(v) => ColumnData::Bit(*v),
            Self::Float(v) => ColumnData::F64(*v),
            Self::Decimal(v) => ColumnData::Numeric(
                v.map(|d| Numeric::new_with_scale(d.mantissa(), d.scale() as u8)),
            ),
            // Sent as text; the declared DATETIME/DATE type converts it server-side
            Self::DateTime(v) => ColumnData::String(
                v.map(|dt| Cow::Owned(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())),
            ),
            Self::Date(v) => {
                ColumnData::String(v.map(|d| Cow::Owned(d.format("%Y-%m-%d").to_string())))
            }
        }
    }
}

/// Convert a tiberius row to an ordered JSON object
fn convert_row(row: &tiberius::Row) -> Row {
    row.cells()
        .enumerate()
        .map(|(i, (column, data))| (column.name().to_string(), cell_to_json(row, i, data)))
        .collect()
}

fn cell_to_json(row: &tiberius::Row, idx: usize, data: &ColumnData<'_>) -> Value {
    match data {
        ColumnData::Bit(Some(b)) => Value::Bool(*b),
        ColumnData::U8(Some(v)) => Value::from(*v),
        ColumnData::I16(Some(v)) => Value::from(*v),
        ColumnData::I32(Some(v)) => Value::from(*v),
        ColumnData::I64(Some(v)) => Value::from(*v),
        // NaN/Infinity become null
        ColumnData::F32(Some(v)) => float_to_json(f64::from(*v)),
        ColumnData::F64(Some(v)) => float_to_json(*v),
        ColumnData::Numeric(Some(n)) => numeric_to_json(n.value(), n.scale()),
        ColumnData::String(Some(s)) => Value::String(s.to_string()),
        ColumnData::Guid(Some(g)) => Value::String(g.to_string()),
        ColumnData::Xml(Some(xml)) => Value::String(xml.to_string()),
        ColumnData::Binary(Some(bytes)) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        ColumnData::DateTime(Some(_))
        | ColumnData::SmallDateTime(Some(_))
        | ColumnData::DateTime2(Some(_)) => typed(row, idx, |v: NaiveDateTime| {
            v.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
        }),
        ColumnData::DateTimeOffset(Some(_)) => {
            typed(row, idx, |v: DateTime<FixedOffset>| v.to_rfc3339())
        }
        ColumnData::Date(Some(_)) => typed(row, idx, |v: NaiveDate| v.format("%Y-%m-%d").to_string()),
        ColumnData::Time(Some(_)) => typed(row, idx, |v: NaiveTime| v.format("%H:%M:%S%.f").to_string()),
        _ => Value::Null,
    }
}

/// Read a cell through chrono and render it as a JSON string
fn typed<'a, T>(row: &'a tiberius::Row, idx: usize, render: impl FnOnce(T) -> String) -> Value
where
    T: tiberius::FromSql<'a>,
{
    row.try_get::<T, _>(idx).ok().flatten().map_or(Value::Null, |v| Value::String(render(v)))
}

fn float_to_json(v: f64) -> Value {
    Number::from_f64(v).map_or(Value::Null, Value::Number)
}

/// Render a DECIMAL/NUMERIC through `rust_decimal`, so whole values stay integers
///
/// Scales beyond `rust_decimal`'s 28 digits fall back to a float.
fn numeric_to_json(value: i128, scale: u8) -> Value {
    Decimal::try_from_i128_with_scale(value, u32::from(scale))
        .ok()
        .and_then(|d| d.normalize().to_string().parse::<Number>().ok())
        .map_or_else(|| float_to_json(value as f64 / 10f64.powi(i32::from(scale))), Value::Number)
}

/// Driver error text without the tiberius wrapper noise
///
/// Server errors (login failures, invalid object names) surface their server message verbatim.
fn driver_message(err: tiberius::error::Error) -> String {
    match err {
        tiberius::error::Error::Server(token) => token.message().to_string(),
        other => other.to_string(),
    }
}
