//! In-memory driver for pipeline tests
//!
//! Behaviour is keyed off the resolved descriptor and statement text:
//! - server `offline`: connect fails with a login error
//! - server `sticky`: close fails
//! - statement containing `RAISERROR`: the query fails
//! - statement in `results`: that outcome is returned
//! - anything else: one row echoing the server, statement, and parameter count

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tsql_batch::{
    BatchError, ConnectionDescriptor, ConnectionPool, QueryOutcome, Request, Result, Row,
    SqlDriver, StoredCredentials,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect { server: String, database: String, port: u16 },
    Query { sql: String, params: Vec<String>, timeout: Option<Duration> },
    Close { server: String },
}

#[derive(Default, Clone)]
pub struct MockDriver {
    events: Arc<Mutex<Vec<Event>>>,
    results: Arc<HashMap<String, QueryOutcome>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(results: HashMap<String, QueryOutcome>) -> Self {
        Self { events: Arc::default(), results: Arc::new(results) }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.events().iter().filter(|e| matches!(e, Event::Connect { .. })).count()
    }

    pub fn closes(&self) -> usize {
        self.events().iter().filter(|e| matches!(e, Event::Close { .. })).count()
    }

    pub fn queries(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Query { sql, .. } => Some(sql),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct MockPool {
    driver: MockDriver,
    server: String,
}

impl SqlDriver for MockDriver {
    type Pool = MockPool;

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<MockPool> {
        if descriptor.server == "offline" {
            return Err(BatchError::connection_failed(format!(
                "Login failed for user '{}'.",
                descriptor.user
            )));
        }

        self.record(Event::Connect {
            server: descriptor.server.clone(),
            database: descriptor.database.clone(),
            port: descriptor.port,
        });
        Ok(MockPool { driver: self.clone(), server: descriptor.server.clone() })
    }
}

impl ConnectionPool for MockPool {
    async fn query(&mut self, sql: &str, request: &Request) -> Result<QueryOutcome> {
        self.driver.record(Event::Query {
            sql: sql.to_string(),
            params: request.parameters.iter().map(|p| p.declaration()).collect(),
            timeout: request.timeout,
        });

        if sql.contains("RAISERROR") {
            return Err(BatchError::query_failed("Invalid object name 'nope'."));
        }
        if let Some(outcome) = self.driver.results.get(sql) {
            return Ok(outcome.clone());
        }

        Ok(QueryOutcome::from_recordsets(vec![vec![row(json!({
            "server": self.server,
            "sql": sql,
            "params": request.parameters.len(),
        }))]]))
    }

    async fn close(self) -> Result<()> {
        self.driver.record(Event::Close { server: self.server.clone() });
        if self.server == "sticky" {
            return Err(BatchError::release_failed("connection reset by peer"));
        }
        Ok(())
    }
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn credentials() -> StoredCredentials {
    StoredCredentials {
        server: "db01".to_string(),
        user: "sa".to_string(),
        password: Some("secret".to_string()),
        ..StoredCredentials::default()
    }
}
