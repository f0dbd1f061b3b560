//! Query execution
//!
//! Executors report failures as errors whose text is matched against the
//! configured error patterns, so they should pass the semantic layer's own
//! message through rather than wrap it in something generic.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dsl::DslQuery;

/// Rows returned by the semantic layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub data: Vec<Value>,
    pub columns: Vec<String>,
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &DslQuery, tenant_id: &str) -> Result<ExecutionOutput>;
}

/// Error text the load endpoint sends while a query is still running
const CONTINUE_WAIT: &str = "Continue wait";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Posts queries to a semantic-layer load endpoint.
///
/// A query that is still running is polled again until it finishes. The
/// caller bounds the whole exchange with its executor timeout.
#[derive(Clone)]
pub struct HttpQueryExecutor {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpQueryExecutor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    async fn load_once(&self, query: &DslQuery, tenant_id: &str) -> Result<LoadReply> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("x-tenant-id", tenant_id)
            .json(&serde_json::json!({ "query": query.to_semantic_query() }));
        if let Some(token) = &self.token {
            request = request.header("Authorization", token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        interpret_load_reply(status, &body)
    }
}

/// What one round trip to the load endpoint produced
#[derive(Debug, PartialEq)]
enum LoadReply {
    Ready(Vec<Value>),
    ContinueWait,
}

#[derive(Deserialize)]
struct LoadResponse {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Interpret a load response. The semantic layer's own error text is passed
/// through unchanged so error patterns can match it.
fn interpret_load_reply(status: StatusCode, body: &str) -> Result<LoadReply> {
    let parsed: LoadResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("semantic layer returned {} with unreadable body: {}", status, e))?;

    match parsed.error {
        Some(error) if error == CONTINUE_WAIT => Ok(LoadReply::ContinueWait),
        Some(error) => Err(anyhow!(error)),
        None if !status.is_success() => Err(anyhow!("semantic layer returned {}", status)),
        None => Ok(LoadReply::Ready(parsed.data)),
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute(&self, query: &DslQuery, tenant_id: &str) -> Result<ExecutionOutput> {
        loop {
            match self.load_once(query, tenant_id).await? {
                LoadReply::Ready(data) => {
                    return Ok(ExecutionOutput {
                        columns: columns_of(&data, query),
                        data,
                    });
                }
                LoadReply::ContinueWait => {
                    debug!(cube = %query.cube, "query still running, polling again");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }
}

/// Executor that runs nothing and returns the query's columns with no rows
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl QueryExecutor for DryRunExecutor {
    async fn execute(&self, query: &DslQuery, _tenant_id: &str) -> Result<ExecutionOutput> {
        Ok(ExecutionOutput {
            data: Vec::new(),
            columns: columns_of(&[], query),
        })
    }
}

/// Column names from the first row, or from the query when there are no rows
fn columns_of(data: &[Value], query: &DslQuery) -> Vec<String> {
    if let Some(Value::Object(row)) = data.first() {
        return row.keys().cloned().collect();
    }
    let mut columns: Vec<String> = query
        .dimensions
        .iter()
        .chain(query.measures.iter())
        .map(|m| query.qualify(m))
        .collect();
    if let Some(td) = &query.time_dimension {
        columns.push(query.qualify(td));
    }
    columns
}
