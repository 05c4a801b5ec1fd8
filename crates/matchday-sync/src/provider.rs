use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::ProviderError;
use crate::queue::RateLimitedQueue;

/// Query-string parameters for one provider call, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    params: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace `key`.
    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key.to_string(), value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.params
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Paging {
    pub current: u32,
    pub total: u32,
}

impl Default for Paging {
    fn default() -> Self {
        Self { current: 1, total: 1 }
    }
}

/// Envelope returned by every provider endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub results: u64,
    #[serde(default)]
    pub response: Vec<Value>,
    /// The provider sends `[]` when clean and an object keyed by cause
    /// otherwise; both are flattened into messages.
    #[serde(default, deserialize_with = "flexible_errors")]
    pub errors: Vec<String>,
    #[serde(default)]
    pub paging: Paging,
}

fn flexible_errors<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.iter().map(text).collect(),
        Value::Object(map) => map.iter().map(|(k, v)| format!("{k}: {}", text(v))).collect(),
        Value::Null => Vec::new(),
        other => vec![text(&other)],
    })
}

/// External football data source.
///
/// Non-2xx statuses and non-empty `errors` arrays are returned as
/// [`ProviderError`]s, never as an `Ok` response.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn request(&self, endpoint: &str, query: &Query) -> Result<ProviderResponse, ProviderError>;
}

/// Routes every call of the inner provider through the rate-limited queue.
pub struct QueuedProvider {
    inner: Arc<dyn DataProvider>,
    queue: RateLimitedQueue,
}

impl QueuedProvider {
    pub fn new(inner: Arc<dyn DataProvider>, queue: RateLimitedQueue) -> Self {
        Self { inner, queue }
    }
}

#[async_trait]
impl DataProvider for QueuedProvider {
    async fn request(&self, endpoint: &str, query: &Query) -> Result<ProviderResponse, ProviderError> {
        let inner = Arc::clone(&self.inner);
        let endpoint = endpoint.to_string();
        let query = query.clone();
        self.queue
            .submit(move || async move { inner.request(&endpoint, &query).await })
            .await?
    }
}
