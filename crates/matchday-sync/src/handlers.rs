use std::sync::Arc;
use std::time::Duration;

use matchday_core::SyncOutcome;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entities::{Entity, SyncScope};
use crate::error::{Result, SyncError};
use crate::provider::DataProvider;
use crate::store::RelationalStore;

/// Everything an entity handler needs: provider, store and scope.
pub struct SyncContext {
    provider: Arc<dyn DataProvider>,
    store: Arc<dyn RelationalStore>,
    scope: SyncScope,
    /// Pause between dependent provider calls within one handler.
    pacing: Duration,
    max_pages: u32,
}

impl SyncContext {
    pub fn new(provider: Arc<dyn DataProvider>, store: Arc<dyn RelationalStore>, scope: SyncScope) -> Self {
        Self {
            provider,
            store,
            scope,
            pacing: Duration::from_millis(250),
            max_pages: 20,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Fetch every page of `entity` in scope, transform and upsert row by row.
    ///
    /// Provider failures abort the handler; a record that fails to transform
    /// or upsert only bumps `errors`.
    pub async fn sync_entity(&self, entity: Entity, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::default();
        let queries = entity.queries(&self.scope);
        if queries.is_empty() {
            info!(entity = %entity, "nothing in scope; skipping");
            return Ok(outcome);
        }

        for (i, base) in queries.iter().enumerate() {
            if i > 0 {
                self.pace(cancel).await?;
            }
            let mut page = 1;
            loop {
                let query = if entity.paged() {
                    base.clone().param("page", page)
                } else {
                    base.clone()
                };
                let resp = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    resp = self.provider.request(entity.endpoint(), &query) => resp?,
                };
                outcome.api_calls += 1;
                debug!(entity = %entity, %query, records = resp.response.len(), "page fetched");

                for record in &resp.response {
                    outcome += self.store_record(entity, record);
                }

                let last = resp.paging.current >= resp.paging.total;
                if !entity.paged() || last || page >= self.max_pages {
                    break;
                }
                page += 1;
                self.pace(cancel).await?;
            }
        }

        info!(entity = %entity, %outcome, "entity sync finished");
        Ok(outcome)
    }

    fn store_record(&self, entity: Entity, record: &serde_json::Value) -> SyncOutcome {
        let rows = match entity.transform(record) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(entity = %entity, error = %e, "record skipped");
                return SyncOutcome::new(0, 1);
            }
        };
        let mut outcome = SyncOutcome::default();
        for row in &rows {
            match self.store.upsert(entity.table(), row, entity.conflict_keys()) {
                Ok(()) => outcome.synced += 1,
                Err(e) => {
                    warn!(entity = %entity, error = %e, "upsert failed");
                    outcome.errors += 1;
                }
            }
        }
        outcome
    }

    async fn pace(&self, cancel: &CancellationToken) -> Result<()> {
        if self.pacing.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            _ = tokio::time::sleep(self.pacing) => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Notify;

    use crate::error::ProviderError;
    use crate::provider::{DataProvider, Paging, ProviderResponse, Query};

    /// Canned provider: fixed records per endpoint, optional failures and a
    /// gate that holds the first call until released.
    #[derive(Default)]
    pub struct StubProvider {
        pub records: HashMap<&'static str, Vec<Value>>,
        pub pages: u32,
        pub failing: Vec<&'static str>,
        pub gate: Option<Arc<Notify>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl StubProvider {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DataProvider for StubProvider {
        async fn request(&self, endpoint: &str, query: &Query) -> Result<ProviderResponse, ProviderError> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(format!("{endpoint}?{query}"));
                calls.len() == 1
            };
            if let (true, Some(gate)) = (first, &self.gate) {
                gate.notified().await;
            }
            if self.failing.contains(&endpoint) {
                return Err(ProviderError::Api {
                    status: 500,
                    message: "upstream down".into(),
                });
            }
            let response = self.records.get(endpoint).cloned().unwrap_or_default();
            let current = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
            Ok(ProviderResponse {
                results: response.len() as u64,
                response,
                errors: Vec::new(),
                paging: Paging {
                    current,
                    total: self.pages.max(1),
                },
            })
        }
    }
}
