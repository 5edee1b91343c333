//! Scripted provider for exercising batching and reconciliation without network access.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use vtrend_core::Platform;
use vtrend_storage::FetchError;

use crate::{MetricsProvider, ProviderError};

#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    platform: Platform,
    counts: HashMap<String, u64>,
    failing_calls: HashSet<usize>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptedProvider {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            counts: HashMap::new(),
            failing_calls: HashSet::new(),
            calls: Arc::default(),
        }
    }

    pub fn with_count(mut self, id: impl Into<String>, views: u64) -> Self {
        self.counts.insert(id.into(), views);
        self
    }

    pub fn with_counts<I, S>(mut self, counts: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        self.counts
            .extend(counts.into_iter().map(|(id, views)| (id.into(), views)));
        self
    }

    /// Makes the `call_index`-th call (0-based) fail with a 503.
    pub fn failing_call(mut self, call_index: usize) -> Self {
        self.failing_calls.insert(call_index);
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MetricsProvider for ScriptedProvider {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn fetch_view_counts(&self, ids: &[String]) -> Result<HashMap<String, u64>, ProviderError> {
        let call_index = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| ProviderError::Decode("call log poisoned".into()))?;
            calls.push(ids.to_vec());
            calls.len() - 1
        };

        if self.failing_calls.contains(&call_index) {
            return Err(ProviderError::Fetch(FetchError::HttpStatus {
                status: 503,
                url: "scripted://videos".into(),
            }));
        }

        Ok(ids
            .iter()
            .filter_map(|id| self.counts.get(id).map(|views| (id.clone(), *views)))
            .collect())
    }
}
