//! Metrics provider contracts and the batching Metrics Source Adapter.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};
use vtrend_core::Platform;
use vtrend_storage::FetchError;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod youtube;

pub use youtube::{decode_video_statistics, YouTubeMetricsProvider, YouTubeSettings};

pub const CRATE_NAME: &str = "vtrend-adapters";

/// Upper bound on ids per provider call, whatever the provider advertises.
pub const MAX_PROVIDER_BATCH: usize = 50;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding provider response: {0}")]
    Decode(String),
    #[error("batch of {size} ids exceeds provider limit {max}")]
    BatchTooLarge { size: usize, max: usize },
    #[error("no metrics provider registered for {0}")]
    Unsupported(Platform),
}

/// One external metrics source answering view-count lookups for a single platform.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    fn platform(&self) -> Platform;

    fn max_batch_size(&self) -> usize {
        MAX_PROVIDER_BATCH
    }

    /// Looks up one batch. Ids the provider does not know are absent from the map.
    async fn fetch_view_counts(&self, ids: &[String]) -> Result<HashMap<String, u64>, ProviderError>;
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<Platform, Arc<dyn MetricsProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn MetricsProvider>) {
        self.providers.insert(provider.platform(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn MetricsProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn MetricsProvider>> {
        self.providers.get(&platform).cloned()
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.providers.contains_key(&platform)
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.providers.keys().copied().collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub counts: HashMap<String, u64>,
    pub batches: usize,
    pub failed_batches: usize,
}

impl BatchReport {
    pub fn is_partial(&self) -> bool {
        self.failed_batches > 0
    }
}

/// Splits id lists into provider-sized batches and issues them one after another.
#[derive(Debug, Clone, Default)]
pub struct MetricsSourceAdapter {
    registry: ProviderRegistry,
}

impl MetricsSourceAdapter {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn reconciles(&self, platform: Platform) -> bool {
        self.registry.supports(platform)
    }

    /// A failed batch is logged and its ids are left out of `counts`; the
    /// remaining batches still run.
    pub async fn fetch_view_counts(
        &self,
        platform: Platform,
        ids: &[String],
    ) -> Result<BatchReport, ProviderError> {
        let provider = self
            .registry
            .get(platform)
            .ok_or(ProviderError::Unsupported(platform))?;
        let batch_size = provider.max_batch_size().clamp(1, MAX_PROVIDER_BATCH);

        let mut seen = HashSet::new();
        let unique: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let mut report = BatchReport::default();
        for (index, batch) in unique.chunks(batch_size).enumerate() {
            let batch_start = index * batch_size;
            let batch_end = batch_start + batch.len();
            report.batches += 1;

            let span = info_span!(
                "metrics_batch",
                platform = %platform,
                batch_start,
                batch_end
            );
            match provider.fetch_view_counts(batch).instrument(span).await {
                Ok(counts) => {
                    debug!(
                        platform = %platform,
                        requested = batch.len(),
                        returned = counts.len(),
                        "metrics batch complete"
                    );
                    report.counts.extend(counts);
                }
                Err(err) => {
                    report.failed_batches += 1;
                    warn!(
                        platform = %platform,
                        batch_start,
                        batch_end,
                        error = %err,
                        "metrics batch failed; skipping"
                    );
                }
            }
        }
        Ok(report)
    }
}
