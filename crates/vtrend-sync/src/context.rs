//! The explicit context object every pipeline component receives: storage
//! handle, metrics adapter, clock and bucket offset.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use vtrend_adapters::MetricsSourceAdapter;
use vtrend_storage::StatsBackend;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests; millisecond resolution.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(at.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn StatsBackend>,
    pub metrics: MetricsSourceAdapter,
    pub clock: Arc<dyn Clock>,
    pub bucket_offset: FixedOffset,
    pub fleet_concurrency: usize,
}

impl PipelineContext {
    pub fn new(store: Arc<dyn StatsBackend>, metrics: MetricsSourceAdapter) -> Self {
        Self {
            store,
            metrics,
            clock: Arc::new(SystemClock),
            bucket_offset: Utc.fix(),
            fleet_concurrency: 4,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_bucket_offset(mut self, offset: FixedOffset) -> Self {
        self.bucket_offset = offset;
        self
    }

    pub fn with_fleet_concurrency(mut self, limit: usize) -> Self {
        self.fleet_concurrency = limit.max(1);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("metrics", &self.metrics)
            .field("bucket_offset", &self.bucket_offset)
            .field("fleet_concurrency", &self.fleet_concurrency)
            .finish_non_exhaustive()
    }
}
