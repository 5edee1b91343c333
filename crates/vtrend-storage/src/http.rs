//! Outbound HTTP for metrics providers: a global and a per-provider cap on
//! requests in flight, an optional request quota, and retries on transient
//! failures with capped exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transience {
    Transient,
    Permanent,
}

/// 5xx and 429 are worth another attempt; other statuses are final.
pub fn status_transience(status: StatusCode) -> Transience {
    match status {
        StatusCode::TOO_MANY_REQUESTS => Transience::Transient,
        s if s.is_server_error() => Transience::Transient,
        _ => Transience::Permanent,
    }
}

pub fn transport_transience(err: &reqwest::Error) -> Transience {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        Transience::Transient
    } else {
        Transience::Permanent
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first request.
    pub max_retries: usize,
    pub first_delay: Duration,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            first_delay: Duration::from_millis(250),
            ceiling: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Pause before retry number `retry` (0-based): `first_delay * 2^retry`, capped.
    pub fn pause_before(&self, retry: usize) -> Duration {
        let doubled = u32::try_from(retry)
            .ok()
            .and_then(|r| 1u32.checked_shl(r))
            .unwrap_or(u32::MAX);
        self.first_delay.saturating_mul(doubled).min(self.ceiling)
    }

    /// A server-provided `Retry-After` wins when present, still capped by the ceiling.
    fn pause_for(&self, retry: usize, retry_after: Option<Duration>) -> Duration {
        retry_after
            .map(|hint| hint.min(self.ceiling))
            .unwrap_or_else(|| self.pause_before(retry))
    }
}

/// At most `burst` requests, refilled one at a time every `every`.
#[derive(Debug, Clone, Copy)]
pub struct RequestQuota {
    pub burst: u32,
    pub every: Duration,
}

#[derive(Debug)]
struct QuotaGate {
    quota: RequestQuota,
    state: Mutex<(u32, Instant)>,
}

impl QuotaGate {
    fn new(quota: RequestQuota) -> Self {
        Self {
            quota,
            state: Mutex::new((quota.burst, Instant::now())),
        }
    }

    async fn admit(&self) {
        loop {
            let wait = {
                let mut guard = self.state.lock().await;
                let (available, refilled_at) = &mut *guard;
                let every = self.quota.every;
                if !every.is_zero() {
                    let earned = refilled_at.elapsed().as_nanos() / every.as_nanos();
                    if earned > 0 {
                        let earned = u32::try_from(earned).unwrap_or(u32::MAX);
                        *available = available.saturating_add(earned).min(self.quota.burst);
                        *refilled_at = Instant::now();
                    }
                }
                if *available > 0 {
                    *available -= 1;
                    return;
                }
                every.saturating_sub(refilled_at.elapsed())
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_in_flight: usize,
    pub max_in_flight_per_provider: usize,
    pub retry: RetryPolicy,
    pub quota: Option<RequestQuota>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_in_flight: 8,
            max_in_flight_per_provider: 2,
            retry: RetryPolicy::default(),
            quota: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// URLs carried in errors have their query string removed; provider
/// credentials travel as query parameters.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request limiter closed")]
    LimiterClosed,
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

enum Attempt {
    Done(FetchedResponse),
    Retry(Option<Duration>),
    Fail(FetchError),
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    per_provider_limit: usize,
    per_provider: Mutex<HashMap<String, Arc<Semaphore>>>,
    quota: Option<QuotaGate>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building http client")?;

        Ok(Self {
            client,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            per_provider_limit: config.max_in_flight_per_provider.max(1),
            per_provider: Mutex::new(HashMap::new()),
            quota: config.quota.map(QuotaGate::new),
            retry: config.retry,
        })
    }

    async fn provider_permit(&self, provider: &str) -> Result<OwnedSemaphorePermit, FetchError> {
        let semaphore = self
            .per_provider
            .lock()
            .await
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_provider_limit)))
            .clone();
        semaphore
            .acquire_owned()
            .await
            .map_err(|_| FetchError::LimiterClosed)
    }

    /// GET `url` with `query` appended on behalf of `provider`.
    pub async fn get(
        &self,
        provider: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;
        let _provider = self.provider_permit(provider).await?;
        if let Some(gate) = &self.quota {
            gate.admit().await;
        }

        let span = info_span!("http_fetch", provider, url = %strip_query(url));
        async {
            let mut retries = 0;
            loop {
                match self.attempt(url, query, retries).await {
                    Attempt::Done(response) => return Ok(response),
                    Attempt::Fail(err) => return Err(err),
                    Attempt::Retry(hint) => {
                        let pause = self.retry.pause_for(retries, hint);
                        debug!(retry = retries + 1, pause_ms = pause.as_millis() as u64, "retrying");
                        tokio::time::sleep(pause).await;
                        retries += 1;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, url: &str, query: &[(&str, &str)], retries: usize) -> Attempt {
        let may_retry = retries < self.retry.max_retries;
        let resp = match self.client.get(url).query(query).send().await {
            Ok(resp) => resp,
            Err(err) if may_retry && transport_transience(&err) == Transience::Transient => {
                return Attempt::Retry(None);
            }
            Err(err) => {
                return Attempt::Fail(FetchError::Request {
                    url: strip_query(url).to_string(),
                    source: err.without_url(),
                })
            }
        };

        let status = resp.status();
        if !status.is_success() {
            if may_retry && status_transience(status) == Transience::Transient {
                return Attempt::Retry(retry_after(&resp));
            }
            return Attempt::Fail(FetchError::HttpStatus {
                status: status.as_u16(),
                url: strip_query(url).to_string(),
            });
        }

        match resp.bytes().await {
            Ok(body) => Attempt::Done(FetchedResponse {
                status,
                body: body.to_vec(),
            }),
            Err(err) => Attempt::Fail(FetchError::Request {
                url: strip_query(url).to_string(),
                source: err.without_url(),
            }),
        }
    }
}
