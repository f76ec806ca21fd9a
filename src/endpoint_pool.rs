//! Ordered set of primary+backup RPC endpoints with per-endpoint health,
//! rotation on failure, recovery after a cooldown window, and a 429-aware
//! retry wrapper.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{CommitmentLevel, Config};
use crate::constants::{RATE_LIMIT_BACKOFF_CAP_MS, RATE_LIMIT_BACKOFF_START_MS};

/// Distinguishes a rate-limit response (handled with backoff, no rotation)
/// from any other failure (handled by rotating to the next healthy peer).
#[derive(Debug, Clone)]
pub enum EndpointError {
    RateLimited(String),
    Other(String),
}

impl EndpointError {
    pub fn message(&self) -> &str {
        match self {
            EndpointError::RateLimited(m) | EndpointError::Other(m) => m,
        }
    }
}

struct Endpoint {
    url: String,
    failure_count: u32,
    healthy: bool,
    last_failure: Option<Instant>,
}

pub struct EndpointPool {
    endpoints: Mutex<Vec<Endpoint>>,
    active: AtomicUsize,
    websocket_url: Option<String>,
    commitment: CommitmentLevel,
    max_failures: u32,
    recovery_window: Duration,
    max_attempts: u32,
}

impl EndpointPool {
    pub fn new(
        urls: Vec<String>,
        websocket_url: Option<String>,
        commitment: CommitmentLevel,
        max_failures: u32,
        recovery_window: Duration,
        max_attempts: u32,
    ) -> anyhow::Result<Self> {
        if urls.is_empty() {
            return Err(anyhow::anyhow!("endpoint pool requires at least one RPC endpoint"));
        }

        let endpoints = urls
            .into_iter()
            .map(|url| Endpoint {
                url,
                failure_count: 0,
                healthy: true,
                last_failure: None,
            })
            .collect();

        Ok(Self {
            endpoints: Mutex::new(endpoints),
            active: AtomicUsize::new(0),
            websocket_url,
            commitment,
            max_failures,
            recovery_window,
            max_attempts,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(
            config.rpc_endpoints.clone(),
            config.rpc_websocket_url.clone(),
            config.commitment_level,
            config.endpoint_pool.max_failures,
            Duration::from_millis(config.endpoint_pool.recovery_window_ms),
            config.endpoint_pool.max_attempts,
        )
    }

    pub fn websocket_url(&self) -> Option<&str> {
        self.websocket_url.as_deref()
    }

    pub fn commitment(&self) -> CommitmentLevel {
        self.commitment
    }

    /// Active endpoint's URL. Masks any `api-key`/`key`/`token` query parameter.
    pub fn current(&self) -> String {
        let endpoints = self.endpoints.lock();
        let idx = self.active.load(Ordering::SeqCst) % endpoints.len();
        endpoints[idx].url.clone()
    }

    pub fn current_masked(&self) -> String {
        mask_url(&self.current())
    }

    pub fn report_success(&self) {
        let mut endpoints = self.endpoints.lock();
        let idx = self.active.load(Ordering::SeqCst) % endpoints.len();
        let endpoint = &mut endpoints[idx];
        endpoint.failure_count = 0;
        endpoint.healthy = true;
    }

    pub fn report_failure(&self) {
        let mut endpoints = self.endpoints.lock();
        let idx = self.active.load(Ordering::SeqCst) % endpoints.len();
        let masked = mask_url(&endpoints[idx].url);
        let endpoint = &mut endpoints[idx];
        endpoint.failure_count += 1;
        endpoint.last_failure = Some(Instant::now());

        if endpoint.failure_count >= self.max_failures {
            endpoint.healthy = false;
            warn!("endpoint {masked} marked unhealthy after {} failures", endpoint.failure_count);
        }
        drop(endpoints);
        self.rotate_to_healthy();
    }

    pub fn force_rotate(&self) {
        let len = self.endpoints.lock().len();
        let next = (self.active.load(Ordering::SeqCst) + 1) % len;
        self.active.store(next, Ordering::SeqCst);
        debug!("force-rotated endpoint pool to index {next}");
    }

    fn rotate_to_healthy(&self) {
        let mut endpoints = self.endpoints.lock();
        let len = endpoints.len();
        self.recover_expired(&mut endpoints);

        let start = self.active.load(Ordering::SeqCst);
        for offset in 1..=len {
            let candidate = (start + offset) % len;
            if endpoints[candidate].healthy {
                if candidate != start {
                    self.active.store(candidate, Ordering::SeqCst);
                    info!("rotated active endpoint to {}", mask_url(&endpoints[candidate].url));
                }
                return;
            }
        }
        warn!("no healthy endpoints remain in the pool");
    }

    fn recover_expired(&self, endpoints: &mut [Endpoint]) {
        for endpoint in endpoints.iter_mut() {
            if !endpoint.healthy {
                if let Some(last_failure) = endpoint.last_failure {
                    if last_failure.elapsed() > self.recovery_window {
                        endpoint.healthy = true;
                        endpoint.failure_count = 0;
                        info!("endpoint {} recovered after cooldown", mask_url(&endpoint.url));
                    }
                }
            }
        }
    }

    pub fn healthy_count(&self) -> usize {
        let mut endpoints = self.endpoints.lock();
        self.recover_expired(&mut endpoints);
        endpoints.iter().filter(|e| e.healthy).count()
    }

    /// Executes `operation` with 429-aware backoff. Rate-limit errors are
    /// retried in place with exponential backoff (1s, 2s, 4s, capped at 8s)
    /// and never rotate the active endpoint. Any other error rotates to the
    /// next healthy endpoint before retrying. Gives up after `max_attempts`.
    pub async fn execute_with_retry<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, String>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, EndpointError>>,
    {
        let mut rate_limit_delay_ms = RATE_LIMIT_BACKOFF_START_MS;
        let mut attempt = 0u32;
        let mut last_error = String::new();

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    self.report_success();
                    return Ok(value);
                }
                Err(EndpointError::RateLimited(message)) => {
                    last_error = message;
                    warn!(
                        "{operation_name} rate-limited (attempt {attempt}/{}), backing off {}ms",
                        self.max_attempts, rate_limit_delay_ms
                    );
                    if attempt >= self.max_attempts {
                        return Err(last_error);
                    }
                    sleep(Duration::from_millis(rate_limit_delay_ms)).await;
                    rate_limit_delay_ms = (rate_limit_delay_ms * 2).min(RATE_LIMIT_BACKOFF_CAP_MS);
                }
                Err(EndpointError::Other(message)) => {
                    last_error = message;
                    self.report_failure();
                    if attempt >= self.max_attempts {
                        return Err(last_error);
                    }
                    warn!("{operation_name} failed (attempt {attempt}/{}): {last_error}", self.max_attempts);
                }
            }
        }
    }
}

/// Masks the value of any query parameter that looks like a credential.
pub fn mask_url(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    let masked_params: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if is_sensitive_param(key) => format!("{key}=****"),
            _ => pair.to_string(),
        })
        .collect();

    format!("{base}?{}", masked_params.join("&"))
}

fn is_sensitive_param(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.contains("key") || lower.contains("token") || lower.contains("secret") || lower.contains("auth")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(urls: &[&str]) -> EndpointPool {
        EndpointPool::new(
            urls.iter().map(|s| s.to_string()).collect(),
            None,
            CommitmentLevel::Confirmed,
            3,
            Duration::from_secs(30),
            5,
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_endpoint_list() {
        assert!(EndpointPool::new(vec![], None, CommitmentLevel::Confirmed, 3, Duration::from_secs(30), 5).is_err());
    }

    #[test]
    fn rotates_to_next_endpoint_after_max_failures() {
        let p = pool(&["https://a", "https://b"]);
        assert_eq!(p.current(), "https://a");
        p.report_failure();
        p.report_failure();
        p.report_failure();
        assert_eq!(p.current(), "https://b");
    }

    #[test]
    fn force_rotate_advances_unconditionally() {
        let p = pool(&["https://a", "https://b", "https://c"]);
        p.force_rotate();
        assert_eq!(p.current(), "https://b");
        p.force_rotate();
        assert_eq!(p.current(), "https://c");
    }

    #[test]
    fn success_resets_failure_count() {
        let p = pool(&["https://a", "https://b"]);
        p.report_failure();
        p.report_failure();
        p.report_success();
        p.report_failure();
        p.report_failure();
        assert_eq!(p.current(), "https://a");
    }

    #[test]
    fn masks_api_key_query_params() {
        assert_eq!(mask_url("https://rpc.example.com?api-key=abc123"), "https://rpc.example.com?api-key=****");
        assert_eq!(mask_url("https://rpc.example.com/v1"), "https://rpc.example.com/v1");
    }

    #[tokio::test]
    async fn rate_limit_retries_without_rotating() {
        let p = pool(&["https://a", "https://b"]);
        let mut calls = 0u32;
        let result: Result<u32, String> = p
            .execute_with_retry("test", || {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt < 3 {
                        Err(EndpointError::RateLimited("429".to_string()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(p.current(), "https://a");
    }

    #[tokio::test]
    async fn other_failure_rotates_before_retry() {
        let p = pool(&["https://a", "https://b"]);
        let mut calls = 0u32;
        let result: Result<u32, String> = p
            .execute_with_retry("test", || {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt < 2 {
                        Err(EndpointError::Other("rpc down".to_string()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn exhausting_attempts_surfaces_last_error() {
        let p = pool(&["https://a"]);
        let result: Result<u32, String> = p
            .execute_with_retry("test", || async { Err::<u32, _>(EndpointError::Other("down".to_string())) })
            .await;
        assert_eq!(result.unwrap_err(), "down");
    }
}
