//! Engine configuration: concurrency, timeouts, freshness, retries.

use std::future::Future;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::warn;

use attest_store::StoreResult;

/// Bounded exponential backoff for transient store failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: StdDuration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying transient failures with exponential backoff.
    ///
    /// Contract violations (missing records, state guards) are returned
    /// immediately; only `StoreError::is_transient` errors are retried.
    pub async fn run<T, F, Fut>(&self, op: F) -> StoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.attempts => {
                    warn!(
                        event = "store.retry",
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Configuration of a validation engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on control groups evaluated concurrently.
    pub max_concurrency: usize,
    /// Per-check invocation timeout. A check that exceeds it is recorded
    /// as `unknown` with a timeout diagnostic.
    pub check_timeout: StdDuration,
    /// Evidence older than this forces a control's status to `partial`.
    pub evidence_freshness: Duration,
    /// Retry policy for transient store failures.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            check_timeout: StdDuration::from_secs(30),
            evidence_freshness: Duration::days(365),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_check_timeout(mut self, timeout: StdDuration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn with_evidence_freshness(mut self, freshness: Duration) -> Self {
        self.evidence_freshness = freshness;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
