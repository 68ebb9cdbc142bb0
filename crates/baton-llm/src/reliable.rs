use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use baton_core::errors::ProviderError;
use baton_core::provider::{InvokeRequest, ModelProvider, ModelReply};

/// Retry and circuit breaker settings for [`ReliableProvider`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Wraps a ModelProvider with retry logic and a circuit breaker.
///
/// - Retries retryable errors with exponential backoff + jitter
/// - Respects `retry_after` hints from rate limit responses
/// - Circuit breaker: N consecutive failures → open → cooldown → half-open → success → closed
/// - Safe to retry: the engine only writes to the thread after a reply
///   arrives, so a retried request never duplicates messages
pub struct ReliableProvider<P: ModelProvider> {
    inner: P,
    config: ReliableConfig,
    circuit_state: Arc<RwLock<CircuitState>>,
    consecutive_failures: Arc<AtomicU32>,
    total_retries: Arc<AtomicU64>,
}

impl<P: ModelProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: Arc::new(RwLock::new(CircuitState::Closed)),
            consecutive_failures: Arc::new(AtomicU32::new(0)),
            total_retries: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    /// Check if the circuit breaker allows a request through.
    fn check_circuit(&self) -> Result<(), ProviderError> {
        let state = self.circuit_state.read();
        match &*state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.circuit_breaker_cooldown {
                    drop(state);
                    *self.circuit_state.write() = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(ProviderError::ProviderOverloaded)
                }
            }
        }
    }

    /// Record a successful request and reset the circuit breaker.
    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!("circuit breaker closed after successful request");
            *state = CircuitState::Closed;
        }
    }

    /// Record a failed request, tripping the circuit breaker at the threshold.
    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.config.circuit_breaker_threshold {
            let mut state = self.circuit_state.write();
            if *state == CircuitState::Closed || *state == CircuitState::HalfOpen {
                warn!(
                    failures = failures,
                    cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                    "circuit breaker opened after {} consecutive failures",
                    failures
                );
                *state = CircuitState::Open {
                    since: Instant::now(),
                };
            }
        }
    }

    /// Delay for a retry attempt: exponential backoff + jitter, unless the
    /// server suggested one.
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }

        // base * 2^attempt, capped at max_delay
        let exp_delay = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_delay.min(self.config.max_delay.as_millis() as f64);

        // jitter: delay * (1 ± jitter_factor), floor 100ms
        let jitter_range = capped * self.config.jitter_factor;
        let jitter = (random_u64() % (jitter_range as u64 * 2 + 1)) as f64 - jitter_range;
        let final_ms = (capped + jitter).max(100.0);

        Duration::from_millis(final_ms as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match &*self.circuit_state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Simple non-cryptographic random u64 using thread-local state.
fn random_u64() -> u64 {
    use std::cell::Cell;
    use std::time::SystemTime;

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
        );
    }

    STATE.with(|s| {
        // xorshift64
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        s.set(x);
        x
    })
}

#[async_trait]
impl<P: ModelProvider> ModelProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, request: &InvokeRequest) -> Result<ModelReply, ProviderError> {
        self.check_circuit()?;

        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.inner.invoke(request).await {
                Ok(reply) => {
                    self.record_success();
                    return Ok(reply);
                }
                Err(e) => {
                    if e.is_fatal() || attempt == self.config.max_retries {
                        self.record_failure();
                        return Err(e);
                    }

                    // covers timeouts: neither fatal nor worth retrying blind
                    if !e.is_retryable() {
                        self.record_failure();
                        return Err(e);
                    }

                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    self.total_retries.fetch_add(1, Ordering::Relaxed);

                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after error"
                    );

                    last_error = Some(e);
                    tokio::time::sleep(delay).await;

                    // Re-check circuit after sleep
                    self.check_circuit()?;
                }
            }
        }

        Err(last_error.unwrap_or(ProviderError::NetworkError("max retries exceeded".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedProvider, ScriptedReply};
    use baton_core::thread::Thread;

    fn request() -> InvokeRequest {
        InvokeRequest {
            instructions: String::new(),
            tools: Vec::new(),
            thread: Arc::new(Thread::new()),
            model: "m".to_string(),
        }
    }

    fn server_error(body: &str) -> ScriptedReply {
        ScriptedReply::error(ProviderError::ServerError {
            status: 500,
            body: body.into(),
        })
    }

    fn fast_config() -> ReliableConfig {
        ReliableConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let reliable =
            ReliableProvider::with_defaults(ScriptedProvider::new(vec![ScriptedReply::text("hi")]));

        reliable.invoke(&request()).await.unwrap();
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test]
    async fn retries_on_retryable_error() {
        let scripted = ScriptedProvider::new(vec![
            server_error("internal"),
            server_error("internal"),
            ScriptedReply::text("recovered"),
        ]);
        let reliable = ReliableProvider::new(scripted, fast_config());

        reliable.invoke(&request()).await.unwrap();
        assert_eq!(reliable.total_retries(), 2);
    }

    #[tokio::test]
    async fn fatal_error_not_retried() {
        let scripted = ScriptedProvider::new(vec![
            ScriptedReply::error(ProviderError::AuthenticationFailed("bad key".into())),
            ScriptedReply::text("should not reach"),
        ]);
        let reliable = ReliableProvider::with_defaults(scripted);

        let err = reliable.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test]
    async fn timeout_not_retried() {
        let scripted = ScriptedProvider::new(vec![
            ScriptedReply::error(ProviderError::Timeout(Duration::from_secs(30))),
            ScriptedReply::text("should not reach"),
        ]);
        let reliable = ReliableProvider::with_defaults(scripted);

        let err = reliable.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test]
    async fn max_retries_exhausted() {
        let scripted = ScriptedProvider::new(vec![
            server_error("fail"),
            server_error("fail"),
            server_error("fail"),
            server_error("fail"),
        ]);
        let reliable = ReliableProvider::new(scripted, fast_config());

        let err = reliable.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ServerError { .. }));
        assert_eq!(reliable.total_retries(), 3);
    }

    #[tokio::test]
    async fn circuit_breaker_trips_after_threshold() {
        let scripted = ScriptedProvider::new(vec![
            server_error("1"),
            server_error("2"),
            server_error("3"),
            ScriptedReply::text("unreachable"),
        ]);
        let config = ReliableConfig {
            max_retries: 0, // each call is a single attempt
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
            ..fast_config()
        };
        let reliable = ReliableProvider::new(scripted, config);

        // First 3 calls fail, tripping the breaker
        for _ in 0..3 {
            let _ = reliable.invoke(&request()).await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        // 4th call is rejected without reaching the inner provider
        let err = reliable.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ProviderOverloaded));
    }

    #[tokio::test]
    async fn circuit_breaker_recovers_after_cooldown() {
        let scripted = ScriptedProvider::new(vec![
            server_error("1"),
            server_error("2"),
            server_error("3"),
            ScriptedReply::text("recovered"),
        ]);
        let config = ReliableConfig {
            max_retries: 0,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_millis(50),
            ..fast_config()
        };
        let reliable = ReliableProvider::new(scripted, config);

        for _ in 0..3 {
            let _ = reliable.invoke(&request()).await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        tokio::time::sleep(Duration::from_millis(60)).await;

        // half-open lets the probe through; success closes the circuit
        reliable.invoke(&request()).await.unwrap();
        assert_eq!(reliable.circuit_state_name(), "closed");
    }

    #[test]
    fn retry_delay_respects_suggested() {
        let reliable = ReliableProvider::with_defaults(ScriptedProvider::new(Vec::new()));

        let delay = reliable.retry_delay(0, Some(Duration::from_secs(5)));
        assert_eq!(delay, Duration::from_secs(5));
    }

    #[test]
    fn retry_delay_exponential_backoff() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0, // deterministic
            ..Default::default()
        };
        let reliable = ReliableProvider::new(ScriptedProvider::new(Vec::new()), config);

        assert_eq!(reliable.retry_delay(0, None).as_millis(), 100);
        assert_eq!(reliable.retry_delay(1, None).as_millis(), 200);
        assert_eq!(reliable.retry_delay(2, None).as_millis(), 400);
    }

    #[test]
    fn retry_delay_capped_at_max() {
        let config = ReliableConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.0,
            ..Default::default()
        };
        let reliable = ReliableProvider::new(ScriptedProvider::new(Vec::new()), config);

        // 1s * 2^10 = 1024s, capped at 5s
        assert_eq!(reliable.retry_delay(10, None).as_millis(), 5000);
    }

    #[test]
    fn config_defaults() {
        let config = ReliableConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.jitter_factor - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.circuit_breaker_threshold, 3);
        assert_eq!(config.circuit_breaker_cooldown, Duration::from_secs(60));
    }

    #[test]
    fn name_delegates_to_inner() {
        let reliable = ReliableProvider::with_defaults(ScriptedProvider::new(Vec::new()));
        assert_eq!(reliable.name(), "scripted");
    }
}
