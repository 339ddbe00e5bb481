//! Three-state circuit breaker for upstream call protection.
//!
//! Closed passes calls through and counts consecutive failures; at the
//! failure threshold the breaker opens and rejects calls until the reset
//! timeout elapses; the first call after that probes in half-open, and a run
//! of successes closes the breaker again.

use std::sync::Mutex;

use tokio::time::{Duration, Instant};

/// Breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in closed state that open the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before allowing a probe.
    pub reset_timeout: Duration,
    /// Consecutive successes in half-open state that close the breaker.
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_success_threshold: 3,
        }
    }
}

/// The observable state of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected until the next-attempt deadline.
    Open,
    /// Probe calls are allowed; successes accumulate toward closing.
    HalfOpen,
}

/// Error wrapper distinguishing breaker rejections from inner failures.
#[derive(Debug)]
pub enum CircuitError<E> {
    /// The breaker is open; the call was rejected without running.
    Open,
    /// The call ran and failed with the inner error.
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "circuit open, call rejected"),
            Self::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for CircuitError<E> {}

type Hook = Box<dyn Fn() + Send + Sync>;

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    next_attempt_at: Option<Instant>,
}

/// Circuit breaker guarding one upstream dependency.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    on_open: Option<Hook>,
    on_close: Option<Hook>,
    on_half_open: Option<Hook>,
}

impl CircuitBreaker {
    /// Create a breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                next_attempt_at: None,
            }),
            on_open: None,
            on_close: None,
            on_half_open: None,
        }
    }

    /// Register a hook fired when the breaker opens.
    #[must_use]
    pub fn on_open(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Box::new(hook));
        self
    }

    /// Register a hook fired when the breaker closes.
    #[must_use]
    pub fn on_close(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Register a hook fired when the breaker transitions to half-open.
    #[must_use]
    pub fn on_half_open(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_half_open = Some(Box::new(hook));
        self
    }

    /// The breaker's current state (open breakers past their deadline still
    /// report open until the next call probes).
    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock").state
    }

    /// Run an operation through the breaker.
    ///
    /// Returns `CircuitError::Open` without invoking the operation when the
    /// breaker is open and the reset deadline has not passed.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.before_call()?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn before_call<E>(&self) -> Result<(), CircuitError<E>> {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let deadline = inner.next_attempt_at.unwrap_or_else(Instant::now);
                if Instant::now() >= deadline {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    drop(inner);
                    if let Some(hook) = &self.on_half_open {
                        hook();
                    }
                    Ok(())
                } else {
                    Err(CircuitError::Open)
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.next_attempt_at = None;
                    drop(inner);
                    if let Some(hook) = &self.on_close {
                        hook();
                    }
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.trip(&mut inner);
                    drop(inner);
                    if let Some(hook) = &self.on_open {
                        hook();
                    }
                }
            }
            CircuitState::HalfOpen => {
                self.trip(&mut inner);
                drop(inner);
                if let Some(hook) = &self.on_open {
                    hook();
                }
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.half_open_successes = 0;
        inner.next_attempt_at = Some(Instant::now() + self.config.reset_timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_success_threshold: 3,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        breaker.call(|| async { Err::<(), _>("boom") }).await.map(|_| ())
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        breaker.call(|| async { Ok::<_, &'static str>(()) }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(fast_config());

        for _ in 0..2 {
            assert!(fail(&breaker).await.is_err());
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_the_failure_counter() {
        let breaker = CircuitBreaker::new(fast_config());

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_calling_the_thunk() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result = breaker
            .call(move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, &'static str>(())
                }
            })
            .await;

        assert!(matches!(result, Err(CircuitError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn probes_half_open_after_reset_timeout() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn closes_after_half_open_success_threshold() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        for _ in 0..3 {
            succeed(&breaker).await.unwrap();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_with_fresh_deadline() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Still rejecting before the fresh deadline.
        assert!(matches!(succeed(&breaker).await, Err(CircuitError::Open)));
    }

    #[tokio::test(start_paused = true)]
    async fn transition_hooks_fire() {
        let opened = Arc::new(AtomicU32::new(0));
        let closed = Arc::new(AtomicU32::new(0));
        let half = Arc::new(AtomicU32::new(0));

        let (o, c, h) = (opened.clone(), closed.clone(), half.clone());
        let breaker = CircuitBreaker::new(fast_config())
            .on_open(move || {
                o.fetch_add(1, Ordering::SeqCst);
            })
            .on_close(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .on_half_open(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        for _ in 0..3 {
            succeed(&breaker).await.unwrap();
        }

        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(half.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
