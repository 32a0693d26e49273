//! Circuit breaker pattern implementation
//!
//! Every transition goes through `set_state`, which advances the generation
//! and clears the counters. A request remembers the generation it was admitted
//! under and its outcome is dropped if the breaker has moved on by the time it
//! completes.

use futures::FutureExt;
use parking_lot::Mutex;
use sluice_core::clock::{system_clock, Clock};
use sluice_core::{Error, Result};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, all requests fail immediately
    Open,
    /// Circuit is half-open, allowing limited probe requests
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Request counters for the current generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Admitted requests
    pub requests: u64,
    /// Successful completions
    pub total_successes: u64,
    /// Failed completions
    pub total_failures: u64,
    /// Successes since the last failure
    pub consecutive_successes: u64,
    /// Failures since the last success
    pub consecutive_failures: u64,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests += 1;
    }

    fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Counts::default();
    }
}

/// Decides whether the counts warrant opening the circuit
pub type TripPolicy = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;

/// Decides whether a failed call should still count as a success
pub type SuccessPolicy = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Called with `(name, from, to)` on every transition, while the breaker lock
/// is held. The hook must not call back into the breaker.
pub type StateChangeHook = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Default consecutive-failure threshold
pub const DEFAULT_CONSECUTIVE_FAILURES: u64 = 5;

/// Default time spent open before probing
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Circuit breaker configuration
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Name used in errors and logs
    pub name: String,
    /// Probes allowed in half-open, and successes needed to close (0 means 1)
    pub max_requests: u32,
    /// Rolling window in closed state (zero disables rollover)
    pub interval: Duration,
    /// Time spent open before probing (zero means 60s)
    pub timeout: Duration,
    /// Trip policy (default: more than 5 consecutive failures)
    pub ready_to_trip: Option<TripPolicy>,
    /// Success policy (default: every error is a failure)
    pub is_successful: Option<SuccessPolicy>,
    /// Transition hook
    pub on_state_change: Option<StateChangeHook>,
}

impl CircuitBreakerConfig {
    /// Configuration with defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_requests: 0,
            interval: Duration::ZERO,
            timeout: Duration::ZERO,
            ready_to_trip: None,
            is_successful: None,
            on_state_change: None,
        }
    }

    /// Set the half-open probe budget
    pub fn max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Set the closed-state rolling window
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the open-state timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Trip when consecutive failures exceed `threshold`
    pub fn consecutive_failures(self, threshold: u64) -> Self {
        self.ready_to_trip(move |counts| counts.consecutive_failures > threshold)
    }

    /// Set a custom trip policy
    pub fn ready_to_trip<F>(mut self, policy: F) -> Self
    where
        F: Fn(&Counts) -> bool + Send + Sync + 'static,
    {
        self.ready_to_trip = Some(Arc::new(policy));
        self
    }

    /// Set a custom success policy
    pub fn is_successful<F>(mut self, policy: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.is_successful = Some(Arc::new(policy));
        self
    }

    /// Set a transition hook
    pub fn on_state_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(hook));
        self
    }
}

impl std::fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("ready_to_trip", &self.ready_to_trip.as_ref().map(|_| "<fn>"))
            .field("is_successful", &self.is_successful.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Circuit breaker metrics
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    /// Current state
    pub state: CircuitState,
    /// Current generation
    pub generation: u64,
    /// Counters of the current generation
    pub counts: Counts,
    /// Requests admitted over the breaker's lifetime
    pub total_requests: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
    total_requests: u64,
}

/// Circuit breaker guarding one backend
pub struct CircuitBreaker {
    name: String,
    max_requests: u64,
    interval: Duration,
    timeout: Duration,
    ready_to_trip: TripPolicy,
    is_successful: SuccessPolicy,
    on_state_change: Option<StateChangeHook>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker on the system clock
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a breaker on the given clock
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let interval = config.interval;
        let timeout = if config.timeout.is_zero() {
            DEFAULT_OPEN_TIMEOUT
        } else {
            config.timeout
        };
        let now = clock.now();

        Self {
            name: config.name,
            max_requests: u64::from(config.max_requests.max(1)),
            interval,
            timeout,
            ready_to_trip: config.ready_to_trip.unwrap_or_else(|| {
                Arc::new(|counts: &Counts| counts.consecutive_failures > DEFAULT_CONSECUTIVE_FAILURES)
            }),
            is_successful: config
                .is_successful
                .unwrap_or_else(|| Arc::new(|_: &Error| false)),
            on_state_change: config.on_state_change,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: (!interval.is_zero()).then(|| now + interval),
                total_requests: 0,
            }),
            clock,
        }
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, advancing expired open or closed windows
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.current_state(&mut inner, now).0
    }

    /// Counters of the current generation
    pub fn counts(&self) -> Counts {
        self.inner.lock().counts
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Snapshot of state and counters
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        let (state, generation) = self.current_state(&mut inner, now);
        CircuitBreakerMetrics {
            state,
            generation,
            counts: inner.counts,
            total_requests: inner.total_requests,
        }
    }

    /// Force the breaker closed
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        if inner.state == CircuitState::Closed {
            self.new_generation(&mut inner, now);
        } else {
            self.set_state(&mut inner, CircuitState::Closed, now);
        }
        info!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Run `call` if admitted; an `Err` outcome is judged by the success policy
    pub async fn execute<F, T>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.execute_with(call, |_| None).await
    }

    /// Run `call` if admitted, letting `classify` turn an `Ok` value into a
    /// failure for accounting purposes. The value is still returned.
    ///
    /// A panic inside `call` is recorded as a failure and re-raised. Dropping
    /// the returned future before completion also records a failure.
    pub async fn execute_with<F, T, C>(&self, call: F, classify: C) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        C: FnOnce(&T) -> Option<Error>,
    {
        let generation = self.before_request()?;
        let mut admission = Admission {
            breaker: self,
            generation,
            finished: false,
        };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(value)) => {
                let success = classify(&value).map_or(true, |err| (self.is_successful)(&err));
                admission.finish(success);
                Ok(value)
            }
            Ok(Err(err)) => {
                admission.finish((self.is_successful)(&err));
                Err(err)
            }
            Err(panic) => {
                admission.finish(false);
                std::panic::resume_unwind(panic)
            }
        }
    }

    fn before_request(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        let (state, generation) = self.current_state(&mut inner, now);

        match state {
            CircuitState::Open => Err(Error::CircuitOpen(self.name.clone())),
            CircuitState::HalfOpen if inner.counts.requests >= self.max_requests => {
                Err(Error::HalfOpenRequestExceeded(self.name.clone()))
            }
            _ => {
                inner.counts.on_request();
                inner.total_requests += 1;
                Ok(generation)
            }
        }
    }

    fn after_request(&self, before: u64, success: bool) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        let (state, generation) = self.current_state(&mut inner, now);
        if generation != before {
            debug!(
                breaker = %self.name,
                admitted = before,
                current = generation,
                "Discarding outcome from a previous generation"
            );
            return;
        }

        if success {
            self.on_success(&mut inner, state, now);
        } else {
            self.on_failure(&mut inner, state, now);
        }
    }

    fn on_success(&self, inner: &mut Inner, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => inner.counts.on_success(),
            CircuitState::HalfOpen => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.max_requests {
                    self.set_state(inner, CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut Inner, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => {
                inner.counts.on_failure();
                if (self.ready_to_trip)(&inner.counts) {
                    self.set_state(inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => self.set_state(inner, CircuitState::Open, now),
            CircuitState::Open => {}
        }
    }

    fn current_state(&self, inner: &mut Inner, now: Instant) -> (CircuitState, u64) {
        let expired = inner.expiry.is_some_and(|expiry| expiry <= now);
        match inner.state {
            CircuitState::Closed if expired => self.new_generation(inner, now),
            CircuitState::Open if expired => self.set_state(inner, CircuitState::HalfOpen, now),
            _ => {}
        }
        (inner.state, inner.generation)
    }

    fn set_state(&self, inner: &mut Inner, state: CircuitState, now: Instant) {
        if inner.state == state {
            return;
        }
        let previous = inner.state;
        inner.state = state;
        self.new_generation(inner, now);

        match state {
            CircuitState::Open => warn!(
                breaker = %self.name,
                from = %previous,
                generation = inner.generation,
                "Circuit breaker transitioned to OPEN"
            ),
            _ => info!(
                breaker = %self.name,
                from = %previous,
                to = %state,
                generation = inner.generation,
                "Circuit breaker changed state"
            ),
        }

        if let Some(hook) = &self.on_state_change {
            hook(&self.name, previous, state);
        }
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation += 1;
        inner.counts.clear();
        inner.expiry = match inner.state {
            CircuitState::Closed => (!self.interval.is_zero()).then(|| now + self.interval),
            CircuitState::Open => Some(now + self.timeout),
            CircuitState::HalfOpen => None,
        };
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

/// Admission ticket; records a failure if dropped unfinished
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    finished: bool,
}

impl Admission<'_> {
    fn finish(&mut self, success: bool) {
        if !self.finished {
            self.finished = true;
            self.breaker.after_request(self.generation, success);
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.finish(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::clock::ManualClock;
    use sluice_core::StatusCode;

    fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (CircuitBreaker::with_clock(config, clock.clone()), clock)
    }

    async fn fail(cb: &CircuitBreaker) -> Result<()> {
        cb.execute(async { Err::<(), _>(Error::Upstream("boom".into())) })
            .await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<()> {
        cb.execute(async { Ok(()) }).await
    }

    #[test]
    fn test_defaults_substituted() {
        let (cb, _) = breaker(CircuitBreakerConfig::new("defaults"));
        assert_eq!(cb.max_requests, 1);
        assert_eq!(cb.timeout, DEFAULT_OPEN_TIMEOUT);
        assert!(cb.interval.is_zero());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_default_trip_after_six_consecutive_failures() {
        let (cb, _) = breaker(CircuitBreakerConfig::new("default-trip"));
        for _ in 0..5 {
            assert!(fail(&cb).await.is_err());
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_trip_and_recover() {
        let config = CircuitBreakerConfig::new("backend")
            .max_requests(1)
            .timeout(Duration::from_millis(100))
            .consecutive_failures(2);
        let (cb, clock) = breaker(config);

        for _ in 0..3 {
            assert!(matches!(fail(&cb).await, Err(Error::Upstream(_))));
        }
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(50));
        assert!(matches!(succeed(&cb).await, Err(Error::CircuitOpen(_))));

        clock.advance(Duration::from_millis(50));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let config = CircuitBreakerConfig::new("flaky")
            .timeout(Duration::from_secs(1))
            .consecutive_failures(0);
        let (cb, clock) = breaker(config);

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(1));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_probe_budget() {
        let config = CircuitBreakerConfig::new("probe")
            .max_requests(1)
            .timeout(Duration::from_secs(1))
            .consecutive_failures(0);
        let (cb, clock) = breaker(config);

        let generation = cb.before_request().unwrap();
        cb.after_request(generation, false);
        clock.advance(Duration::from_secs(1));

        let probe = cb.before_request().unwrap();
        assert!(matches!(
            cb.before_request(),
            Err(Error::HalfOpenRequestExceeded(_))
        ));
        cb.after_request(probe, true);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_late_completion_discarded() {
        let config = CircuitBreakerConfig::new("late").consecutive_failures(0);
        let (cb, _) = breaker(config);

        let slow = cb.before_request().unwrap();
        let fast = cb.before_request().unwrap();
        cb.after_request(fast, false);
        assert_eq!(cb.state(), CircuitState::Open);

        let before = cb.metrics();
        cb.after_request(slow, true);
        let after = cb.metrics();
        assert_eq!(before.generation, after.generation);
        assert_eq!(after.counts, Counts::default());
        assert_eq!(after.state, CircuitState::Open);
    }

    #[test]
    fn test_transition_clears_counts_and_advances_generation() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let config = CircuitBreakerConfig::new("hooks")
            .consecutive_failures(1)
            .on_state_change(move |name, from, to| sink.lock().push((name.to_string(), from, to)));
        let (cb, _) = breaker(config);

        let g0 = cb.generation();
        for _ in 0..2 {
            let generation = cb.before_request().unwrap();
            cb.after_request(generation, false);
        }

        assert!(cb.generation() > g0);
        assert_eq!(cb.counts(), Counts::default());
        assert_eq!(
            observed.lock().as_slice(),
            &[("hooks".to_string(), CircuitState::Closed, CircuitState::Open)]
        );
    }

    #[test]
    fn test_interval_rolls_closed_generation() {
        let config = CircuitBreakerConfig::new("window").interval(Duration::from_secs(10));
        let (cb, clock) = breaker(config);

        let generation = cb.before_request().unwrap();
        cb.after_request(generation, false);
        assert_eq!(cb.counts().total_failures, 1);

        clock.advance(Duration::from_secs(10));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts(), Counts::default());
        assert!(cb.generation() > generation);
    }

    #[tokio::test]
    async fn test_classified_response_counts_as_failure() {
        let (cb, _) = breaker(CircuitBreakerConfig::new("status").consecutive_failures(0));

        let status = cb
            .execute_with(async { Ok(StatusCode::INTERNAL_SERVER_ERROR) }, |status| {
                status
                    .is_server_error()
                    .then(|| Error::UpstreamStatus(*status))
            })
            .await
            .unwrap();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_policy_can_forgive_errors() {
        let config = CircuitBreakerConfig::new("forgiving")
            .consecutive_failures(0)
            .is_successful(|err| matches!(err, Error::RouteNotFound(_)));
        let (cb, _) = breaker(config);

        let result = cb
            .execute(async { Err::<(), _>(Error::RouteNotFound("/x".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts().total_successes, 1);
    }

    #[tokio::test]
    async fn test_panic_recorded_and_reraised() {
        let (cb, _) = breaker(CircuitBreakerConfig::new("panicky"));

        let exploded = true;
        let outcome = AssertUnwindSafe(cb.execute(async move {
            if exploded {
                panic!("backend exploded");
            }
            Ok::<(), Error>(())
        }))
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        assert_eq!(cb.counts().total_failures, 1);
    }

    #[tokio::test]
    async fn test_dropped_call_recorded_as_failure() {
        let (cb, _) = breaker(CircuitBreakerConfig::new("dropped"));

        let call = cb.execute(futures::future::pending::<Result<()>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(5), call).await;

        assert!(timed_out.is_err());
        assert_eq!(cb.counts().total_failures, 1);
        assert_eq!(cb.metrics().total_requests, 1);
    }

    #[test]
    fn test_reset_closes_open_breaker() {
        let (cb, _) = breaker(CircuitBreakerConfig::new("reset").consecutive_failures(0));
        let generation = cb.before_request().unwrap();
        cb.after_request(generation, false);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(format!("{}", CircuitState::Closed), "closed");
        assert_eq!(format!("{}", CircuitState::Open), "open");
        assert_eq!(format!("{}", CircuitState::HalfOpen), "half-open");
    }
}
