//! Per-provider circuit breaker.
//!
//! Closed → Open after `failure_threshold` consecutive failures. Open → Half-Open
//! once the cooldown has elapsed, admitting a single trial. A successful trial
//! closes the circuit and restores the base cooldown; a failed one reopens it
//! with the cooldown multiplied by `backoff_factor`, capped at `max_cooldown`.
//!
//! State lives behind one mutex per provider, held only for the transition.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::ProviderId;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "resilience::circuit";
const METRIC_CIRCUIT_REJECTED_TOTAL: &str = "portico_circuit_rejected_total";
const METRIC_CIRCUIT_TRANSITION_TOTAL: &str = "portico_circuit_transition_total";

/// Hint returned while a half-open trial is already running.
const TRIAL_BUSY_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub backoff_factor: f64,
    pub max_cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_cooldown: Duration::from_secs(300),
        }
    }
}

/// The provider is failing fast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit for provider `{provider}` is open")]
pub struct CircuitOpen {
    pub provider: ProviderId,
    pub retry_after: Duration,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    cooldown: Duration,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    provider: ProviderId,
    config: CircuitConfig,
    inner: Mutex<Inner>,
}

/// Point-in-time view of one provider's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub provider: ProviderId,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Milliseconds until an open circuit admits a trial.
    pub retry_after_ms: Option<u64>,
}

impl CircuitBreaker {
    pub fn new(provider: ProviderId, config: CircuitConfig) -> Self {
        Self {
            provider,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                open_until: None,
                cooldown: config.cooldown,
                trial_in_flight: false,
            }),
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn state(&self) -> CircuitState {
        mutex_lock(&self.inner, SOURCE, "state").state
    }

    /// Fail fast while the circuit is open and its cooldown is running.
    /// Does not claim the half-open trial.
    pub fn check(&self) -> Result<(), CircuitOpen> {
        let inner = mutex_lock(&self.inner, SOURCE, "check");
        match (inner.state, inner.open_until) {
            (CircuitState::Open, Some(until)) => {
                let now = Instant::now();
                if now < until {
                    Err(self.rejected(until - now))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Claim permission for one logical upstream request.
    pub fn acquire(self: &Arc<Self>) -> Result<CircuitPermit, CircuitOpen> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "acquire");
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let now = Instant::now();
                let until = inner.open_until.unwrap_or(now);
                if now < until {
                    return Err(self.rejected(until - now));
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(self.rejected(TRIAL_BUSY_RETRY_AFTER));
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Ok(CircuitPermit {
            breaker: Arc::clone(self),
            trial,
            settled: false,
        })
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let inner = mutex_lock(&self.inner, SOURCE, "snapshot");
        let retry_after_ms = match (inner.state, inner.open_until) {
            (CircuitState::Open, Some(until)) => Some(
                until
                    .saturating_duration_since(Instant::now())
                    .as_millis() as u64,
            ),
            _ => None,
        };
        HealthSnapshot {
            provider: self.provider.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            retry_after_ms,
        }
    }

    fn rejected(&self, retry_after: Duration) -> CircuitOpen {
        counter!(METRIC_CIRCUIT_REJECTED_TOTAL).increment(1);
        CircuitOpen {
            provider: self.provider.clone(),
            retry_after,
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        counter!(METRIC_CIRCUIT_TRANSITION_TOTAL, "to" => to.as_str()).increment(1);
        match to {
            CircuitState::Open => warn!(
                provider = %self.provider,
                from = inner.state.as_str(),
                failures = inner.consecutive_failures,
                cooldown_ms = inner.cooldown.as_millis() as u64,
                "Circuit opened"
            ),
            _ => info!(
                provider = %self.provider,
                from = inner.state.as_str(),
                to = to.as_str(),
                "Circuit state changed"
            ),
        }
        inner.state = to;
    }

    fn open(&self, inner: &mut Inner) {
        let now = Instant::now();
        inner.open_until = Some(
            now.checked_add(inner.cooldown)
                .or_else(|| now.checked_add(self.config.max_cooldown))
                .unwrap_or(now),
        );
        self.transition(inner, CircuitState::Open);
    }

    fn on_success(&self, trial: bool) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "success");
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if trial => {
                inner.consecutive_failures = 0;
                inner.trial_in_flight = false;
                inner.open_until = None;
                inner.cooldown = self.config.cooldown;
                self.transition(&mut inner, CircuitState::Closed);
            }
            // A straggler admitted before the circuit tripped proves nothing.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "failure");
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                inner.cooldown = self.extended_cooldown(inner.cooldown);
                self.open(&mut inner);
            }
            _ => {}
        }
    }

    /// Next cooldown after a failed trial, saturating at `max_cooldown`.
    fn extended_cooldown(&self, current: Duration) -> Duration {
        let max = self.config.max_cooldown;
        Duration::try_from_secs_f64(current.as_secs_f64() * self.config.backoff_factor)
            .map_or(max, |extended| extended.min(max))
    }

    fn on_abandoned(&self, trial: bool) {
        if trial {
            mutex_lock(&self.inner, SOURCE, "abandon").trial_in_flight = false;
        }
    }
}

/// Admission for one logical request. Settle it with
/// [`CircuitPermit::success`] or [`CircuitPermit::failure`]; dropping it
/// unsettled frees a half-open trial slot without changing state.
#[derive(Debug)]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl CircuitPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandoned(self.trial);
        }
    }
}
