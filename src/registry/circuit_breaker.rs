use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// Failure ratio over the rolling window that opens a closed circuit.
    pub error_rate_threshold: f64,
    pub window_size: usize,
    /// Calls the window must hold before the error rate is considered.
    pub min_calls: usize,
    pub cooldown_ms: u64,
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            error_rate_threshold: 0.5,
            window_size: 20,
            min_calls: 10,
            cooldown_ms: 30_000,
            half_open_max_probes: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Externally visible circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerState {
    Closed,
    Open { opened_at: DateTime<Utc> },
    HalfOpen { probes_in_flight: u32 },
}

/// A state change the caller may want to report. Moving to half-open is not
/// reported; it happens lazily inside `try_acquire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    Opened,
    Closed,
}

/// Per-provider health guard. Not internally synchronized: the registry keeps one
/// behind each provider's mutex. Every operation has an `_at` form taking `now`.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitBreakerState,
    last_transition: DateTime<Utc>,
    consecutive_failures: u32,
    /// Rolling outcomes, `true` for failure.
    window: VecDeque<bool>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::new_at(config, Utc::now())
    }

    pub fn new_at(config: CircuitBreakerConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: CircuitBreakerState::Closed,
            last_transition: now,
            consecutive_failures: 0,
            window: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn raw_state(&self) -> &CircuitBreakerState {
        &self.state
    }

    pub fn last_transition(&self) -> DateTime<Utc> {
        self.last_transition
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Failure ratio over the rolling window; 0 when empty.
    pub fn error_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().filter(|failed| **failed).count() as f64 / self.window.len() as f64
    }

    pub fn state(&self) -> CircuitState {
        self.state_at(Utc::now())
    }

    /// State as a caller would observe it at `now`: an open circuit whose cool-down
    /// has elapsed reports half-open even before the next acquire moves it.
    pub fn state_at(&self, now: DateTime<Utc>) -> CircuitState {
        match self.state {
            CircuitBreakerState::Closed => CircuitState::Closed,
            CircuitBreakerState::Open { opened_at } if self.cooled_down(opened_at, now) => {
                CircuitState::HalfOpen
            }
            CircuitBreakerState::Open { .. } => CircuitState::Open,
            CircuitBreakerState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    fn cooled_down(&self, opened_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let cooldown = chrono::Duration::from_std(self.config.cooldown()).unwrap_or_default();
        now.signed_duration_since(opened_at) >= cooldown
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Utc::now())
    }

    /// Admit a call. Moves open to half-open once the cool-down has elapsed and
    /// hands out at most `half_open_max_probes` concurrent probe slots.
    pub fn try_acquire_at(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open { opened_at } => {
                if !self.cooled_down(opened_at, now) {
                    return false;
                }
                self.transition(CircuitBreakerState::HalfOpen { probes_in_flight: 1 }, now);
                debug!("circuit half-open, admitting probe");
                true
            }
            CircuitBreakerState::HalfOpen {
                ref mut probes_in_flight,
            } => {
                if *probes_in_flight >= self.config.half_open_max_probes.max(1) {
                    return false;
                }
                *probes_in_flight += 1;
                true
            }
        }
    }

    pub fn record_success(&mut self) -> Option<CircuitTransition> {
        self.record_success_at(Utc::now())
    }

    pub fn record_success_at(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        self.consecutive_failures = 0;
        match self.state {
            CircuitBreakerState::HalfOpen { .. } => {
                self.transition(CircuitBreakerState::Closed, now);
                self.window.clear();
                info!("circuit closed after successful probe");
                Some(CircuitTransition::Closed)
            }
            CircuitBreakerState::Closed => {
                self.push_outcome(false);
                None
            }
            CircuitBreakerState::Open { .. } => None,
        }
    }

    pub fn record_failure(&mut self) -> Option<CircuitTransition> {
        self.record_failure_at(Utc::now())
    }

    pub fn record_failure_at(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        self.consecutive_failures += 1;
        match self.state {
            CircuitBreakerState::HalfOpen { .. } => {
                self.transition(CircuitBreakerState::Open { opened_at: now }, now);
                warn!("probe failed, circuit re-opened");
                Some(CircuitTransition::Opened)
            }
            CircuitBreakerState::Closed => {
                self.push_outcome(true);
                let rate_tripped = self.window.len() >= self.config.min_calls.max(1)
                    && self.error_rate() > self.config.error_rate_threshold;
                if self.consecutive_failures >= self.config.failure_threshold.max(1) || rate_tripped {
                    self.transition(CircuitBreakerState::Open { opened_at: now }, now);
                    warn!(
                        consecutive_failures = self.consecutive_failures,
                        error_rate = self.error_rate(),
                        "circuit opened"
                    );
                    Some(CircuitTransition::Opened)
                } else {
                    None
                }
            }
            // A call admitted before the circuit opened; the open timestamp stays.
            CircuitBreakerState::Open { .. } => None,
        }
    }

    /// Release a probe slot without judging the provider. Used for caller
    /// cancellation and for request-scoped errors.
    pub fn record_cancelled(&mut self) {
        if let CircuitBreakerState::HalfOpen {
            ref mut probes_in_flight,
        } = self.state
        {
            *probes_in_flight = probes_in_flight.saturating_sub(1);
        }
    }

    pub fn force_open_at(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        if matches!(self.state, CircuitBreakerState::Open { .. }) {
            return None;
        }
        self.transition(CircuitBreakerState::Open { opened_at: now }, now);
        Some(CircuitTransition::Opened)
    }

    pub fn force_close_at(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        self.consecutive_failures = 0;
        self.window.clear();
        if self.state == CircuitBreakerState::Closed {
            return None;
        }
        self.transition(CircuitBreakerState::Closed, now);
        Some(CircuitTransition::Closed)
    }

    fn push_outcome(&mut self, failed: bool) {
        self.window.push_back(failed);
        while self.window.len() > self.config.window_size.max(1) {
            self.window.pop_front();
        }
    }

    fn transition(&mut self, state: CircuitBreakerState, now: DateTime<Utc>) {
        self.state = state;
        self.last_transition = now;
    }
}
