//! Per-agent circuit breaker.
//!
//! Each agent id owns a tri-state machine: **Closed** (calls pass,
//! consecutive failures counted), **Open** (calls short-circuited until the
//! reset deadline), **Half-Open** (exactly one probe call outstanding).
//! State for every agent lives behind one mutex, so transitions are
//! linearizable per agent.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Threshold and reset behavior for one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerPolicy {
    /// Consecutive failures before the circuit opens; 0 disables the
    /// breaker entirely.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed.
    pub reset_timeout: Duration,
    /// Deadline for the half-open probe call; zero falls back to the
    /// engine's default per-attempt timeout.
    pub probe_timeout: Duration,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 0,
            reset_timeout: Duration::from_secs(60),
            probe_timeout: Duration::ZERO,
        }
    }
}

impl CircuitBreakerPolicy {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            probe_timeout: Duration::ZERO,
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub(crate) fn normalized(mut self) -> Self {
        if self.reset_timeout.is_zero() {
            self.reset_timeout = Duration::from_secs(60);
        }
        self
    }
}

/// Outcome of [`CircuitBreaker::allow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call may proceed. `probe` marks the single half-open trial call;
    /// the engine bounds it with `probe_timeout` instead of the default.
    Granted { probe: bool },
    /// The circuit is open (or a probe is already in flight).
    Rejected,
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted { .. })
    }
}

/// Observable state of one agent's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Default, Clone)]
struct CircuitState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    half_open_probe_active: bool,
}

/// Breaker state for every agent seen by one engine instance.
///
/// State persists across runs of the same engine, which is what lets a
/// second plan short-circuit on an agent the first plan burned.
#[derive(Default)]
pub struct CircuitBreaker {
    states: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether a call to `agent_id` may proceed at `now`.
    pub fn allow(&self, agent_id: &str, policy: &CircuitBreakerPolicy, now: Instant) -> Admission {
        if policy.failure_threshold == 0 {
            return Admission::Granted { probe: false };
        }

        let mut states = self.states.lock();
        let state = states.entry(agent_id.to_string()).or_default();

        if state.half_open_probe_active {
            return Admission::Rejected;
        }
        match state.open_until {
            None => Admission::Granted { probe: false },
            Some(open_until) if now < open_until => Admission::Rejected,
            Some(_) => {
                // Reset deadline passed: hand out exactly one trial call.
                state.open_until = None;
                state.consecutive_failures = 0;
                state.half_open_probe_active = true;
                Admission::Granted { probe: true }
            }
        }
    }

    /// Clears failure history and closes the circuit.
    pub fn record_success(&self, agent_id: &str) {
        let mut states = self.states.lock();
        let state = states.entry(agent_id.to_string()).or_default();
        state.consecutive_failures = 0;
        state.open_until = None;
        state.half_open_probe_active = false;
    }

    /// Counts a failure; returns `true` when this failure opened the
    /// circuit (threshold reached, or a half-open probe failed).
    pub fn record_failure(
        &self,
        agent_id: &str,
        policy: &CircuitBreakerPolicy,
        now: Instant,
    ) -> bool {
        if policy.failure_threshold == 0 {
            return false;
        }
        let reset_timeout = if policy.reset_timeout.is_zero() {
            Duration::from_secs(60)
        } else {
            policy.reset_timeout
        };

        let mut states = self.states.lock();
        let state = states.entry(agent_id.to_string()).or_default();

        if state.half_open_probe_active {
            state.open_until = Some(now + reset_timeout);
            state.consecutive_failures = 0;
            state.half_open_probe_active = false;
            return true;
        }

        state.consecutive_failures += 1;
        if state.consecutive_failures >= policy.failure_threshold {
            state.open_until = Some(now + reset_timeout);
            state.consecutive_failures = 0;
            state.half_open_probe_active = false;
            return true;
        }
        false
    }

    /// Current state of `agent_id`'s circuit, for observability. A circuit
    /// whose reset deadline has passed still reports `Open` until the probe
    /// is handed out by `allow`.
    pub fn state(&self, agent_id: &str) -> BreakerState {
        let states = self.states.lock();
        match states.get(agent_id) {
            None => BreakerState::Closed,
            Some(state) if state.half_open_probe_active => BreakerState::HalfOpen,
            Some(state) if state.open_until.is_some() => BreakerState::Open,
            Some(_) => BreakerState::Closed,
        }
    }
}
