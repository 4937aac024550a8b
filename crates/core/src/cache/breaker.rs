//! Circuit breaker state machine.
//!
//! Pure bookkeeping with no clock or I/O of its own: callers pass `now` into
//! every method and act on the returned [`Admission`] and [`Transition`]s.
//! Each admission carries the generation of the state that granted it, and
//! outcomes reported against an older generation are discarded.
//! The async adapter that wraps shared-store calls lives in the `tiercache`
//! crate.
//!
//! States:
//! - Closed: calls proceed, outcomes fill a count-based sliding window
//! - Open: calls are rejected until `open_duration` has elapsed
//! - HalfOpen: a limited number of trial calls decide between Closed and Open

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
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

    /// Numeric encoding for gauges: 0 closed, 1 open, 2 half-open.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds and timings of a breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    /// Failure percentage (0-100) at or above which the breaker opens.
    pub failure_rate_threshold: f64,
    /// Number of most recent outcomes kept while closed.
    pub window_size: usize,
    /// Outcomes required in the window before the rate is evaluated.
    pub minimum_calls: usize,
    pub open_duration: Duration,
    /// Concurrent trial calls permitted while half-open, and the number of
    /// trial successes needed to close.
    pub half_open_calls: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            window_size: 20,
            minimum_calls: 10,
            open_duration: Duration::from_secs(30),
            half_open_calls: 3,
        }
    }
}

/// A state change caused by a call or its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Whether a call may proceed, plus any transition the check triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub permitted: bool,
    pub transition: Option<Transition>,
    /// Pass back to [`BreakerMachine::on_success`], [`BreakerMachine::on_failure`]
    /// or [`BreakerMachine::release`] once the call settles.
    pub generation: u64,
}

#[derive(Debug, Clone)]
enum Phase {
    /// `true` marks a failed call.
    Closed { window: VecDeque<bool> },
    Open { since: Instant },
    HalfOpen { in_flight: u32, successes: u32 },
}

/// The breaker itself. Not synchronized; wrap it in a mutex to share it.
#[derive(Debug, Clone)]
pub struct BreakerMachine {
    settings: BreakerSettings,
    phase: Phase,
    /// Bumped on every transition.
    generation: u64,
}

impl BreakerMachine {
    pub fn new(settings: BreakerSettings) -> Self {
        let window = VecDeque::with_capacity(settings.window_size);
        Self {
            settings,
            phase: Phase::Closed { window },
            generation: 0,
        }
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    pub fn state(&self) -> CircuitState {
        match self.phase {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Failure percentage over the current window, `None` outside Closed or
    /// with an empty window.
    pub fn failure_rate(&self) -> Option<f64> {
        match &self.phase {
            Phase::Closed { window } if !window.is_empty() => {
                let failures = window.iter().filter(|failed| **failed).count();
                Some(failures as f64 * 100.0 / window.len() as f64)
            }
            _ => None,
        }
    }

    /// Asks permission for one call.
    pub fn try_acquire(&mut self, now: Instant) -> Admission {
        let limit = self.settings.half_open_calls.max(1);
        match &mut self.phase {
            Phase::Closed { .. } => Admission {
                permitted: true,
                transition: None,
                generation: self.generation,
            },
            Phase::Open { since } => {
                if now.saturating_duration_since(*since) >= self.settings.open_duration {
                    let transition = self.enter(Phase::HalfOpen {
                        in_flight: 1,
                        successes: 0,
                    });
                    Admission {
                        permitted: true,
                        transition: Some(transition),
                        generation: self.generation,
                    }
                } else {
                    Admission {
                        permitted: false,
                        transition: None,
                        generation: self.generation,
                    }
                }
            }
            Phase::HalfOpen { in_flight, .. } => {
                let permitted = *in_flight < limit;
                if permitted {
                    *in_flight += 1;
                }
                Admission {
                    permitted,
                    transition: None,
                    generation: self.generation,
                }
            }
        }
    }

    /// Records a successful call admitted under `generation`.
    pub fn on_success(&mut self, generation: u64, _now: Instant) -> Option<Transition> {
        if generation != self.generation {
            return None;
        }
        let needed = self.settings.half_open_calls.max(1);
        match &mut self.phase {
            Phase::Closed { window } => {
                Self::push(window, false, self.settings.window_size);
                None
            }
            Phase::Open { .. } => None,
            Phase::HalfOpen {
                in_flight,
                successes,
            } => {
                *in_flight = in_flight.saturating_sub(1);
                *successes += 1;
                if *successes >= needed {
                    let window = VecDeque::with_capacity(self.settings.window_size);
                    Some(self.enter(Phase::Closed { window }))
                } else {
                    None
                }
            }
        }
    }

    /// Records a failed call admitted under `generation`.
    pub fn on_failure(&mut self, generation: u64, now: Instant) -> Option<Transition> {
        if generation != self.generation {
            return None;
        }
        match &mut self.phase {
            Phase::Closed { window } => {
                Self::push(window, true, self.settings.window_size);
                let minimum = self.settings.minimum_calls.min(self.settings.window_size).max(1);
                if window.len() < minimum {
                    return None;
                }
                let failures = window.iter().filter(|failed| **failed).count();
                let rate = failures as f64 * 100.0 / window.len() as f64;
                if rate >= self.settings.failure_rate_threshold {
                    Some(self.enter(Phase::Open { since: now }))
                } else {
                    None
                }
            }
            Phase::Open { .. } => None,
            Phase::HalfOpen { .. } => Some(self.enter(Phase::Open { since: now })),
        }
    }

    /// Gives back a permit whose call ended without an outcome (the caller
    /// was dropped mid-flight).
    pub fn release(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }
        if let Phase::HalfOpen { in_flight, .. } = &mut self.phase {
            *in_flight = in_flight.saturating_sub(1);
        }
    }

    fn enter(&mut self, next: Phase) -> Transition {
        let from = self.state();
        self.phase = next;
        self.generation += 1;
        Transition {
            from,
            to: self.state(),
        }
    }

    fn push(window: &mut VecDeque<bool>, failed: bool, size: usize) {
        if window.len() >= size.max(1) {
            window.pop_front();
        }
        window.push_back(failed);
    }
}

impl Default for BreakerMachine {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}
