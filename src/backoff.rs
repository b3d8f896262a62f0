//! Per-stream back-off after failed poll cycles
//!
//! [`BackoffPolicy`] is a pure state transition: it maps the current
//! [`BackoffState`] and a [`CycleOutcome`] to the next state. It never sleeps
//! and never touches the network, so it can be tested without a clock.
//!
//! # Example
//!
//! ```
//! use gkg_watch::backoff::BackoffPolicy;
//! use gkg_watch::types::CycleOutcome;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::new(Duration::from_secs(120), Duration::from_secs(1800));
//! let mut state = policy.initial_state();
//!
//! let failure = CycleOutcome::TransientError { cause: "timeout".into() };
//! state = policy.next(&state, &failure);
//! assert_eq!(state.current_interval, Duration::from_secs(240));
//!
//! state = policy.next(&state, &CycleOutcome::Success { new_archive: false });
//! assert_eq!(state.current_interval, Duration::from_secs(120));
//! ```

use crate::config::PollingConfig;
use crate::types::CycleOutcome;
use rand::Rng;
use std::time::Duration;

/// Largest fraction of the interval added as jitter
const MAX_JITTER_FRACTION: f64 = 0.25;

/// Back-off bookkeeping for one stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffState {
    /// Failed cycles since the last success
    pub consecutive_failures: u32,
    /// Wait before the next cycle
    pub current_interval: Duration,
}

/// Maps cycle outcomes to the wait before the next cycle
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    multiplier: f64,
    ignore_malformed: bool,
    jitter: bool,
}

impl BackoffPolicy {
    /// Doubling policy between `base` and `max`
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            multiplier: 2.0,
            ignore_malformed: false,
            jitter: false,
        }
    }

    /// Build the policy described by the polling config
    pub fn from_config(config: &PollingConfig) -> Self {
        Self::new(config.interval, config.max_interval)
            .with_multiplier(config.backoff_multiplier)
            .with_ignore_malformed(config.ignore_malformed)
            .with_jitter(config.jitter)
    }

    /// Set the growth factor; values below 1.0 are clamped to 1.0
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        self
    }

    /// Keep the base interval after malformed pointers
    pub fn with_ignore_malformed(mut self, ignore: bool) -> Self {
        self.ignore_malformed = ignore;
        self
    }

    /// Randomise the actual sleep
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Base interval
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Interval ceiling
    pub fn max(&self) -> Duration {
        self.max
    }

    /// State of a stream that has not failed yet
    pub fn initial_state(&self) -> BackoffState {
        BackoffState {
            consecutive_failures: 0,
            current_interval: self.base,
        }
    }

    /// Compute the state after `outcome`
    ///
    /// Success resets to the base interval. Transient errors grow the interval
    /// by the multiplier up to the ceiling. Malformed feeds count as transient
    /// errors unless ignore mode is set, in which case the failure is counted
    /// but the interval stays at base.
    pub fn next(&self, state: &BackoffState, outcome: &CycleOutcome) -> BackoffState {
        match outcome {
            CycleOutcome::Success { .. } => self.initial_state(),
            CycleOutcome::MalformedFeed { .. } if self.ignore_malformed => BackoffState {
                consecutive_failures: state.consecutive_failures.saturating_add(1),
                current_interval: self.base,
            },
            CycleOutcome::TransientError { .. } | CycleOutcome::MalformedFeed { .. } => {
                BackoffState {
                    consecutive_failures: state.consecutive_failures.saturating_add(1),
                    current_interval: self.grow(state.current_interval),
                }
            }
        }
    }

    /// How long to actually sleep in the given state
    ///
    /// Equal to `current_interval` unless jitter is enabled, which adds up to
    /// 25% on top. The state itself is never jittered so it stays monotonic.
    pub fn sleep_duration(&self, state: &BackoffState) -> Duration {
        if self.jitter {
            add_jitter(state.current_interval)
        } else {
            state.current_interval
        }
    }

    fn grow(&self, interval: Duration) -> Duration {
        // Float overflow past Duration::MAX saturates through the ceiling check
        let next_secs = interval.as_secs_f64() * self.multiplier;
        if !next_secs.is_finite() || next_secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::try_from_secs_f64(next_secs)
            .map_or(self.max, |next| next.max(interval).min(self.max))
    }
}

/// Stretch `delay` by up to [`MAX_JITTER_FRACTION`], saturating at `delay`
/// itself when the result does not fit in a `Duration`
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=MAX_JITTER_FRACTION);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
        .map_or(delay, |jittered| jittered.max(delay))
}
