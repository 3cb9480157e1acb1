//! Reconciliation loop primitives.
//!
//! This library provides helpers for implementing reconciliation loops
//! that converge desired state to actual state. Key concepts:
//!
//! - **Desired state**: What the node should look like (from the node repository).
//! - **Actual state**: What the container runtime reports right now.
//! - **Convergence**: The process of making actual match desired, one tick at a time.
//!
//! # Invariants
//!
//! - All operations are idempotent
//! - A tick never blocks waiting for an external party; it defers to the next tick
//! - Retries are bounded by a backoff policy, never a tight loop

use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A retry gate is closed.
    #[error("retry of {resource} deferred for {remaining:?}")]
    Deferred {
        resource: String,
        remaining: Duration,
    },
}

/// Convergence status for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Resource has converged (actual matches desired).
    Converged,

    /// Resource is converging (actual is moving toward desired).
    Converging,

    /// Progress is blocked on an external decision (e.g. a denied suspend).
    Waiting,

    /// Status is unknown (insufficient data).
    Unknown,
}

impl std::fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Converged => "converged",
            Self::Converging => "converging",
            Self::Waiting => "waiting",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Exponential backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_RETRY_BASE,
            max: DEFAULT_RETRY_MAX,
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// A policy without jitter.
    pub fn fixed_ratio(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: 0.0,
        }
    }

    /// Calculate delay for the given attempt number (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(32) as i32;
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(exponent);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter_range = delay * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        // Jitter never pushes the delay past the configured maximum.
        let final_delay = (delay + jitter).clamp(0.0, self.max.as_millis() as f64);
        Duration::from_millis(final_delay as u64)
    }
}

/// A "not before" gate for one retried concern.
///
/// Each failure closes the gate for `policy.delay(failures)`; a success
/// resets it. Callers `check` the gate at the start of a tick and skip the
/// guarded call while it is closed.
#[derive(Debug, Clone)]
pub struct RetryGate {
    policy: BackoffPolicy,
    failures: u32,
    not_before: Option<Instant>,
}

impl RetryGate {
    /// Create an open gate.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            not_before: None,
        }
    }

    /// Time left until the gate opens, if closed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.not_before
            .and_then(|t| t.checked_duration_since(now))
            .filter(|d| !d.is_zero())
    }

    /// Check the gate, returning `ReconcileError::Deferred` while closed.
    pub fn check(&self, resource: &str, now: Instant) -> Result<(), ReconcileError> {
        match self.remaining(now) {
            Some(remaining) => Err(ReconcileError::Deferred {
                resource: resource.to_string(),
                remaining,
            }),
            None => Ok(()),
        }
    }

    /// Record a failed attempt, closing the gate. Returns the delay applied.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        let delay = self.policy.delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.not_before = Some(now + delay);
        delay
    }

    /// Record a successful attempt, reopening the gate.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.not_before = None;
    }

    /// Number of consecutive failures.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Default repository poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default per-agent tick interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Default first retry delay after a denial or report failure.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);

/// Default upper bound on retry delay.
pub const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(60);
