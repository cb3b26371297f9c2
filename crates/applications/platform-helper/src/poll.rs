//! Bounded polling against eventually-consistent AWS APIs
//!
//! Every wait in the helper (task convergence, log stream presence, rollout
//! state, exec agent readiness) is a fixed-interval poll with a wall-clock
//! deadline measured on the monotonic clock:
//!
//! ```text
//! start ──probe──sleep──probe──sleep── ... ──deadline
//!          │              │
//!          └─ Done(T) ────┴─→ return
//! ```
//!
//! The probe owns the poll's progress state: it receives the state from the
//! previous attempt and hands back the next one, so the caller can report
//! what was last seen when the deadline passes.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default polling interval used by every AWS wait loop
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Interval and deadline for a bounded poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Sleep between attempts
    pub interval: Duration,
    /// Overall deadline, measured from the first attempt
    pub timeout: Duration,
}

impl PollSchedule {
    /// Poll every `interval_secs` for up to `timeout_secs`
    pub const fn new(interval_secs: u64, timeout_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Poll at the default 2s interval for up to `timeout_secs`
    pub const fn with_timeout(timeout_secs: u64) -> Self {
        Self::new(DEFAULT_POLL_INTERVAL_SECS, timeout_secs)
    }
}

/// Result of one probe
#[derive(Debug)]
pub enum Step<T, S> {
    /// Condition reached, stop polling
    Done(T),
    /// Not yet, carry this state into the next attempt
    Continue(S),
}

/// Result of a whole poll
#[derive(Debug)]
pub enum PollOutcome<T, S> {
    /// Condition reached before the deadline
    Done(T),
    /// Deadline passed; `state` is whatever the last probe reported
    TimedOut {
        /// Progress state from the last attempt
        state: S,
        /// Wall-clock time spent polling
        elapsed: Duration,
    },
}

/// Run `probe` until it returns [`Step::Done`] or the schedule's deadline passes.
///
/// Errors returned by the probe abort the poll immediately; the poll never
/// retries an error on its own.
pub async fn poll_until<S, T, F, Fut>(
    schedule: PollSchedule,
    initial: S,
    mut probe: F,
) -> Result<PollOutcome<T, S>>
where
    F: FnMut(S) -> Fut,
    Fut: Future<Output = Result<Step<T, S>>>,
{
    let start = Instant::now();
    let deadline = start + schedule.timeout;
    let mut state = initial;
    let mut attempt = 0u32;

    while Instant::now() < deadline {
        attempt += 1;

        match probe(state).await? {
            Step::Done(value) => return Ok(PollOutcome::Done(value)),
            Step::Continue(next) => state = next,
        }

        debug!(
            attempt,
            elapsed_secs = start.elapsed().as_secs(),
            "Condition not met yet, waiting"
        );
        tokio::time::sleep(schedule.interval).await;
    }

    Ok(PollOutcome::TimedOut {
        state,
        elapsed: start.elapsed(),
    })
}
