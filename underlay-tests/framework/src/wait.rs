// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded polling: evaluate a predicate until it passes or a deadline
//! expires.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use thiserror::Error;
use tracing::{debug, trace};

/// The result of one evaluation of a polled predicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Passed,

    /// The predicate does not hold yet. The payload describes why.
    Failed(Option<String>),
}

impl Outcome {
    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self::Failed(Some(diagnostic.into()))
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Passed | Self::Failed(None) => None,
            Self::Failed(Some(d)) => Some(d),
        }
    }
}

impl From<bool> for Outcome {
    fn from(passed: bool) -> Self {
        if passed {
            Self::Passed
        } else {
            Self::Failed(None)
        }
    }
}

#[derive(Clone, Debug, Error)]
#[error(
    "timed out after {waited:?} ({attempts} attempt(s)): {}",
    diagnostic.as_deref().unwrap_or("condition not met")
)]
pub struct PollingTimeoutError {
    /// Time spent polling, which is never less than the requested timeout.
    pub waited: Duration,
    pub attempts: u32,
    /// The diagnostic of the last failed evaluation.
    pub diagnostic: Option<String>,
}

/// Error from [`Poller::try_wait_until`].
#[derive(Debug, Error)]
pub enum WaitError<E> {
    #[error(transparent)]
    Timeout(#[from] PollingTimeoutError),

    /// The predicate itself failed. Polling stops at the first such error.
    #[error("polled operation failed")]
    Failed(#[source] E),
}

impl WaitError<anyhow::Error> {
    /// Flattens into an `anyhow::Error`, keeping the predicate's own error
    /// unwrapped so its context chain survives.
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            Self::Timeout(e) => e.into(),
            Self::Failed(e) => e,
        }
    }
}

/// The timeout for a check over `count` resources, each of which is allowed
/// `per_resource`.
pub fn scaled_timeout(per_resource: Duration, count: usize) -> Duration {
    per_resource.saturating_mul(u32::try_from(count).unwrap_or(u32::MAX))
}

/// The delay policy between predicate evaluations.
///
/// Delays grow exponentially from `initial_interval` up to `max_interval`.
/// The final delay is clamped so that polling never sleeps past the deadline,
/// but a timeout is only reported once the full duration has elapsed.
#[derive(Clone, Debug)]
pub struct Poller {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for Poller {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            multiplier: 1.5,
        }
    }
}

impl Poller {
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        Self { initial_interval, max_interval, ..Default::default() }
    }

    /// Evaluates `predicate` until it passes or `timeout` elapses. A zero
    /// timeout evaluates the predicate exactly once.
    pub fn wait_until<P>(
        &self,
        timeout: Duration,
        mut predicate: P,
    ) -> Result<(), PollingTimeoutError>
    where
        P: FnMut() -> Outcome,
    {
        self.try_wait_until(timeout, || Ok::<_, Infallible>(predicate()))
            .map_err(|e| match e {
                WaitError::Timeout(e) => e,
                WaitError::Failed(never) => match never {},
            })
    }

    /// Like [`Poller::wait_until`], but the predicate may fail outright. Such
    /// a failure is returned immediately and is not retried.
    pub fn try_wait_until<P, E>(
        &self,
        timeout: Duration,
        mut predicate: P,
    ) -> Result<(), WaitError<E>>
    where
        P: FnMut() -> Result<Outcome, E>,
    {
        let start = Instant::now();
        let mut backoff = self.backoff();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let diagnostic = match predicate().map_err(WaitError::Failed)? {
                Outcome::Passed => {
                    debug!(attempts, elapsed = ?start.elapsed(), "condition met");
                    return Ok(());
                }
                Outcome::Failed(diagnostic) => diagnostic,
            };

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(PollingTimeoutError {
                    waited: elapsed,
                    attempts,
                    diagnostic,
                }
                .into());
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(self.max_interval)
                .min(timeout - elapsed);
            trace!(attempts, ?delay, ?diagnostic, "condition not met yet");
            std::thread::sleep(delay);
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}
