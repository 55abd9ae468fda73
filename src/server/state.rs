//! Health state machine and the consecutive-failure breaker

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pool lifecycle as seen by health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Extractors are loading; health checks answer `initializing`
    Initializing,
    /// Every worker is up and jobs are accepted
    Ready,
    /// The breaker tripped or a worker failed to start; no new jobs
    Terminated,
}

impl HealthState {
    #[must_use]
    pub fn accepts_jobs(self) -> bool {
        self != Self::Terminated
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// How a finished job affects the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Extraction succeeded, even if a later stage failed; resets the counter
    Succeeded,
    /// Failed before extraction finished (bad input, no subject); counter untouched
    Rejected,
    /// Extraction failed or the worker panicked; counts towards the threshold
    Failed,
}

/// Counters owned by the pool supervisor
///
/// Only the supervisor task mutates this, one outcome at a time, so the
/// threshold is global across workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolState {
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    jobs_finished: u64,
    jobs_failed: u64,
}

impl WorkerPoolState {
    #[must_use]
    pub fn new(max_consecutive_failures: u32) -> Self {
        Self {
            max_consecutive_failures: max_consecutive_failures.max(1),
            consecutive_failures: 0,
            jobs_finished: 0,
            jobs_failed: 0,
        }
    }

    /// Fold one outcome in; returns `true` when the breaker trips
    pub fn record(&mut self, outcome: JobOutcome) -> bool {
        self.jobs_finished += 1;
        match outcome {
            JobOutcome::Succeeded => self.consecutive_failures = 0,
            JobOutcome::Rejected => {},
            JobOutcome::Failed => {
                self.jobs_failed += 1;
                self.consecutive_failures += 1;
            },
        }
        self.is_tripped()
    }

    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.consecutive_failures >= self.max_consecutive_failures
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    #[must_use]
    pub fn jobs_finished(&self) -> u64 {
        self.jobs_finished
    }

    #[must_use]
    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_at_threshold() {
        let mut state = WorkerPoolState::new(3);
        assert!(!state.record(JobOutcome::Failed));
        assert!(!state.record(JobOutcome::Failed));
        assert!(state.record(JobOutcome::Failed));
        assert_eq!(state.jobs_failed(), 3);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut state = WorkerPoolState::new(2);
        state.record(JobOutcome::Failed);
        state.record(JobOutcome::Succeeded);
        assert_eq!(state.consecutive_failures(), 0);
        assert!(!state.record(JobOutcome::Failed));
    }

    #[test]
    fn test_rejections_do_not_count() {
        let mut state = WorkerPoolState::new(2);
        state.record(JobOutcome::Failed);
        for _ in 0..5 {
            assert!(!state.record(JobOutcome::Rejected));
        }
        assert_eq!(state.consecutive_failures(), 1);
        assert_eq!(state.jobs_finished(), 6);
    }

    #[test]
    fn test_health_labels() {
        assert_eq!(HealthState::Initializing.to_string(), "initializing");
        assert!(HealthState::Initializing.accepts_jobs());
        assert!(!HealthState::Terminated.accepts_jobs());
    }
}
