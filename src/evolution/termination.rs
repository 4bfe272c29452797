use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Source of elapsed run time, in seconds since the run started.
pub trait Clock {
    fn elapsed_seconds(&self) -> f64;
}

/// Monotonic wall clock captured once at run start.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Stopwatch {
            start: Instant::now(),
        }
    }
}

impl Clock for Stopwatch {
    fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// OR-combined stopping conditions. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminationCriteria {
    pub time_limit: Option<f64>,
    pub iterations_limit: Option<u64>,
}

impl TerminationCriteria {
    pub fn new(time_limit: Option<f64>, iterations_limit: Option<u64>) -> Self {
        TerminationCriteria {
            time_limit,
            iterations_limit,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.time_limit.is_some() || self.iterations_limit.is_some()
    }

    /// True once either budget is exhausted.
    pub fn are_met(&self, elapsed_seconds: f64, iterations: u64) -> bool {
        self.time_limit.is_some_and(|limit| elapsed_seconds >= limit)
            || self.iterations_limit.is_some_and(|limit| iterations >= limit)
    }

    /// `time_limit - elapsed`, or infinity without a time limit.
    pub fn remaining_time(&self, elapsed_seconds: f64) -> f64 {
        self.time_limit
            .map_or(f64::INFINITY, |limit| limit - elapsed_seconds)
    }
}
