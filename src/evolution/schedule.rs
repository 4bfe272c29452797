use crate::consts::MIN_SNAPSHOT_TIME_BASELINE;
use crate::evolution::termination::TerminationCriteria;
use serde::{Deserialize, Serialize};

/// Why a snapshot is being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotTrigger {
    Initial,
    Iteration,
    Time,
    Final,
}

/// Adaptive snapshot schedule.
///
/// Snapshots are spread geometrically over the remaining time and iteration
/// budgets so that early search is sampled more densely than late search.
/// After every capture the growth factors are recomputed from the new
/// baseline with one fewer snapshot left, so the progression lands on the
/// budget ceiling exactly when the quota runs out:
///
/// ```text
/// factor = (limit / baseline) ^ (1 / (quota - taken))
/// next   = baseline * factor
/// ```
///
/// The time baseline is the elapsed time of the last capture (floored at
/// [`MIN_SNAPSHOT_TIME_BASELINE`]), the iteration baseline is the iteration
/// of the last capture plus one. The first capture (before the loop) and the
/// last one (after it) are driven by the caller; once at most one snapshot
/// remains only the final capture is left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSchedule {
    quota: usize,
    taken: usize,
    time_limit: Option<f64>,
    iterations_limit: Option<u64>,
    time_factor: f64,
    iteration_factor: f64,
    next_time: f64,
    next_iteration: u64,
    last_time: f64,
    last_iteration: u64,
}

impl SnapshotSchedule {
    pub fn new(quota: usize, criteria: &TerminationCriteria) -> Self {
        SnapshotSchedule {
            quota,
            taken: 0,
            time_limit: criteria.time_limit,
            iterations_limit: criteria.iterations_limit,
            time_factor: 1.0,
            iteration_factor: 1.0,
            next_time: 0.0,
            next_iteration: 0,
            last_time: 0.0,
            last_iteration: 0,
        }
    }

    /// Adaptive captures happen only while more than one snapshot is left.
    fn is_adaptive(&self) -> bool {
        self.quota > self.taken + 1
    }

    /// Whether the unconditional snapshot before the loop should be taken.
    pub fn takes_initial(&self) -> bool {
        self.is_adaptive()
    }

    /// Whether the unconditional snapshot after the loop should be taken.
    pub fn takes_final(&self) -> bool {
        self.quota > 0
    }

    /// Checks whether a capture is due after an iteration.
    ///
    /// The iteration trigger is checked first; the time trigger only fires if
    /// the iteration trigger did not.
    pub fn due(&self, iteration: u64, elapsed_seconds: f64) -> Option<SnapshotTrigger> {
        if !self.is_adaptive() {
            return None;
        }
        if iteration >= self.next_iteration {
            Some(SnapshotTrigger::Iteration)
        } else if elapsed_seconds >= self.next_time {
            Some(SnapshotTrigger::Time)
        } else {
            None
        }
    }

    /// Registers a capture and recomputes the next due points.
    pub fn record(&mut self, iteration: u64, elapsed_seconds: f64) {
        self.taken += 1;
        self.last_iteration = iteration;
        self.last_time = elapsed_seconds;
        self.reschedule();
    }

    fn reschedule(&mut self) {
        if !self.is_adaptive() {
            self.next_time = 0.0;
            self.next_iteration = 0;
            return;
        }
        let exponent = 1.0 / (self.quota - self.taken) as f64;

        match self.time_limit {
            Some(limit) => {
                let baseline = self.last_time.max(MIN_SNAPSHOT_TIME_BASELINE);
                self.time_factor = (limit / baseline).powf(exponent);
                self.next_time = baseline * self.time_factor;
            }
            None => {
                self.time_factor = 1.0;
                self.next_time = f64::INFINITY;
            }
        }

        match self.iterations_limit {
            Some(limit) => {
                let baseline = (self.last_iteration + 1) as f64;
                self.iteration_factor = (limit as f64 / baseline).powf(exponent);
                let next = (baseline * self.iteration_factor).round() as u64;
                self.next_iteration = next.max(self.last_iteration + 1);
            }
            None => {
                self.iteration_factor = 1.0;
                self.next_iteration = u64::MAX;
            }
        }
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    pub fn taken(&self) -> usize {
        self.taken
    }

    pub fn time_factor(&self) -> f64 {
        self.time_factor
    }

    pub fn iteration_factor(&self) -> f64 {
        self.iteration_factor
    }

    pub fn next_time(&self) -> f64 {
        self.next_time
    }

    pub fn next_iteration(&self) -> u64 {
        self.next_iteration
    }

    pub fn last_time(&self) -> f64 {
        self.last_time
    }

    pub fn last_iteration(&self) -> u64 {
        self.last_iteration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives a schedule the way the run loop does, with a synthetic clock
    /// advancing `seconds_per_iteration` per iteration. Returns the
    /// (iteration, time) of every capture.
    fn simulate(
        quota: usize,
        criteria: TerminationCriteria,
        start_time: f64,
        seconds_per_iteration: f64,
    ) -> Vec<(u64, f64)> {
        let mut schedule = SnapshotSchedule::new(quota, &criteria);
        let mut captures = Vec::new();
        let mut iteration = 0;
        let mut now = start_time;

        if schedule.takes_initial() {
            captures.push((iteration, now));
            schedule.record(iteration, now);
        }
        while !criteria.are_met(now, iteration) {
            iteration += 1;
            now += seconds_per_iteration;
            if schedule.due(iteration, now).is_some() {
                captures.push((iteration, now));
                schedule.record(iteration, now);
            }
        }
        if schedule.takes_final() {
            captures.push((iteration, now));
            schedule.record(iteration, now);
        }
        assert_eq!(schedule.taken(), captures.len());
        captures
    }

    #[test]
    fn test_zero_quota_takes_nothing() {
        let criteria = TerminationCriteria::new(Some(10.0), Some(100));
        let schedule = SnapshotSchedule::new(0, &criteria);
        assert!(!schedule.takes_initial());
        assert!(!schedule.takes_final());
        assert!(simulate(0, criteria, 0.0, 0.1).is_empty());
    }

    #[test]
    fn test_unit_quota_takes_only_final() {
        let criteria = TerminationCriteria::new(Some(10.0), None);
        let captures = simulate(1, criteria, 0.0, 0.5);
        assert_eq!(captures.len(), 1);
        assert!(captures[0].1 >= 10.0);
    }

    #[test]
    fn test_time_budget_exactness() {
        let criteria = TerminationCriteria::new(Some(10.0), None);
        let captures = simulate(3, criteria, 0.0, 0.25);
        assert_eq!(captures.len(), 3);
        assert_eq!(captures[0], (0, 0.0));
        assert!(captures[2].1 >= 10.0, "last snapshot at {}", captures[2].1);
    }

    #[test]
    fn test_time_budget_geometric_spacing() {
        // Ideally captures land on 1, 2, 4, 8 and the final one at 16 seconds.
        let criteria = TerminationCriteria::new(Some(16.0), None);
        let captures = simulate(5, criteria, 1.0, 0.5);
        assert_eq!(captures.len(), 5);
        assert_eq!(captures[0].1, 1.0);
        assert!(captures[4].1 >= 16.0);

        let gaps: Vec<f64> = captures.windows(2).map(|pair| pair[1].1 - pair[0].1).collect();
        for pair in gaps.windows(2) {
            assert!(pair[1] > pair[0], "gaps should widen: {:?}", gaps);
        }
    }

    #[test]
    fn test_iteration_budget_geometric_spacing() {
        let criteria = TerminationCriteria::new(None, Some(16));
        let captures = simulate(5, criteria, 0.0, 0.0);
        let iterations: Vec<u64> = captures.iter().map(|&(iteration, _)| iteration).collect();
        assert_eq!(iterations, vec![0, 2, 5, 10, 16]);
    }

    #[test]
    fn test_exact_quota_for_many_budgets() {
        for quota in 2..12 {
            for limit in [5_u64, 17, 100, 1000] {
                let criteria = TerminationCriteria::new(None, Some(limit));
                let captures = simulate(quota, criteria, 0.0, 0.0);
                assert!(
                    captures.len() <= quota,
                    "quota {} limit {}: {} captures",
                    quota,
                    limit,
                    captures.len()
                );
                if limit as usize >= quota {
                    assert_eq!(captures.len(), quota, "quota {} limit {}", quota, limit);
                }
                assert_eq!(captures.last().unwrap().0, limit);
            }
        }
    }

    #[test]
    fn test_unbounded_budgets_only_first_and_last() {
        let criteria = TerminationCriteria::default();
        let mut schedule = SnapshotSchedule::new(4, &criteria);
        assert!(schedule.takes_initial());
        schedule.record(0, 0.0);
        assert!(schedule.next_time().is_infinite());
        assert_eq!(schedule.next_iteration(), u64::MAX);
        assert_eq!(schedule.due(1_000_000, 1e9), None);
        assert!(schedule.takes_final());
    }

    #[test]
    fn test_iteration_trigger_wins_over_time() {
        let criteria = TerminationCriteria::new(Some(100.0), Some(100));
        let mut schedule = SnapshotSchedule::new(10, &criteria);
        schedule.record(0, 1.0);
        let next_iteration = schedule.next_iteration();
        let next_time = schedule.next_time();
        assert_eq!(
            schedule.due(next_iteration, next_time),
            Some(SnapshotTrigger::Iteration)
        );
        assert_eq!(schedule.due(0, next_time), Some(SnapshotTrigger::Time));
        assert_eq!(schedule.due(0, 0.0), None);
    }

    #[test]
    fn test_zero_elapsed_baseline_stays_finite() {
        let criteria = TerminationCriteria::new(Some(10.0), None);
        let mut schedule = SnapshotSchedule::new(4, &criteria);
        schedule.record(0, 0.0);
        assert!(schedule.time_factor().is_finite());
        assert!(schedule.next_time().is_finite());
        assert!(schedule.next_time() > 0.0);
    }

    #[test]
    fn test_exhausted_quota_resets_next_points() {
        let criteria = TerminationCriteria::new(Some(10.0), Some(10));
        let mut schedule = SnapshotSchedule::new(2, &criteria);
        assert!(schedule.takes_initial());
        schedule.record(0, 0.5);
        assert_eq!(schedule.next_time(), 0.0);
        assert_eq!(schedule.next_iteration(), 0);
        assert_eq!(schedule.due(5, 5.0), None);
    }
}
