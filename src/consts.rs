/// Return, variance, return/volatility ratio and entropy.
pub const NUMBER_OF_OPTIMIZATION_OBJECTIVES: usize = 4;

/// Tolerance used by every dominance and equality test on objective values.
pub const FLOAT_COMPARISON_EPSILON: f64 = f64::EPSILON;

/// Smallest elapsed time (in seconds) used as a snapshot scheduling baseline.
pub const MIN_SNAPSHOT_TIME_BASELINE: f64 = 1e-6;

/// Feasible portfolios may overshoot a total weight of one by this much.
pub const WEIGHT_SUM_TOLERANCE: f64 = f32::EPSILON as f64;
