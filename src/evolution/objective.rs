use crate::consts::{FLOAT_COMPARISON_EPSILON, NUMBER_OF_OPTIMIZATION_OBJECTIVES};
use crate::evolution::EvolutionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Direction in which a single objective component improves.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum OptimizationDirection {
    Maximize,
    Minimize,
}

impl fmt::Display for OptimizationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationDirection::Maximize => write!(f, "MAXIMIZE"),
            OptimizationDirection::Minimize => write!(f, "MINIMIZE"),
        }
    }
}

/// The per-component directions of an objective vector, fixed for a whole run.
///
/// Always holds exactly [`NUMBER_OF_OPTIMIZATION_OBJECTIVES`] entries.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(try_from = "Vec<OptimizationDirection>")]
pub struct Senses(Vec<OptimizationDirection>);

impl Senses {
    pub fn new(directions: Vec<OptimizationDirection>) -> Result<Self, EvolutionError> {
        if directions.len() != NUMBER_OF_OPTIMIZATION_OBJECTIVES {
            return Err(EvolutionError::InvalidSenses {
                expected: NUMBER_OF_OPTIMIZATION_OBJECTIVES,
                found: directions.len(),
            });
        }
        Ok(Senses(directions))
    }

    /// Return and ratio are maximized, variance and concentration are minimized.
    pub fn portfolio() -> Self {
        use OptimizationDirection::*;
        Senses(vec![Maximize, Minimize, Maximize, Minimize])
    }
}

impl TryFrom<Vec<OptimizationDirection>> for Senses {
    type Error = EvolutionError;

    fn try_from(directions: Vec<OptimizationDirection>) -> Result<Self, Self::Error> {
        Senses::new(directions)
    }
}

impl Deref for Senses {
    type Target = [OptimizationDirection];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Epsilon-tolerant Pareto dominance.
///
/// `a` dominates `b` when it is at least as good in every component and
/// strictly better in at least one. Components closer than machine epsilon
/// count as ties, so near-identical vectors dominate neither one another.
/// Returns `false` when the lengths of `a`, `b` and `senses` disagree.
pub fn dominates(a: &[f64], b: &[f64], senses: &[OptimizationDirection]) -> bool {
    if a.len() != b.len() || a.len() != senses.len() {
        return false;
    }

    let mut strictly_better = false;
    for ((&value_a, &value_b), direction) in a.iter().zip(b.iter()).zip(senses.iter()) {
        let (worse, better) = match direction {
            OptimizationDirection::Minimize => (
                value_a > value_b + FLOAT_COMPARISON_EPSILON,
                value_a < value_b - FLOAT_COMPARISON_EPSILON,
            ),
            OptimizationDirection::Maximize => (
                value_a < value_b - FLOAT_COMPARISON_EPSILON,
                value_a > value_b + FLOAT_COMPARISON_EPSILON,
            ),
        };
        if worse {
            return false;
        }
        strictly_better |= better;
    }
    strictly_better
}

/// Component-wise equality within machine epsilon.
pub fn objectives_match(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).abs() < FLOAT_COMPARISON_EPSILON)
}
