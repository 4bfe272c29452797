use crate::consts::{NUMBER_OF_OPTIMIZATION_OBJECTIVES, WEIGHT_SUM_TOLERANCE};
use crate::evolution::archive::Individual;
use crate::evolution::objective::{dominates, OptimizationDirection};
use crate::evolution::EvolutionError;
use crate::instance::Instance;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// A weight allocation over the assets of an instance together with its
/// objective values: expected return, variance, return/volatility ratio and
/// Shannon entropy of the weights (in bits).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub weights: Vec<f64>,
    pub objectives: Vec<f64>,
}

impl Portfolio {
    /// Normalizes a raw key into weights and evaluates them.
    pub fn from_key(instance: &Instance, key: &[f64]) -> Result<Self, EvolutionError> {
        check_key_size(instance, key)?;
        let mut weights = DVector::zeros(key.len());
        normalize_key_into(key, weights.as_mut_slice());
        Ok(Portfolio::evaluated(instance, weights))
    }

    /// Evaluates `weights` as given, without normalizing them.
    pub fn from_weights(instance: &Instance, weights: Vec<f64>) -> Result<Self, EvolutionError> {
        check_key_size(instance, &weights)?;
        Ok(Portfolio::evaluated(instance, DVector::from_vec(weights)))
    }

    fn evaluated(instance: &Instance, weights: DVector<f64>) -> Self {
        let mut product = DVector::zeros(weights.len());
        let mut objectives = vec![0.0; NUMBER_OF_OPTIMIZATION_OBJECTIVES];
        evaluate_into(instance, &weights, &mut product, &mut objectives);
        Portfolio {
            weights: weights.as_slice().to_vec(),
            objectives,
        }
    }

    pub fn is_feasible(&self, instance: &Instance) -> bool {
        if self.objectives.len() != NUMBER_OF_OPTIMIZATION_OBJECTIVES {
            return false;
        }
        if self.weights.len() != instance.num_assets() {
            return false;
        }
        if self.weights.iter().any(|&weight| !(0.0..=1.0).contains(&weight)) {
            return false;
        }
        self.weights.iter().sum::<f64>() <= 1.0 + WEIGHT_SUM_TOLERANCE
    }

    pub fn dominates(&self, other: &Portfolio, senses: &[OptimizationDirection]) -> bool {
        dominates(&self.objectives, &other.objectives, senses)
    }
}

impl From<Portfolio> for Individual {
    fn from(portfolio: Portfolio) -> Self {
        Individual::new(portfolio.objectives, portfolio.weights)
    }
}

fn check_key_size(instance: &Instance, key: &[f64]) -> Result<(), EvolutionError> {
    if key.len() != instance.num_assets() {
        return Err(EvolutionError::KeySizeMismatch {
            expected: instance.num_assets(),
            found: key.len(),
        });
    }
    Ok(())
}

/// Copies `key` into `weights` and scales it to sum to one.
///
/// Keys with a non-positive total are copied unscaled.
pub fn normalize_key_into(key: &[f64], weights: &mut [f64]) {
    weights.copy_from_slice(key);
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        weights.iter_mut().for_each(|weight| *weight /= total);
    }
}

/// Writes the four objective values of `weights` into `objectives`.
///
/// `product` is scratch space for the covariance-weights product and must
/// have one entry per asset.
pub fn evaluate_into(
    instance: &Instance,
    weights: &DVector<f64>,
    product: &mut DVector<f64>,
    objectives: &mut [f64],
) {
    let expected_return = weights.dot(instance.expected_returns());
    product.gemv(1.0, instance.covariance(), weights, 0.0);
    let variance = weights.dot(&*product);
    let entropy: f64 = weights
        .iter()
        .filter(|&&weight| weight > 0.0)
        .map(|&weight| -weight * weight.log2())
        .sum();

    objectives[0] = expected_return;
    objectives[1] = variance;
    objectives[2] = expected_return / variance.sqrt();
    objectives[3] = entropy;
}

/// The `2n + 1` structured starting points engines put into their first
/// population: each asset concentrated at `n / (n + 1)`, each asset left out
/// with the others at `1 / (n + 1)`, and the uniform allocation.
pub fn seed_portfolios(num_assets: usize) -> Vec<Vec<f64>> {
    if num_assets == 0 {
        return vec![];
    }
    let n = num_assets as f64;
    let mut seeds = Vec::with_capacity(2 * num_assets + 1);

    for i in 0..num_assets {
        let mut key = vec![0.0; num_assets];
        key[i] = n / (n + 1.0);
        seeds.push(key);
    }
    for i in 0..num_assets {
        let mut key = vec![1.0 / (n + 1.0); num_assets];
        key[i] = 0.0;
        seeds.push(key);
    }
    seeds.push(vec![1.0 / n; num_assets]);

    seeds
}
