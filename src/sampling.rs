use crate::instance::{Instance, InstanceError};
use nalgebra::{DMatrix, DVector};
use rand::distributions::Uniform;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::MultivariateNormal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SamplingError {
    #[error("Invalid sampler parameter: {0}")]
    BadParameter(String),
    #[error("Could not build the return distribution: {0}")]
    Distribution(String),
    #[error(transparent)]
    Instance(#[from] InstanceError),
}

/// Shape of a synthetic market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub num_assets: usize,
    /// Common risk factors driving the asset correlations.
    pub num_factors: usize,
    /// Number of return periods drawn before estimating the moments.
    pub periods_to_sample: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        MarketConfig {
            num_assets: 20,
            num_factors: 3,
            periods_to_sample: 250,
        }
    }
}

/// Multivariate normal asset returns whose covariance comes from a linear
/// factor model: `B * B^T + D`, with `D` a diagonal of idiosyncratic
/// variances.
#[derive(Debug, Clone)]
pub struct Sampler {
    mean: Vec<f64>,
    covariance: DMatrix<f64>,
    periods_to_sample: usize,
}

impl Sampler {
    pub fn factor_model(config: &MarketConfig, rng: &mut StdRng) -> Result<Self, SamplingError> {
        if config.num_assets == 0 {
            return Err(SamplingError::BadParameter("num_assets must be positive".into()));
        }
        if config.periods_to_sample < 2 {
            return Err(SamplingError::BadParameter(format!(
                "at least 2 periods are needed to estimate a covariance, got {}",
                config.periods_to_sample
            )));
        }

        let n = config.num_assets;
        let mean_range = Uniform::new(0.0, 0.15);
        let loading_range = Uniform::new(0.0, 0.3);
        let idiosyncratic_range = Uniform::new(0.01, 0.04);

        let mean: Vec<f64> = (0..n).map(|_| rng.sample(mean_range)).collect();
        let loadings = DMatrix::from_fn(n, config.num_factors, |_, _| rng.sample(loading_range));
        let idiosyncratic = DVector::from_fn(n, |_, _| rng.sample(idiosyncratic_range));
        let covariance = &loadings * loadings.transpose() + DMatrix::from_diagonal(&idiosyncratic);

        Ok(Sampler {
            mean,
            covariance,
            periods_to_sample: config.periods_to_sample,
        })
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Draws one row of asset returns per period.
    pub fn sample_returns(&self, rng: &mut StdRng) -> Result<Vec<Vec<f64>>, SamplingError> {
        // statrs wants the covariance flattened row by row
        let flattened: Vec<f64> = self.covariance.transpose().iter().copied().collect();
        let normal_distribution = MultivariateNormal::new(self.mean.clone(), flattened)
            .map_err(|err| SamplingError::Distribution(err.to_string()))?;

        Ok((0..self.periods_to_sample)
            .map(|_| normal_distribution.sample(rng).iter().copied().collect())
            .collect())
    }
}

/// Sample mean and (unbiased) sample covariance of `returns`, one row per
/// period.
pub fn estimate_moments(returns: &[Vec<f64>]) -> Result<(Vec<f64>, DMatrix<f64>), SamplingError> {
    if returns.len() < 2 {
        return Err(SamplingError::BadParameter(format!(
            "at least 2 periods are needed to estimate a covariance, got {}",
            returns.len()
        )));
    }
    let num_assets = returns[0].len();
    if returns.iter().any(|row| row.len() != num_assets) {
        return Err(SamplingError::BadParameter("return rows differ in length".into()));
    }

    let periods = returns.len() as f64;
    let observations = DMatrix::from_row_iterator(
        returns.len(),
        num_assets,
        returns.iter().flat_map(|row| row.iter().copied()),
    );
    let mean = observations.row_mean();
    let mut centered = observations;
    for mut row in centered.row_iter_mut() {
        row -= &mean;
    }
    let covariance = centered.transpose() * &centered / (periods - 1.0);

    Ok((mean.iter().copied().collect(), covariance))
}

/// Builds an instance from returns drawn out of a synthetic factor market.
pub fn synthetic_instance(config: &MarketConfig, rng: &mut StdRng) -> Result<Instance, SamplingError> {
    let sampler = Sampler::factor_model(config, rng)?;
    let returns = sampler.sample_returns(rng)?;
    let (expected_returns, covariance) = estimate_moments(&returns)?;
    let tickers = (0..config.num_assets).map(|i| format!("ASSET{}", i)).collect();
    Ok(Instance::new(tickers, expected_returns, covariance)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_moments() {
        let returns = vec![vec![1.0, 2.0], vec![3.0, 2.0], vec![5.0, 8.0]];
        let (mean, covariance) = estimate_moments(&returns).unwrap();
        assert_eq!(mean, vec![3.0, 4.0]);
        // centered: [-2, -2], [0, -2], [2, 4]
        assert!((covariance[(0, 0)] - 4.0).abs() < 1e-12);
        assert!((covariance[(0, 1)] - 6.0).abs() < 1e-12);
        assert!((covariance[(1, 0)] - 6.0).abs() < 1e-12);
        assert!((covariance[(1, 1)] - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_moments_errors() {
        assert!(estimate_moments(&[vec![1.0]]).is_err());
        assert!(estimate_moments(&[vec![1.0, 2.0], vec![1.0]]).is_err());
    }

    #[test]
    fn test_bad_market_parameters() {
        let mut rng = StdRng::seed_from_u64(0);
        let no_assets = MarketConfig {
            num_assets: 0,
            ..MarketConfig::default()
        };
        assert!(matches!(
            Sampler::factor_model(&no_assets, &mut rng),
            Err(SamplingError::BadParameter(_))
        ));
        let one_period = MarketConfig {
            periods_to_sample: 1,
            ..MarketConfig::default()
        };
        assert!(Sampler::factor_model(&one_period, &mut rng).is_err());
    }

    #[test]
    fn test_factor_model_covariance_includes_idiosyncratic_risk() {
        let mut rng = StdRng::seed_from_u64(8);
        let sampler = Sampler::factor_model(&MarketConfig::default(), &mut rng).unwrap();
        let covariance = sampler.covariance();
        assert_eq!(covariance.nrows(), 20);
        for i in 0..20 {
            assert!(covariance[(i, i)] >= 0.01, "variance of asset {} is {}", i, covariance[(i, i)]);
        }
        assert_eq!(sampler.sample_returns(&mut rng).unwrap().len(), 250);
    }

    #[test]
    fn test_synthetic_instance_shape() {
        let mut rng = StdRng::seed_from_u64(21);
        let config = MarketConfig {
            num_assets: 6,
            num_factors: 2,
            periods_to_sample: 120,
        };
        let instance = synthetic_instance(&config, &mut rng).unwrap();
        assert_eq!(instance.num_assets(), 6);
        assert_eq!(instance.tickers()[5], "ASSET5");

        let covariance = instance.covariance();
        for i in 0..6 {
            assert!(covariance[(i, i)] > 0.0, "variance of asset {} is {}", i, covariance[(i, i)]);
            for j in 0..6 {
                assert!((covariance[(i, j)] - covariance[(j, i)]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_synthetic_instance_is_reproducible() {
        let config = MarketConfig::default();
        let first = synthetic_instance(&config, &mut StdRng::seed_from_u64(4)).unwrap();
        let second = synthetic_instance(&config, &mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(first.expected_returns(), second.expected_returns());
        assert_eq!(first.covariance(), second.covariance());
    }
}
