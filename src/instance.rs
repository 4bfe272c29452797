use crate::evolution::objective::Senses;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum InstanceError {
    #[error("An instance needs at least one asset.")]
    Empty,
    #[error("Expected {expected} {what}, found {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Covariance matrix must be square, got {rows}x{cols}.")]
    NonSquareCovariance { rows: usize, cols: usize },
    #[error("Non-finite value in {0}.")]
    NonFinite(&'static str),
}

/// A portfolio selection problem: per-asset expected returns and their
/// covariance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    tickers: Vec<String>,
    expected_returns: DVector<f64>,
    covariance: DMatrix<f64>,
    senses: Senses,
}

impl Instance {
    pub fn new(
        tickers: Vec<String>,
        expected_returns: Vec<f64>,
        covariance: DMatrix<f64>,
    ) -> Result<Self, InstanceError> {
        let num_assets = tickers.len();
        if num_assets == 0 {
            return Err(InstanceError::Empty);
        }
        if expected_returns.len() != num_assets {
            return Err(InstanceError::DimensionMismatch {
                what: "expected returns",
                expected: num_assets,
                found: expected_returns.len(),
            });
        }
        if !covariance.is_square() {
            return Err(InstanceError::NonSquareCovariance {
                rows: covariance.nrows(),
                cols: covariance.ncols(),
            });
        }
        if covariance.nrows() != num_assets {
            return Err(InstanceError::DimensionMismatch {
                what: "covariance rows",
                expected: num_assets,
                found: covariance.nrows(),
            });
        }
        if expected_returns.iter().any(|value| !value.is_finite()) {
            return Err(InstanceError::NonFinite("expected returns"));
        }
        if covariance.iter().any(|value| !value.is_finite()) {
            return Err(InstanceError::NonFinite("covariance matrix"));
        }

        Ok(Instance {
            tickers,
            expected_returns: DVector::from_vec(expected_returns),
            covariance,
            senses: Senses::portfolio(),
        })
    }

    /// Builds an instance from a row-major covariance given as nested rows.
    pub fn from_rows(
        tickers: Vec<String>,
        expected_returns: Vec<f64>,
        covariance_rows: &[Vec<f64>],
    ) -> Result<Self, InstanceError> {
        let rows = covariance_rows.len();
        let cols = covariance_rows.first().map_or(0, Vec::len);
        if covariance_rows.iter().any(|row| row.len() != cols) {
            return Err(InstanceError::NonSquareCovariance { rows, cols });
        }
        let covariance = DMatrix::from_row_iterator(
            rows,
            cols,
            covariance_rows.iter().flat_map(|row| row.iter().copied()),
        );
        Instance::new(tickers, expected_returns, covariance)
    }

    pub fn num_assets(&self) -> usize {
        self.tickers.len()
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn expected_returns(&self) -> &DVector<f64> {
        &self.expected_returns
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn senses(&self) -> &Senses {
        &self.senses
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of assets: {}", self.num_assets())?;
        writeln!(f, "Expected returns:")?;
        for (ticker, expected_return) in self.tickers.iter().zip(self.expected_returns.iter()) {
            writeln!(f, "{}: {}", ticker, expected_return)?;
        }
        writeln!(f, "Covariance matrix:")?;
        for row in self.covariance.row_iter() {
            let line = itertools::join(row.iter(), " ");
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}
