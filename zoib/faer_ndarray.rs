//! Cholesky factorisation of small symmetric `ndarray` matrices through faer.
//!
//! The Laplace step only ever factors the `G × G` group-effect Hessian, so the
//! matrix is copied into faer storage rather than viewed in place.

use faer::linalg::solvers::{self, Solve};
use faer::{Mat, Side};
use ndarray::{Array1, Array2};
use thiserror::Error;

/// Attempts made by [`SymmetricFactor::with_ridge`] after the plain factorisation fails.
const RIDGE_ATTEMPTS: usize = 12;

#[derive(Debug, Error)]
pub enum FactorError {
    #[error("Cholesky factorization failed: {0:?}")]
    NotPositiveDefinite(solvers::LltError),
    #[error("Matrix is still indefinite after adding a ridge of {ridge:.3e} to its diagonal.")]
    RidgeExhausted { ridge: f64 },
}

fn to_faer(matrix: &Array2<f64>) -> Mat<f64> {
    let (rows, cols) = matrix.dim();
    Mat::from_fn(rows, cols, |i, j| matrix[(i, j)])
}

/// `A + λI = L Lᵀ`, with `λ` zero unless a ridge was needed.
pub struct SymmetricFactor {
    llt: solvers::Llt<f64>,
    ridge: f64,
}

impl SymmetricFactor {
    pub fn new(matrix: &Array2<f64>) -> Result<Self, FactorError> {
        let llt = to_faer(matrix)
            .as_ref()
            .llt(Side::Lower)
            .map_err(FactorError::NotPositiveDefinite)?;
        Ok(Self { llt, ridge: 0.0 })
    }

    /// Factors `matrix`, adding a ridge that starts at `1e-8` times the
    /// largest diagonal magnitude and grows tenfold per failure.
    pub fn with_ridge(matrix: &Array2<f64>) -> Result<Self, FactorError> {
        if let Ok(factor) = Self::new(matrix) {
            return Ok(factor);
        }
        let scale = matrix
            .diag()
            .iter()
            .fold(0.0_f64, |m, v| m.max(v.abs()))
            .max(1.0);
        let mut ridge = 1e-8 * scale;
        for _ in 0..RIDGE_ATTEMPTS {
            log::warn!("Hessian not positive definite; retrying with ridge {ridge:.3e}");
            let mut ridged = matrix.clone();
            ridged.diag_mut().mapv_inplace(|v| v + ridge);
            if let Ok(mut factor) = Self::new(&ridged) {
                factor.ridge = ridge;
                return Ok(factor);
            }
            ridge *= 10.0;
        }
        Err(FactorError::RidgeExhausted { ridge: ridge / 10.0 })
    }

    pub fn ridge(&self) -> f64 {
        self.ridge
    }

    pub fn solve(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let column = Mat::from_fn(rhs.len(), 1, |i, _| rhs[i]);
        let solution = self.llt.solve(column.as_ref());
        Array1::from_shape_fn(rhs.len(), |i| solution[(i, 0)])
    }

    /// `log |A + λI| = 2 Σ log L_ii`.
    pub fn log_determinant(&self) -> f64 {
        let l = self.llt.L();
        2.0 * (0..l.nrows()).map(|i| l[(i, i)].ln()).sum::<f64>()
    }
}
