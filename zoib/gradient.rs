//! Gradients of the objective.
//!
//! The exact gradient comes from forward-mode AD: the generic objective is
//! evaluated once per coordinate with that coordinate seeded. Coordinates are
//! independent, so they run in parallel. A central-difference routine is kept
//! for objectives that are not written against [`Scalar`](crate::scalar::Scalar)
//! (the Laplace marginal) and for checking the AD path.

use crate::objective::{ObjectiveError, ZoibObjective};
use ndarray::Array1;
use rayon::prelude::*;

/// Objective value and its exact gradient at `theta`.
pub fn value_and_gradient(
    objective: &ZoibObjective<'_>,
    theta: &Array1<f64>,
) -> Result<(f64, Array1<f64>), ObjectiveError> {
    objective.check_length(theta)?;
    let layout = objective.layout();
    let value = objective.cost(theta)?;
    let grad: Vec<f64> = (0..theta.len())
        .into_par_iter()
        .map(|k| {
            let params = layout.unpack_seeded(theta, k);
            objective.evaluate(&params).value.dot
        })
        .collect();
    Ok((value, Array1::from_vec(grad)))
}

pub fn gradient(
    objective: &ZoibObjective<'_>,
    theta: &Array1<f64>,
) -> Result<Array1<f64>, ObjectiveError> {
    value_and_gradient(objective, theta).map(|(_, grad)| grad)
}

/// Step used by [`central_difference_gradient`] for a coordinate at `x`.
#[inline]
pub fn difference_step(x: f64) -> f64 {
    (1e-4 * (1.0 + x.abs())).max(1e-5)
}

/// Central finite-difference gradient of `f` at `x`.
pub fn central_difference_gradient<E, F>(mut f: F, x: &Array1<f64>) -> Result<Array1<f64>, E>
where
    F: FnMut(&Array1<f64>) -> Result<f64, E>,
{
    let mut grad = Array1::zeros(x.len());
    for k in 0..x.len() {
        let h = difference_step(x[k]);
        let mut plus = x.clone();
        plus[k] += h;
        let mut minus = x.clone();
        minus[k] -= h;
        grad[k] = (f(&plus)? - f(&minus)?) / (2.0 * h);
    }
    Ok(grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ZoibData;
    use crate::matrix::DesignMatrix;
    use crate::priors::PriorConfig;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn small_data() -> ZoibData {
        let x = array![[1.0, 0.3], [1.0, -1.2], [1.0, 0.8], [1.0, 0.1], [1.0, -0.4]];
        ZoibData::new(
            array![0.0, 0.35, 1.0, 0.62, 0.9],
            x,
            DesignMatrix::incidence(&[0, 1, 1, 0, 1], 2).unwrap(),
            false,
        )
        .unwrap()
    }

    #[test]
    fn ad_gradient_matches_finite_difference() {
        let data = small_data();
        let priors = PriorConfig::default();
        let objective = ZoibObjective::new(&data, &priors);
        let theta = array![0.2, -0.4, 0.5, -1.5, 0.2, 0.03, -0.01, -0.7];

        let (value, grad) = value_and_gradient(&objective, &theta).unwrap();
        assert_eq!(value, objective.cost(&theta).unwrap());

        let fd = central_difference_gradient(|t| objective.cost(t), &theta).unwrap();
        for k in 0..theta.len() {
            let rel_error = (grad[k] - fd[k]).abs() / grad[k].abs().max(1.0);
            assert!(
                rel_error < 1e-5,
                "Gradient mismatch at index {}: ad={}, fd={}, rel_error={}",
                k,
                grad[k],
                fd[k],
                rel_error
            );
        }
    }

    #[test]
    fn gradient_rejects_wrong_length() {
        let data = small_data();
        let priors = PriorConfig::default();
        let objective = ZoibObjective::new(&data, &priors);
        assert!(gradient(&objective, &Array1::zeros(2)).is_err());
    }

    #[test]
    fn difference_step_scales_with_magnitude() {
        assert_relative_eq!(difference_step(0.0), 1e-4);
        assert_relative_eq!(difference_step(99.0), 1e-2, epsilon = 1e-15);
        assert_relative_eq!(difference_step(-99.0), 1e-2, epsilon = 1e-15);
    }
}
