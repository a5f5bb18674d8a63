//! # Laplace Marginalisation of the Group Effects
//!
//! For a fixed-effect vector `ψ` (every parameter except `pid`) the group
//! effects are integrated out by a Gaussian approximation around their
//! conditional mode:
//!
//! ```text
//! L(ψ) = f(ψ, pid*) + ½ log|H| − (G/2) log 2π
//! ```
//!
//! where `f` is the joint negative log-posterior, `pid*` minimises it for the
//! given `ψ`, and `H` is its Hessian in `pid` at `pid*`. `H` has the structure
//!
//! ```text
//! H = IIDᵀ diag(w) IID + I / sd² + 11ᵀ / σ_c²
//! ```
//!
//! with `w_i` the curvature of `−log p(y_i | eta_i)` in the linear predictor,
//! `sd = exp(log_sd_pid)` and `σ_c` the width of the sum-to-zero penalty.
//!
//! The conditional mode is found by Newton's method with step halving. The last
//! mode is kept and used as the next starting point, which makes the nearby
//! evaluations of a finite-difference gradient cheap.

use crate::density::zoib_lpdf;
use crate::dual::Dual;
use crate::faer_ndarray::{FactorError, SymmetricFactor};
use crate::gradient::difference_step;
use crate::objective::{ObjectiveError, ZoibObjective};
use crate::params::{ParameterLayout, ZoibParams};
use crate::transforms::inv_logit;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use std::cell::RefCell;
use std::f64::consts::PI;
use thiserror::Error;

/// Controls of the inner Newton iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonSettings {
    pub max_iterations: usize,
    /// Convergence threshold on the largest absolute Newton step.
    pub tolerance: f64,
    pub max_step_halvings: usize,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-9,
            max_step_halvings: 30,
        }
    }
}

#[derive(Error, Debug)]
pub enum LaplaceError {
    #[error(
        "The inner Newton iteration did not converge within {max_iterations} iterations. Last step size was {last_step:.3e}."
    )]
    InnerDidNotConverge {
        max_iterations: usize,
        last_step: f64,
    },
    #[error("No step along the Newton direction decreased the objective (gradient norm {gradient_norm:.3e}).")]
    LineSearchFailed { gradient_norm: f64 },
    #[error("The Hessian of the group effects is not positive definite at the mode: {0}")]
    HessianNotPositiveDefinite(FactorError),
    #[error("The objective is not finite at the conditional mode: {0}")]
    NonFiniteObjective(f64),
    #[error("Fixed-effect vector has length {found}, but the model expects {expected}.")]
    FixedLength { expected: usize, found: usize },
    #[error(transparent)]
    Objective(#[from] ObjectiveError),
}

/// Result of one marginalisation.
#[derive(Debug, Clone)]
pub struct LaplaceResult {
    /// `L(ψ)`.
    pub marginal: f64,
    /// `pid*`.
    pub mode: Array1<f64>,
    /// `f(ψ, pid*)`.
    pub joint: f64,
    pub log_det_hessian: f64,
    pub iterations: usize,
}

/// Laplace approximation bound to one objective, holding the last
/// conditional mode for warm starts.
pub struct LaplaceState<'a> {
    objective: ZoibObjective<'a>,
    settings: NewtonSettings,
    warm_start: RefCell<Option<Array1<f64>>>,
}

impl<'a> LaplaceState<'a> {
    pub fn new(objective: ZoibObjective<'a>, settings: NewtonSettings) -> Self {
        Self {
            objective,
            settings,
            warm_start: RefCell::new(None),
        }
    }

    pub fn layout(&self) -> ParameterLayout {
        self.objective.layout()
    }

    /// `L(ψ)` and the quantities it was built from.
    pub fn marginal(&self, fixed: &Array1<f64>) -> Result<LaplaceResult, LaplaceError> {
        let layout = self.layout();
        let (mode, iterations) = self.conditional_mode(fixed)?;
        let joint = self.objective.cost(&layout.join_fixed(fixed, &mode))?;
        if !joint.is_finite() {
            return Err(LaplaceError::NonFiniteObjective(joint));
        }

        let (_, hessian) = self.local_derivatives(fixed, &mode);
        let log_det_hessian = SymmetricFactor::new(&hessian)
            .map_err(LaplaceError::HessianNotPositiveDefinite)?
            .log_determinant();

        let g = layout.num_groups as f64;
        let marginal = joint + 0.5 * log_det_hessian - 0.5 * g * (2.0 * PI).ln();
        log::debug!(
            "Laplace marginal {:.6} (joint {:.6}, log|H| {:.4}, {} Newton steps)",
            marginal,
            joint,
            log_det_hessian,
            iterations
        );

        Ok(LaplaceResult {
            marginal,
            mode,
            joint,
            log_det_hessian,
            iterations,
        })
    }

    /// Minimises the joint objective over `pid` with `ψ` held fixed.
    pub fn conditional_mode(
        &self,
        fixed: &Array1<f64>,
    ) -> Result<(Array1<f64>, usize), LaplaceError> {
        let layout = self.layout();
        if fixed.len() != layout.fixed_len() {
            return Err(LaplaceError::FixedLength {
                expected: layout.fixed_len(),
                found: fixed.len(),
            });
        }

        let mut pid = self
            .warm_start
            .borrow()
            .clone()
            .filter(|p| p.len() == layout.num_groups && p.iter().all(|v| v.is_finite()))
            .unwrap_or_else(|| Array1::zeros(layout.num_groups));
        let mut value = self.objective.cost(&layout.join_fixed(fixed, &pid))?;
        let mut last_step = f64::INFINITY;

        for iter in 1..=self.settings.max_iterations {
            let (grad, hessian) = self.local_derivatives(fixed, &pid);
            let gradient_norm = grad.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            let step = SymmetricFactor::with_ridge(&hessian)
                .map_err(LaplaceError::HessianNotPositiveDefinite)?
                .solve(&grad);
            let step_norm = step.iter().fold(0.0_f64, |m, s| m.max(s.abs()));

            // Near the mode the decrease drops below the rounding error of
            // the objective itself.
            let slack = 8.0 * f64::EPSILON * (1.0 + value.abs());
            let mut scale = 1.0;
            let mut accepted = None;
            for _ in 0..=self.settings.max_step_halvings {
                let candidate = &pid - &(&step * scale);
                let candidate_value = self.objective.cost(&layout.join_fixed(fixed, &candidate))?;
                if candidate_value.is_finite() && candidate_value <= value + slack {
                    accepted = Some((candidate, candidate_value));
                    break;
                }
                scale *= 0.5;
            }

            let Some((candidate, candidate_value)) = accepted else {
                if step_norm <= self.settings.tolerance {
                    self.remember(&pid);
                    return Ok((pid, iter));
                }
                return Err(LaplaceError::LineSearchFailed { gradient_norm });
            };

            last_step = step_norm * scale;
            pid = candidate;
            value = candidate_value;
            log::trace!(
                "Newton step {}: objective {:.8}, step {:.3e}, scale {}",
                iter,
                value,
                last_step,
                scale
            );

            if step_norm <= self.settings.tolerance {
                self.remember(&pid);
                return Ok((pid, iter));
            }
        }

        Err(LaplaceError::InnerDidNotConverge {
            max_iterations: self.settings.max_iterations,
            last_step,
        })
    }

    fn remember(&self, pid: &Array1<f64>) {
        *self.warm_start.borrow_mut() = Some(pid.clone());
    }

    /// Gradient and Hessian of the joint objective in `pid`.
    pub fn local_derivatives(
        &self,
        fixed: &Array1<f64>,
        pid: &Array1<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let layout = self.layout();
        let theta = layout.join_fixed(fixed, pid);
        let params: ZoibParams<f64> = layout.unpack(&theta.to_vec());
        let data = self.objective.data();
        let g = layout.num_groups;

        let sd = params.log_sd_pid.exp();
        let constraint_var = self.objective.priors().sum_to_zero_sd.powi(2);
        let total: f64 = pid.sum();

        let mut grad = pid.mapv(|p| p / (sd * sd) + total / constraint_var);
        let mut hessian = Array2::from_elem((g, g), 1.0 / constraint_var);
        for k in 0..g {
            hessian[[k, k]] += 1.0 / (sd * sd);
        }

        if !data.prior_only {
            let eta = self.objective.linear_predictor(&params.betas, &params.pid);
            let phi = params.log_phi.exp();
            let zoi = inv_logit(params.logit_zoi);
            let coi = inv_logit(params.logit_coi);
            let (d1, w): (Vec<f64>, Vec<f64>) = (0..eta.len())
                .into_par_iter()
                .map(|i| observation_derivatives(data.y[i], eta[i], phi, zoi, coi))
                .unzip();
            let d1 = Array1::from_vec(d1);
            let w = Array1::from_vec(w);
            grad += &data.iid.transpose_vector_multiply(&d1);
            hessian += &data.iid.weighted_gram(&w);
        }

        (grad, hessian)
    }
}

/// First and second derivative of `−log p(y | eta)` in `eta`.
fn observation_derivatives(y: f64, eta: f64, phi: f64, zoi: f64, coi: f64) -> (f64, f64) {
    let slope = |at: f64| {
        let lp = zoib_lpdf(
            y,
            inv_logit(Dual::var(at)),
            Dual::constant(phi),
            Dual::constant(zoi),
            Dual::constant(coi),
        );
        -lp.dot
    };
    let h = difference_step(eta) * 0.1;
    let curvature = (slope(eta + h) - slope(eta - h)) / (2.0 * h);
    (slope(eta), curvature)
}
