//! # Model Estimation
//!
//! Two fitting strategies drive the same objective:
//!
//! 1.  **MAP:** BFGS over the full parameter vector (fixed effects, `phi`,
//!     `zoi`, `coi`, the group effects and their scale) using the exact
//!     forward-mode gradient.
//!
//! 2.  **Laplace:** BFGS over the fixed-effect vector only. For each trial
//!     point the group effects are integrated out by the Laplace
//!     approximation (see [`crate::laplace`]); the outer gradient is taken by
//!     central differences of the marginal. The reported group effects are
//!     their conditional mode at the optimum.
//!
//! A trial point where the objective is not finite is handed back to the
//! optimiser as a large finite cost so that its line search backs off. The
//! objective itself never hides such values.

use wolfe_bfgs::{Bfgs, BfgsSolution};

use crate::data::ZoibData;
use crate::gradient::{central_difference_gradient, value_and_gradient};
use crate::laplace::{LaplaceError, LaplaceState};
use crate::model::{ConfigError, FitConfig, ModelConfig};
use crate::objective::{ObjectiveError, Report, ZoibObjective};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use thiserror::Error;

/// Cost handed to the optimiser in place of a non-finite value.
const REJECTED_COST: f64 = 1e10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMethod {
    /// Joint maximum a posteriori over every parameter.
    #[default]
    Map,
    /// Maximum of the Laplace-approximate marginal posterior of the fixed
    /// effects.
    Laplace,
}

impl std::fmt::Display for FitMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitMethod::Map => write!(f, "map"),
            FitMethod::Laplace => write!(f, "laplace"),
        }
    }
}

/// A comprehensive error type for the model estimation process.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Objective(#[from] ObjectiveError),

    #[error("Laplace approximation failed: {0}")]
    Laplace(#[from] LaplaceError),

    #[error("Initial cost is not finite: {0}. Cannot start BFGS optimization.")]
    NonFiniteInitialCost(f64),

    #[error("BFGS optimization failed: {0}")]
    OptimizationFailed(String),
}

/// Outcome of a fit on the optimiser's scale.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub method: FitMethod,
    /// Full parameter vector at the optimum.
    pub theta: Array1<f64>,
    pub report: Report,
    /// The minimised objective.
    pub objective: f64,
    pub log_prior: f64,
    pub log_likelihood: f64,
    pub iterations: usize,
    /// False when the optimiser stopped early at an acceptable point.
    pub converged: bool,
}

/// The main entry point for model fitting.
pub fn fit_model(data: &ZoibData, config: &ModelConfig) -> Result<FitResult, EstimationError> {
    config.validate()?;
    let objective = ZoibObjective::new(data, &config.priors);
    let layout = objective.layout();
    log::info!(
        "Starting {} fit: {} observations, {} covariates, {} groups.",
        config.fit.method,
        data.num_observations(),
        layout.num_betas,
        layout.num_groups
    );
    if data.prior_only {
        log::info!("Data likelihood is disabled; fitting the prior alone.");
    }

    let initial = config.initial.to_vector(layout);
    let (theta, objective_value, optimum) = match config.fit.method {
        FitMethod::Map => {
            let initial_cost = objective.cost(&initial)?;
            ensure_finite(initial_cost)?;
            log::info!("Initial cost: {:.6}", initial_cost);

            let optimum = minimise(initial, &config.fit, |theta| {
                value_and_gradient(&objective, theta).map_err(|e| e.to_string())
            })?;
            (optimum.point.clone(), optimum.value, optimum)
        }
        FitMethod::Laplace => {
            let laplace = LaplaceState::new(objective, config.fit.newton_settings());
            let (fixed, _) = layout.split_fixed(&initial);
            let initial_cost = laplace.marginal(&fixed)?.marginal;
            ensure_finite(initial_cost)?;
            log::info!("Initial Laplace marginal: {:.6}", initial_cost);

            let marginal = |psi: &Array1<f64>| -> Result<f64, LaplaceError> {
                Ok(laplace.marginal(psi)?.marginal)
            };
            let optimum = minimise(fixed, &config.fit, |psi| {
                let value = marginal(psi).map_err(|e| e.to_string())?;
                let grad = central_difference_gradient(marginal, psi).map_err(|e| e.to_string())?;
                Ok((value, grad))
            })?;
            let at_optimum = laplace.marginal(&optimum.point)?;
            let theta = layout.join_fixed(&optimum.point, &at_optimum.mode);
            (theta, at_optimum.marginal, optimum)
        }
    };

    let (evaluation, params) = objective.evaluate_vector(&theta)?;
    log::info!(
        "Fit finished after {} iterations with objective {:.6}.",
        optimum.iterations,
        objective_value
    );

    Ok(FitResult {
        method: config.fit.method,
        report: evaluation.report(&params),
        theta,
        objective: objective_value,
        log_prior: evaluation.log_prior,
        log_likelihood: evaluation.log_likelihood,
        iterations: optimum.iterations,
        converged: optimum.converged,
    })
}

fn ensure_finite(cost: f64) -> Result<(), EstimationError> {
    if cost.is_finite() {
        Ok(())
    } else {
        Err(EstimationError::NonFiniteInitialCost(cost))
    }
}

#[derive(Debug, Clone)]
struct Optimum {
    point: Array1<f64>,
    value: f64,
    iterations: usize,
    converged: bool,
}

#[derive(Debug, Clone)]
struct BestPoint {
    point: Array1<f64>,
    value: f64,
    gradient_norm: f64,
}

/// Runs BFGS on `cost_and_grad`, substituting [`REJECTED_COST`] for failed or
/// non-finite evaluations.
///
/// When the optimiser gives up (typically a line search that cannot make
/// progress in the last few digits), the best point it visited is accepted if
/// its gradient norm is within `fit.stall_tolerance` relative to the cost.
fn minimise<F>(
    initial: Array1<f64>,
    fit: &FitConfig,
    cost_and_grad: F,
) -> Result<Optimum, EstimationError>
where
    F: Fn(&Array1<f64>) -> Result<(f64, Array1<f64>), String>,
{
    let n = initial.len();
    let best: RefCell<Option<BestPoint>> = RefCell::new(None);
    let evaluations = Cell::new(0_usize);

    let guarded = |x: &Array1<f64>| -> (f64, Array1<f64>) {
        evaluations.set(evaluations.get() + 1);
        match cost_and_grad(x) {
            Ok((cost, grad)) if cost.is_finite() && grad.iter().all(|g| g.is_finite()) => {
                let gradient_norm = grad.dot(&grad).sqrt();
                log::debug!("cost {:.8}, gradient norm {:.3e}", cost, gradient_norm);
                let mut best = best.borrow_mut();
                if best.as_ref().is_none_or(|b| cost < b.value) {
                    *best = Some(BestPoint {
                        point: x.clone(),
                        value: cost,
                        gradient_norm,
                    });
                }
                (cost, grad)
            }
            Ok((cost, _)) => {
                log::warn!("Non-finite cost encountered: {}, returning large finite value", cost);
                (REJECTED_COST, Array1::zeros(n))
            }
            Err(e) => {
                log::warn!("Cost computation failed: {}, returning large finite value", e);
                (REJECTED_COST, Array1::zeros(n))
            }
        }
    };

    log::info!("Starting BFGS optimization with {} parameters...", n);
    let outcome = Bfgs::new(initial, guarded)
        .with_tolerance(fit.tolerance)
        .with_max_iterations(fit.max_iterations)
        .run();

    match outcome {
        Ok(BfgsSolution {
            final_point,
            final_value,
            iterations,
            ..
        }) => Ok(Optimum {
            point: final_point,
            value: final_value,
            iterations,
            converged: true,
        }),
        Err(e) => {
            let best = best.into_inner().ok_or_else(|| {
                EstimationError::OptimizationFailed(format!("{e:?}; no finite point was visited"))
            })?;
            if best.gradient_norm <= fit.stall_tolerance * (1.0 + best.value.abs()) {
                log::warn!(
                    "BFGS stopped early ({:?}); accepting the best point (cost {:.6}, gradient norm {:.3e}).",
                    e,
                    best.value,
                    best.gradient_norm
                );
                Ok(Optimum {
                    point: best.point,
                    value: best.value,
                    iterations: evaluations.get(),
                    converged: false,
                })
            } else {
                Err(EstimationError::OptimizationFailed(format!(
                    "{e:?}; best gradient norm {:.3e}",
                    best.gradient_norm
                )))
            }
        }
    }
}
