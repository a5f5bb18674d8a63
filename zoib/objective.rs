//! # Negative Log-Posterior of the ZOIB Model
//!
//! [`ZoibObjective`] binds a validated data set to a prior configuration and
//! evaluates, at any parameter point,
//!
//! ```text
//! f(θ) = -[ log p(θ) + Σ_i log ZOIB(y_i | mu_i, phi, zoi, coi) ]
//! ```
//!
//! where `mu = invlogit(X·betas + IID·pid)`. Evaluation is a pure function of
//! its inputs: the running total is a local [`Accumulator`] owned by one call,
//! and nothing is cached between calls.
//!
//! The per-observation sum is split into fixed-size chunks that are reduced on
//! the rayon pool. Partial sums are combined in chunk order, so the result at a
//! given point does not depend on the number of threads or on scheduling.

use crate::data::ZoibData;
use crate::density::zoib_lpdf;
use crate::params::{ParameterLayout, ZoibParams};
use crate::priors::{PriorConfig, PriorTerms};
use crate::scalar::Scalar;
use crate::transforms::inv_logit;
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Observations per parallel work item.
pub const OBSERVATION_CHUNK: usize = 2048;

#[derive(Error, Debug)]
pub enum ObjectiveError {
    #[error("Parameter vector has length {found}, but the model expects {expected}.")]
    ParameterLength { expected: usize, found: usize },
}

/// Running total of one evaluation.
#[derive(Debug, Clone, Copy)]
struct Accumulator<T> {
    total: T,
}

impl<T: Scalar> Accumulator<T> {
    fn new() -> Self {
        Self { total: T::zero() }
    }

    fn subtract(&mut self, term: T) {
        self.total -= term;
    }

    fn finish(self) -> T {
        self.total
    }
}

/// Everything one evaluation produces.
#[derive(Debug, Clone)]
pub struct Evaluation<T> {
    /// The negative log-posterior.
    pub value: T,
    pub log_prior: T,
    /// Zero when the data likelihood is switched off.
    pub log_likelihood: T,
    pub prior_terms: PriorTerms<T>,
    pub mu: Vec<T>,
    pub phi: T,
    pub zoi: T,
    pub coi: T,
}

/// Derived quantities exposed for inspection. They never feed back into
/// optimisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub mu: Vec<f64>,
    pub phi: f64,
    pub zoi: f64,
    pub coi: f64,
    pub betas: Vec<f64>,
    pub pid: Vec<f64>,
}

impl<T: Scalar> Evaluation<T> {
    pub fn report(&self, params: &ZoibParams<T>) -> Report {
        Report {
            mu: self.mu.iter().map(Scalar::value).collect(),
            phi: self.phi.value(),
            zoi: self.zoi.value(),
            coi: self.coi.value(),
            betas: params.betas.iter().map(Scalar::value).collect(),
            pid: params.pid.iter().map(Scalar::value).collect(),
        }
    }
}

/// The model's objective bound to one data set.
#[derive(Debug, Clone, Copy)]
pub struct ZoibObjective<'a> {
    data: &'a ZoibData,
    priors: &'a PriorConfig,
    layout: ParameterLayout,
}

impl<'a> ZoibObjective<'a> {
    pub fn new(data: &'a ZoibData, priors: &'a PriorConfig) -> Self {
        let layout = ParameterLayout::new(data.num_covariates(), data.num_groups());
        Self {
            data,
            priors,
            layout,
        }
    }

    pub fn layout(&self) -> ParameterLayout {
        self.layout
    }

    pub fn data(&self) -> &'a ZoibData {
        self.data
    }

    pub fn priors(&self) -> &'a PriorConfig {
        self.priors
    }

    /// Full evaluation at typed parameters.
    pub fn evaluate<T: Scalar>(&self, params: &ZoibParams<T>) -> Evaluation<T> {
        let mut acc = Accumulator::new();

        let prior_terms = self.priors.evaluate(params);
        let log_prior = prior_terms.total();
        acc.subtract(log_prior);

        let phi = params.log_phi.exp();
        let zoi = inv_logit(params.logit_zoi);
        let coi = inv_logit(params.logit_coi);

        let eta = self.linear_predictor(&params.betas, &params.pid);
        let mu: Vec<T> = eta.into_iter().map(inv_logit).collect();

        let log_likelihood = if self.data.prior_only {
            T::zero()
        } else {
            self.log_likelihood(&mu, phi, zoi, coi)
        };
        acc.subtract(log_likelihood);

        let value = acc.finish();
        log::trace!("objective evaluated: {:.6}", value.value());

        Evaluation {
            value,
            log_prior,
            log_likelihood,
            prior_terms,
            mu,
            phi,
            zoi,
            coi,
        }
    }

    /// Objective value at a flat parameter vector.
    pub fn cost(&self, theta: &Array1<f64>) -> Result<f64, ObjectiveError> {
        Ok(self.evaluate_vector(theta)?.0.value)
    }

    /// Evaluation at a flat parameter vector, returning the unpacked
    /// parameters alongside.
    pub fn evaluate_vector(
        &self,
        theta: &Array1<f64>,
    ) -> Result<(Evaluation<f64>, ZoibParams<f64>), ObjectiveError> {
        self.check_length(theta)?;
        let params = self.layout.unpack(&theta.to_vec());
        Ok((self.evaluate(&params), params))
    }

    pub(crate) fn check_length(&self, theta: &Array1<f64>) -> Result<(), ObjectiveError> {
        if theta.len() != self.layout.len() {
            return Err(ObjectiveError::ParameterLength {
                expected: self.layout.len(),
                found: theta.len(),
            });
        }
        Ok(())
    }

    /// `eta = X·betas + IID·pid`.
    pub fn linear_predictor<T: Scalar>(&self, betas: &[T], pid: &[T]) -> Vec<T> {
        let random = self.data.iid.matrix_vector_multiply(pid);
        self.data
            .x
            .rows()
            .into_iter()
            .zip(random)
            .map(|(row, offset)| {
                row.iter()
                    .zip(betas)
                    .fold(offset, |acc, (&x, &b)| acc + T::from_f64(x) * b)
            })
            .collect()
    }

    /// `Σ_i log ZOIB(y_i | mu_i, phi, zoi, coi)` as a chunked parallel
    /// reduction with a fixed combination order.
    pub fn log_likelihood<T: Scalar>(&self, mu: &[T], phi: T, zoi: T, coi: T) -> T {
        let y = &self.data.y;
        let n = y.len();
        let num_chunks = n.div_ceil(OBSERVATION_CHUNK);
        let partials: Vec<T> = (0..num_chunks)
            .into_par_iter()
            .map(|chunk| {
                let start = chunk * OBSERVATION_CHUNK;
                let end = (start + OBSERVATION_CHUNK).min(n);
                (start..end).fold(T::zero(), |acc, i| acc + zoib_lpdf(y[i], mu[i], phi, zoi, coi))
            })
            .collect();
        partials.into_iter().fold(T::zero(), |acc, part| acc + part)
    }
}
