//! Prior densities, change-of-variables corrections and the soft sum-to-zero
//! constraint on the group effects.
//!
//! Every term is a log-density on the optimiser's (unconstrained) scale, so the
//! Jacobian of each constraining transform is folded into the term of the
//! parameter it belongs to.

use crate::density::{beta_lpdf, normal_lpdf};
use crate::model::ConfigError;
use crate::params::ZoibParams;
use crate::scalar::Scalar;
use crate::transforms::{exp_log_jacobian, log1m_inv_logit, log_inv_logit, logit_log_jacobian};
use serde::{Deserialize, Serialize};

/// Hyperparameters of the prior. The defaults are the reference model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    /// Standard deviation of the independent normal prior on each beta.
    pub beta_sd: f64,
    /// Standard deviation of the normal prior on `log_phi`.
    pub log_phi_sd: f64,
    /// Beta shapes for the inflation probability.
    pub zoi_alpha: f64,
    pub zoi_beta: f64,
    /// Beta shapes for the conditional one-probability.
    pub coi_alpha: f64,
    pub coi_beta: f64,
    /// Standard deviation of the normal prior on `log_sd_pid`.
    pub log_sd_pid_sd: f64,
    /// Width of the penalty pinning `sum(pid)` to zero.
    pub sum_to_zero_sd: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            beta_sd: 1.0,
            log_phi_sd: 1.0,
            zoi_alpha: 1.0,
            zoi_beta: 20.0,
            coi_alpha: 0.5,
            coi_beta: 0.5,
            log_sd_pid_sd: 1.0,
            sum_to_zero_sd: 0.001,
        }
    }
}

impl PriorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("priors.beta_sd", self.beta_sd),
            ("priors.log_phi_sd", self.log_phi_sd),
            ("priors.zoi_alpha", self.zoi_alpha),
            ("priors.zoi_beta", self.zoi_beta),
            ("priors.coi_alpha", self.coi_alpha),
            ("priors.coi_beta", self.coi_beta),
            ("priors.log_sd_pid_sd", self.log_sd_pid_sd),
            ("priors.sum_to_zero_sd", self.sum_to_zero_sd),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        Ok(())
    }

    /// All prior and constraint terms at `params`.
    pub fn evaluate<T: Scalar>(&self, params: &ZoibParams<T>) -> PriorTerms<T> {
        let zero = T::zero();
        let beta_sd = T::from_f64(self.beta_sd);
        let betas = params
            .betas
            .iter()
            .map(|&b| normal_lpdf(b, zero, beta_sd))
            .sum();

        let log_phi = normal_lpdf(params.log_phi, zero, T::from_f64(self.log_phi_sd))
            + exp_log_jacobian(params.log_phi);

        let zoi = logit_beta_lpdf(params.logit_zoi, self.zoi_alpha, self.zoi_beta);
        let coi = logit_beta_lpdf(params.logit_coi, self.coi_alpha, self.coi_beta);

        let log_sd_pid = normal_lpdf(params.log_sd_pid, zero, T::from_f64(self.log_sd_pid_sd))
            + exp_log_jacobian(params.log_sd_pid);

        let sd_pid = params.log_sd_pid.exp();
        let pid = params
            .pid
            .iter()
            .map(|&p| normal_lpdf(p, zero, sd_pid))
            .sum();

        let sum_to_zero = sum_to_zero_lpdf(&params.pid, self.sum_to_zero_sd);

        PriorTerms {
            betas,
            log_phi,
            zoi,
            coi,
            log_sd_pid,
            pid,
            sum_to_zero,
        }
    }
}

/// Log prior of a probability carried on the logit scale, including the
/// logistic Jacobian. The probability itself is never formed.
fn logit_beta_lpdf<T: Scalar>(x: T, alpha: f64, beta: f64) -> T {
    beta_lpdf(
        log_inv_logit(x),
        log1m_inv_logit(x),
        T::from_f64(alpha),
        T::from_f64(beta),
    ) + logit_log_jacobian(x)
}

/// `ln N(sum(pid); 0, sd)`. Acts as a soft equality constraint.
pub fn sum_to_zero_lpdf<T: Scalar>(pid: &[T], sd: f64) -> T {
    let total: T = pid.iter().copied().sum();
    normal_lpdf(total, T::zero(), T::from_f64(sd))
}

/// Each prior contribution at one parameter point, on the log scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorTerms<T> {
    pub betas: T,
    pub log_phi: T,
    pub zoi: T,
    pub coi: T,
    pub log_sd_pid: T,
    pub pid: T,
    pub sum_to_zero: T,
}

impl<T: Scalar> PriorTerms<T> {
    pub fn total(&self) -> T {
        self.betas
            + self.log_phi
            + self.zoi
            + self.coi
            + self.log_sd_pid
            + self.pid
            + self.sum_to_zero
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::inv_logit;
    use approx::assert_relative_eq;
    use statrs::distribution::{Beta, Continuous, Normal};

    fn params(pid: Vec<f64>) -> ZoibParams<f64> {
        ZoibParams {
            betas: vec![0.4, -1.1],
            log_phi: 0.7,
            logit_zoi: -2.0,
            logit_coi: 0.3,
            pid,
            log_sd_pid: -0.5,
        }
    }

    #[test]
    fn terms_match_reference_distributions() {
        let p = params(vec![0.2, -0.1, 0.05]);
        let terms = PriorConfig::default().evaluate(&p);
        let std_normal = Normal::new(0.0, 1.0).unwrap();

        let betas = std_normal.ln_pdf(0.4) + std_normal.ln_pdf(-1.1);
        assert_relative_eq!(terms.betas, betas, epsilon = 1e-12);
        assert_relative_eq!(terms.log_phi, std_normal.ln_pdf(0.7) + 0.7, epsilon = 1e-12);

        let zoi = inv_logit(-2.0_f64);
        let zoi_ref = Beta::new(1.0, 20.0).unwrap().ln_pdf(zoi) + zoi.ln() + (1.0 - zoi).ln();
        assert_relative_eq!(terms.zoi, zoi_ref, epsilon = 1e-10);

        let coi = inv_logit(0.3_f64);
        let coi_ref = Beta::new(0.5, 0.5).unwrap().ln_pdf(coi) + coi.ln() + (1.0 - coi).ln();
        assert_relative_eq!(terms.coi, coi_ref, epsilon = 1e-10);

        let sd = (-0.5_f64).exp();
        let pid_normal = Normal::new(0.0, sd).unwrap();
        let pid_ref: f64 = [0.2, -0.1, 0.05].iter().map(|&x| pid_normal.ln_pdf(x)).sum();
        assert_relative_eq!(terms.pid, pid_ref, epsilon = 1e-12);

        let constraint = Normal::new(0.0, 0.001).unwrap().ln_pdf(0.15);
        assert_relative_eq!(terms.sum_to_zero, constraint, max_relative = 1e-10);
    }

    #[test]
    fn sum_to_zero_peaks_at_zero_sum() {
        let centred = sum_to_zero_lpdf(&[0.3, -0.1, -0.2], 0.001);
        let shifted = sum_to_zero_lpdf(&[0.3, -0.1, -0.19], 0.001);
        assert!(centred > shifted);
        // A 0.01 offset costs 50 nats at this width.
        assert_relative_eq!(centred - shifted, 50.0, epsilon = 1e-6);
    }

    #[test]
    fn total_adds_every_term() {
        let terms = PriorConfig::default().evaluate(&params(vec![0.0]));
        let manual = terms.betas
            + terms.log_phi
            + terms.zoi
            + terms.coi
            + terms.log_sd_pid
            + terms.pid
            + terms.sum_to_zero;
        assert_eq!(terms.total(), manual);
    }

    #[test]
    fn validation_rejects_nonpositive_scale() {
        let config = PriorConfig {
            sum_to_zero_sd: 0.0,
            ..PriorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive {
                name: "priors.sum_to_zero_sd",
                ..
            })
        ));
        assert!(PriorConfig::default().validate().is_ok());
    }
}
