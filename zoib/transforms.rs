//! Constraining transforms and their change-of-variables corrections.
//!
//! The optimiser works on an unconstrained vector. Positive quantities enter
//! through `exp`, probabilities through the logistic function. When a prior is
//! placed on the constrained value the log-Jacobian of the transform has to be
//! added so the density is expressed on the scale the optimiser moves on.

use crate::scalar::Scalar;

/// Logistic function ℝ → (0, 1).
///
/// Evaluated on the branch that never exponentiates a large positive number.
/// Saturates to exactly 0 or 1 for `|x|` beyond roughly 745 and 37
/// respectively; callers see the saturated value.
#[inline]
pub fn inv_logit<T: Scalar>(x: T) -> T {
    if x.value() >= 0.0 {
        T::one() / (T::one() + (-x).exp())
    } else {
        let e = x.exp();
        e / (T::one() + e)
    }
}

/// `ln(invlogit(x))`, finite for every finite `x`.
#[inline]
pub fn log_inv_logit<T: Scalar>(x: T) -> T {
    if x.value() >= 0.0 {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

/// `ln(1 - invlogit(x))`.
#[inline]
pub fn log1m_inv_logit<T: Scalar>(x: T) -> T {
    log_inv_logit(-x)
}

/// `ln |d invlogit(x) / dx| = ln p + ln(1 - p)`.
#[inline]
pub fn logit_log_jacobian<T: Scalar>(x: T) -> T {
    log_inv_logit(x) + log1m_inv_logit(x)
}

/// `ln |d exp(x) / dx| = x`.
#[inline]
pub fn exp_log_jacobian<T: Scalar>(x: T) -> T {
    x
}

/// Log-odds of a probability, used to place natural-scale starting values
/// onto the optimiser's scale.
#[inline]
pub fn logit(p: f64) -> f64 {
    p.ln() - (-p).ln_1p()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dual::Dual;
    use approx::assert_relative_eq;

    #[test]
    fn inv_logit_is_bounded_and_symmetric() {
        assert_eq!(inv_logit(0.0_f64), 0.5);
        let x = 3.7_f64;
        assert_relative_eq!(inv_logit(x) + inv_logit(-x), 1.0, epsilon = 1e-15);
        assert!(inv_logit(-1_000.0_f64) >= 0.0);
        assert!(inv_logit(1_000.0_f64) <= 1.0);
    }

    #[test]
    fn logit_inverts_inv_logit() {
        for p in [0.001, 0.1, 0.3, 0.5, 0.9, 0.999] {
            assert_relative_eq!(inv_logit(logit(p)), p, epsilon = 1e-12);
        }
    }

    #[test]
    fn log_inv_logit_is_finite_in_the_tails() {
        let low = log_inv_logit(-800.0_f64);
        assert!(low.is_finite());
        assert_relative_eq!(low, -800.0, epsilon = 1e-9);
        let high = log1m_inv_logit(800.0_f64);
        assert_relative_eq!(high, -800.0, epsilon = 1e-9);
    }

    #[test]
    fn logistic_jacobian_is_log_p_plus_log_one_minus_p() {
        for x in [-4.0_f64, -0.5, 0.0, 1.3, 6.0] {
            let p = inv_logit(x);
            assert_relative_eq!(
                logit_log_jacobian(x),
                p.ln() + (1.0 - p).ln(),
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn logistic_jacobian_is_log_abs_derivative() {
        for x in [-2.5, 0.0, 0.8, 3.0] {
            let derivative = inv_logit(Dual::var(x)).dot;
            assert_relative_eq!(logit_log_jacobian(x), derivative.abs().ln(), epsilon = 1e-12);
        }
    }

    #[test]
    fn exp_jacobian_is_log_abs_derivative() {
        let x = -0.4;
        let derivative = Dual::var(x).exp().dot;
        assert_relative_eq!(exp_log_jacobian(x), derivative.ln(), epsilon = 1e-15);
    }
}
