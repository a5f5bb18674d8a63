//! Numeric capability shared by plain evaluation and differentiation.
//!
//! Every density, prior and the objective itself are written once against
//! [`Scalar`]. Instantiating them with `f64` gives the value; instantiating them
//! with [`Dual`](crate::dual::Dual) carries a directional derivative alongside.

use crate::dual::Dual;
use statrs::function::gamma::ln_gamma;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// A real number the model can be evaluated in.
pub trait Scalar:
    Copy
    + Send
    + Sync
    + std::fmt::Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + Sum
{
    /// Lifts a constant. For AD types the tangent is zero.
    fn from_f64(value: f64) -> Self;

    /// The primal value.
    fn value(&self) -> f64;

    fn ln(self) -> Self;

    fn exp(self) -> Self;

    /// `ln(1 + x)`, accurate near zero.
    fn ln_1p(self) -> Self;

    /// `ln Γ(x)` for `x > 0`.
    fn ln_gamma(self) -> Self;

    #[inline]
    fn zero() -> Self {
        Self::from_f64(0.0)
    }

    #[inline]
    fn one() -> Self {
        Self::from_f64(1.0)
    }
}

impl Scalar for f64 {
    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }

    #[inline]
    fn ln(self) -> Self {
        f64::ln(self)
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn ln_1p(self) -> Self {
        f64::ln_1p(self)
    }

    #[inline]
    fn ln_gamma(self) -> Self {
        ln_gamma(self)
    }
}

impl Scalar for Dual {
    #[inline]
    fn from_f64(value: f64) -> Self {
        Dual::constant(value)
    }

    #[inline]
    fn value(&self) -> f64 {
        self.val
    }

    #[inline]
    fn ln(self) -> Self {
        Dual::ln(self)
    }

    #[inline]
    fn exp(self) -> Self {
        Dual::exp(self)
    }

    #[inline]
    fn ln_1p(self) -> Self {
        Dual::ln_1p(self)
    }

    #[inline]
    fn ln_gamma(self) -> Self {
        Dual::ln_gamma(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn log_odds<T: Scalar>(p: T) -> T {
        p.ln() - (-p).ln_1p()
    }

    #[test]
    fn generic_code_agrees_across_scalar_types() {
        let plain = log_odds(0.3_f64);
        let dual = log_odds(Dual::var(0.3));
        assert_relative_eq!(plain, dual.value(), epsilon = 1e-15);
        // d/dp logit(p) = 1 / (p (1 - p))
        assert_relative_eq!(dual.dot, 1.0 / (0.3 * 0.7), epsilon = 1e-12);
    }

    #[test]
    fn ln_gamma_of_small_integers() {
        assert_relative_eq!(Scalar::ln_gamma(1.0_f64), 0.0, epsilon = 1e-12);
        assert_relative_eq!(Scalar::ln_gamma(5.0_f64), 24.0_f64.ln(), epsilon = 1e-10);
    }
}
