//! Forward-mode automatic differentiation via dual numbers.
//!
//! A [`Dual`] carries a primal value and the derivative of that value along one
//! seeded direction. Evaluating the objective with exactly one parameter seeded
//! (`dot = 1`) yields one column of the gradient.

use statrs::function::gamma::{digamma, ln_gamma};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dual {
    /// Primal value.
    pub val: f64,
    /// Tangent value.
    pub dot: f64,
}

impl Dual {
    /// A constant (derivative = 0).
    #[inline]
    pub fn constant(val: f64) -> Self {
        Self { val, dot: 0.0 }
    }

    /// An independent variable (derivative = 1).
    #[inline]
    pub fn var(val: f64) -> Self {
        Self { val, dot: 1.0 }
    }

    #[inline]
    pub fn new(val: f64, dot: f64) -> Self {
        Self { val, dot }
    }

    /// d/dx ln(x) = 1/x.
    #[inline]
    pub fn ln(self) -> Self {
        Self {
            val: self.val.ln(),
            dot: self.dot / self.val,
        }
    }

    /// d/dx exp(x) = exp(x).
    #[inline]
    pub fn exp(self) -> Self {
        let e = self.val.exp();
        Self {
            val: e,
            dot: self.dot * e,
        }
    }

    /// d/dx ln(1 + x) = 1 / (1 + x).
    #[inline]
    pub fn ln_1p(self) -> Self {
        Self {
            val: self.val.ln_1p(),
            dot: self.dot / (1.0 + self.val),
        }
    }

    /// d/dx ln Γ(x) = ψ(x).
    #[inline]
    pub fn ln_gamma(self) -> Self {
        Self {
            val: ln_gamma(self.val),
            dot: self.dot * digamma(self.val),
        }
    }
}

impl Add for Dual {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self {
            val: self.val + rhs.val,
            dot: self.dot + rhs.dot,
        }
    }
}

impl Sub for Dual {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self {
            val: self.val - rhs.val,
            dot: self.dot - rhs.dot,
        }
    }
}

impl Mul for Dual {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self {
            val: self.val * rhs.val,
            dot: self.dot * rhs.val + self.val * rhs.dot,
        }
    }
}

impl Div for Dual {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        let inv = 1.0 / rhs.val;
        Self {
            val: self.val * inv,
            dot: (self.dot * rhs.val - self.val * rhs.dot) * inv * inv,
        }
    }
}

impl Neg for Dual {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self {
            val: -self.val,
            dot: -self.dot,
        }
    }
}

impl AddAssign for Dual {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.val += rhs.val;
        self.dot += rhs.dot;
    }
}

impl SubAssign for Dual {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        self.val -= rhs.val;
        self.dot -= rhs.dot;
    }
}

impl Sum for Dual {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Dual::constant(0.0), |acc, x| acc + x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn product_rule() {
        let x = Dual::var(3.0);
        let y = x * x;
        assert_eq!(y.val, 9.0);
        assert_eq!(y.dot, 6.0);
    }

    #[test]
    fn quotient_rule() {
        // d/dx (1 / x) = -1 / x^2
        let y = Dual::constant(1.0) / Dual::var(2.0);
        assert_relative_eq!(y.val, 0.5);
        assert_relative_eq!(y.dot, -0.25);
    }

    #[test]
    fn chain_through_exp_and_ln() {
        let x = Dual::var(0.7);
        let y = x.exp().ln();
        assert_relative_eq!(y.val, 0.7, epsilon = 1e-15);
        assert_relative_eq!(y.dot, 1.0, epsilon = 1e-15);
    }

    #[test]
    fn ln_gamma_tangent_matches_finite_difference() {
        let x = 2.3;
        let h = 1e-6;
        let fd = (ln_gamma(x + h) - ln_gamma(x - h)) / (2.0 * h);
        let y = Dual::var(x).ln_gamma();
        assert_relative_eq!(y.dot, fd, epsilon = 1e-7);
    }

    #[test]
    fn sum_accumulates_tangents() {
        let total: Dual = [Dual::new(1.0, 0.5), Dual::new(2.0, 0.25)]
            .into_iter()
            .sum();
        assert_eq!(total, Dual::new(3.0, 0.75));
    }
}
