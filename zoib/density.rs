//! Log-densities used by the ZOIB likelihood and its priors.
//!
//! Everything here is generic over [`Scalar`] so the same code produces values
//! and, through dual numbers, derivatives. No argument checking is done: a
//! degenerate parameter (a probability of exactly 0 or 1, a beta mean on the
//! boundary) yields a non-finite value that the caller is expected to see.

use crate::scalar::Scalar;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Which branch of the zero-one-inflated mixture an observation falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Zero,
    One,
    Interior,
}

impl Outcome {
    /// Classifies a response already known to lie in `[0, 1]`.
    #[inline]
    pub fn of(y: f64) -> Self {
        if y == 0.0 {
            Outcome::Zero
        } else if y == 1.0 {
            Outcome::One
        } else {
            Outcome::Interior
        }
    }
}

/// Normal log-density.
#[inline]
pub fn normal_lpdf<T: Scalar>(x: T, mean: T, sd: T) -> T {
    let z = (x - mean) / sd;
    -T::from_f64(0.5) * z * z - sd.ln() - T::from_f64(LN_SQRT_2PI)
}

/// `ln B(a, b) = ln Γ(a) + ln Γ(b) - ln Γ(a + b)`.
#[inline]
pub fn ln_beta_fn<T: Scalar>(a: T, b: T) -> T {
    a.ln_gamma() + b.ln_gamma() - (a + b).ln_gamma()
}

/// Beta(a, b) log-density given `ln x` and `ln(1 - x)`.
///
/// Taking the logs as inputs lets a probability stored on the logit scale be
/// evaluated without ever forming `x` itself.
#[inline]
pub fn beta_lpdf<T: Scalar>(ln_x: T, ln_1m_x: T, a: T, b: T) -> T {
    (a - T::one()) * ln_x + (b - T::one()) * ln_1m_x - ln_beta_fn(a, b)
}

/// Bernoulli log-mass of a single trial.
#[inline]
pub fn bernoulli_lpmf<T: Scalar>(success: bool, p: T) -> T {
    if success { p.ln() } else { (-p).ln_1p() }
}

/// Natural log-density of one response under the zero-one-inflated beta.
///
/// * `y`: the response in `[0, 1]`
/// * `mu`: mean of the beta component, in `(0, 1)`
/// * `phi`: precision of the beta component
/// * `zoi`: probability of landing on either boundary
/// * `coi`: probability the boundary is 1 rather than 0
///
/// Boundary outcomes contribute `ln zoi + ln Bernoulli(y; coi)`; interior
/// outcomes contribute `ln(1 - zoi) + ln Beta(y; mu phi, (1 - mu) phi)`.
pub fn zoib_lpdf<T: Scalar>(y: f64, mu: T, phi: T, zoi: T, coi: T) -> T {
    match Outcome::of(y) {
        Outcome::Zero => zoi.ln() + bernoulli_lpmf(false, coi),
        Outcome::One => zoi.ln() + bernoulli_lpmf(true, coi),
        Outcome::Interior => {
            let shape1 = mu * phi;
            let shape2 = (T::one() - mu) * phi;
            (-zoi).ln_1p()
                + beta_lpdf(
                    T::from_f64(y.ln()),
                    T::from_f64((-y).ln_1p()),
                    shape1,
                    shape2,
                )
        }
    }
}

/// Mean of the mixture: `zoi coi + (1 - zoi) mu`.
#[inline]
pub fn zoib_mean(mu: f64, zoi: f64, coi: f64) -> f64 {
    zoi * coi + (1.0 - zoi) * mu
}
