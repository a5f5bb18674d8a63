use crate::dual::Dual;
use crate::scalar::Scalar;
use ndarray::Array1;
use std::ops::Range;

/// Position of every free parameter inside the flat vector the optimiser
/// moves on.
///
/// The order is `[betas, log_phi, logit_zoi, logit_coi, pid, log_sd_pid]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterLayout {
    pub num_betas: usize,
    pub num_groups: usize,
}

impl ParameterLayout {
    pub fn new(num_betas: usize, num_groups: usize) -> Self {
        Self {
            num_betas,
            num_groups,
        }
    }

    pub fn betas(&self) -> Range<usize> {
        0..self.num_betas
    }

    pub fn log_phi(&self) -> usize {
        self.num_betas
    }

    pub fn logit_zoi(&self) -> usize {
        self.num_betas + 1
    }

    pub fn logit_coi(&self) -> usize {
        self.num_betas + 2
    }

    pub fn pid(&self) -> Range<usize> {
        let start = self.num_betas + 3;
        start..start + self.num_groups
    }

    pub fn log_sd_pid(&self) -> usize {
        self.num_betas + 3 + self.num_groups
    }

    pub fn len(&self) -> usize {
        self.num_betas + self.num_groups + 4
    }

    /// Length of the vector with the `pid` block removed.
    pub fn fixed_len(&self) -> usize {
        self.num_betas + 4
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.betas().map(|j| format!("beta[{j}]")).collect();
        names.push("log_phi".to_string());
        names.push("logit_zoi".to_string());
        names.push("logit_coi".to_string());
        names.extend((0..self.num_groups).map(|g| format!("pid[{g}]")));
        names.push("log_sd_pid".to_string());
        names
    }

    /// Reads a full vector into typed parameters.
    pub fn unpack<T: Scalar>(&self, theta: &[T]) -> ZoibParams<T> {
        debug_assert_eq!(theta.len(), self.len());
        ZoibParams {
            betas: theta[self.betas()].to_vec(),
            log_phi: theta[self.log_phi()],
            logit_zoi: theta[self.logit_zoi()],
            logit_coi: theta[self.logit_coi()],
            pid: theta[self.pid()].to_vec(),
            log_sd_pid: theta[self.log_sd_pid()],
        }
    }

    /// Lifts `theta` to dual numbers with coordinate `seed` as the direction
    /// of differentiation.
    pub fn unpack_seeded(&self, theta: &Array1<f64>, seed: usize) -> ZoibParams<Dual> {
        let lifted: Vec<Dual> = theta
            .iter()
            .enumerate()
            .map(|(i, &v)| if i == seed { Dual::var(v) } else { Dual::constant(v) })
            .collect();
        self.unpack(&lifted)
    }

    pub fn pack(&self, params: &ZoibParams<f64>) -> Array1<f64> {
        let mut theta = Array1::zeros(self.len());
        for (j, &b) in self.betas().zip(&params.betas) {
            theta[j] = b;
        }
        theta[self.log_phi()] = params.log_phi;
        theta[self.logit_zoi()] = params.logit_zoi;
        theta[self.logit_coi()] = params.logit_coi;
        for (g, &p) in self.pid().zip(&params.pid) {
            theta[g] = p;
        }
        theta[self.log_sd_pid()] = params.log_sd_pid;
        theta
    }

    /// Drops the `pid` block.
    pub fn split_fixed(&self, theta: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        let pid = self.pid();
        let fixed: Array1<f64> = theta
            .iter()
            .enumerate()
            .filter(|(i, _)| !pid.contains(i))
            .map(|(_, &v)| v)
            .collect();
        let random = theta.slice(ndarray::s![pid.start..pid.end]).to_owned();
        (fixed, random)
    }

    /// Inverse of [`split_fixed`](Self::split_fixed).
    pub fn join_fixed(&self, fixed: &Array1<f64>, pid: &Array1<f64>) -> Array1<f64> {
        debug_assert_eq!(fixed.len(), self.fixed_len());
        debug_assert_eq!(pid.len(), self.num_groups);
        let split = self.pid().start;
        fixed
            .iter()
            .take(split)
            .chain(pid.iter())
            .chain(fixed.iter().skip(split))
            .copied()
            .collect()
    }
}

/// Free parameters on the optimiser's scale.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoibParams<T> {
    pub betas: Vec<T>,
    pub log_phi: T,
    pub logit_zoi: T,
    pub logit_coi: T,
    pub pid: Vec<T>,
    pub log_sd_pid: T,
}
