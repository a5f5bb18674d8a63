use crate::data::{DataError, LoadedData, ZoibData, load_tsv};
use crate::density::zoib_mean;
use crate::estimate::{FitMethod, FitResult};
use crate::laplace::NewtonSettings;
use crate::objective::{ObjectiveError, Report, ZoibObjective};
use crate::params::{ParameterLayout, ZoibParams};
use crate::priors::PriorConfig;
use crate::transforms::logit;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable configuration and fitted-model
// formats, both stored as TOML.

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("'{name}' must be a finite positive number, got {value}.")]
    NotPositive { name: &'static str, value: f64 },
    #[error("'{name}' must lie strictly between 0 and 1, got {value}.")]
    NotAProbability { name: &'static str, value: f64 },
    #[error("'{name}' must be at least 1.")]
    ZeroCount { name: &'static str },
}

/// Optimiser settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub method: FitMethod,
    /// BFGS gradient-norm tolerance.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Gradient norm below which a point where the line search stalled is
    /// still accepted as the optimum.
    pub stall_tolerance: f64,
    pub inner_tolerance: f64,
    pub inner_max_iterations: usize,
    pub inner_max_step_halvings: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            method: FitMethod::Map,
            tolerance: 1e-6,
            max_iterations: 500,
            stall_tolerance: 1e-2,
            inner_tolerance: 1e-9,
            inner_max_iterations: 50,
            inner_max_step_halvings: 30,
        }
    }
}

impl FitConfig {
    pub fn newton_settings(&self) -> NewtonSettings {
        NewtonSettings {
            max_iterations: self.inner_max_iterations,
            tolerance: self.inner_tolerance,
            max_step_halvings: self.inner_max_step_halvings,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("fit.tolerance", self.tolerance),
            ("fit.stall_tolerance", self.stall_tolerance),
            ("fit.inner_tolerance", self.inner_tolerance),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroCount {
                name: "fit.max_iterations",
            });
        }
        if self.inner_max_iterations == 0 {
            return Err(ConfigError::ZeroCount {
                name: "fit.inner_max_iterations",
            });
        }
        Ok(())
    }
}

/// Starting values on the natural scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialValues {
    pub phi: f64,
    pub zoi: f64,
    pub coi: f64,
    pub sd_pid: f64,
}

impl Default for InitialValues {
    fn default() -> Self {
        Self {
            phi: 2.0,
            zoi: 0.1,
            coi: 0.5,
            sd_pid: 0.5,
        }
    }
}

impl InitialValues {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("initial.phi", self.phi), ("initial.sd_pid", self.sd_pid)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        for (name, value) in [("initial.zoi", self.zoi), ("initial.coi", self.coi)] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::NotAProbability { name, value });
            }
        }
        Ok(())
    }

    /// Starting point on the optimiser's scale: betas and pid at zero.
    pub fn to_vector(&self, layout: ParameterLayout) -> Array1<f64> {
        layout.pack(&ZoibParams {
            betas: vec![0.0; layout.num_betas],
            log_phi: self.phi.ln(),
            logit_zoi: logit(self.zoi),
            logit_coi: logit(self.coi),
            pid: vec![0.0; layout.num_groups],
            log_sd_pid: self.sd_pid.ln(),
        })
    }
}

/// Everything that determines a fit apart from the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Prepend a column of ones to the covariates read from file.
    pub intercept: bool,
    /// Drop the data likelihood from the objective.
    pub prior_only: bool,
    pub priors: PriorConfig,
    pub fit: FitConfig,
    pub initial: InitialValues,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            intercept: true,
            prior_only: false,
            priors: PriorConfig::default(),
            fit: FitConfig::default(),
            initial: InitialValues::default(),
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.priors.validate()?;
        self.fit.validate()?;
        self.initial.validate()
    }

    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        write_toml(self, path)
    }
}

/// The self-contained fitted-model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub config: ModelConfig,
    pub method: FitMethod,
    /// One name per column of `X`.
    pub covariate_names: Vec<String>,
    /// One label per group effect, in `pid` order.
    pub group_labels: Vec<String>,
    /// The optimum on the optimiser's scale, keyed by parameter name.
    pub estimates: BTreeMap<String, f64>,
    /// Fixed effects keyed by covariate name.
    pub betas: BTreeMap<String, f64>,
    /// Group effects keyed by group label.
    pub group_effects: BTreeMap<String, f64>,
    pub phi: f64,
    pub zoi: f64,
    pub coi: f64,
    pub sd_pid: f64,
    /// Minimised objective: the joint negative log-posterior for MAP, the
    /// Laplace marginal otherwise.
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Data has {found} covariate columns, but the model was fitted on {expected}.")]
    MismatchedCovariateCount { found: usize, expected: usize },
    #[error(
        "Data covariates are [{}], but the model was fitted on [{}] in that order.",
        .found.join(", "),
        .expected.join(", ")
    )]
    MismatchedCovariateNames {
        found: Vec<String>,
        expected: Vec<String>,
    },
    #[error("Data has {found} groups, but the model was fitted on {expected}.")]
    MismatchedGroupCount { found: usize, expected: usize },
    #[error("The model file is missing the estimate '{0}'.")]
    MissingEstimate(String),
    #[error(transparent)]
    Objective(#[from] ObjectiveError),
    #[error(transparent)]
    Data(#[from] DataError),
}

/// Objective and per-observation predictions at the fitted parameters.
#[derive(Debug, Clone)]
pub struct ModelEvaluation {
    pub objective: f64,
    pub log_prior: f64,
    pub log_likelihood: f64,
    pub report: Report,
    /// `zoi·coi + (1 − zoi)·mu` per observation.
    pub expected: Vec<f64>,
}

impl FittedModel {
    pub fn new(
        config: ModelConfig,
        covariate_names: Vec<String>,
        group_labels: Vec<String>,
        fit: &FitResult,
    ) -> Self {
        let layout = ParameterLayout::new(covariate_names.len(), group_labels.len());
        let estimates = layout
            .names()
            .into_iter()
            .zip(fit.theta.iter().copied())
            .collect();
        let betas = covariate_names
            .iter()
            .cloned()
            .zip(fit.report.betas.iter().copied())
            .collect();
        let group_effects = group_labels
            .iter()
            .cloned()
            .zip(fit.report.pid.iter().copied())
            .collect();
        Self {
            config,
            method: fit.method,
            covariate_names,
            group_labels,
            estimates,
            betas,
            group_effects,
            phi: fit.report.phi,
            zoi: fit.report.zoi,
            coi: fit.report.coi,
            sd_pid: fit.theta[layout.log_sd_pid()].exp(),
            objective: fit.objective,
            iterations: fit.iterations,
            converged: fit.converged,
        }
    }

    pub fn layout(&self) -> ParameterLayout {
        ParameterLayout::new(self.covariate_names.len(), self.group_labels.len())
    }

    /// Reassembles the flat parameter vector from the named estimates.
    pub fn theta(&self) -> Result<Array1<f64>, ModelError> {
        self.layout()
            .names()
            .into_iter()
            .map(|name| {
                self.estimates
                    .get(&name)
                    .copied()
                    .ok_or(ModelError::MissingEstimate(name))
            })
            .collect()
    }

    /// Loads a TSV for evaluation against this model: the fitted group labels
    /// define the group columns, and the covariates must match the fitted
    /// ones by name and order.
    pub fn load_data(&self, path: &Path) -> Result<LoadedData, ModelError> {
        let loaded = load_tsv(
            path,
            self.config.intercept,
            self.config.prior_only,
            Some(&self.group_labels),
        )?;
        if loaded.covariate_names != self.covariate_names {
            return Err(ModelError::MismatchedCovariateNames {
                found: loaded.covariate_names,
                expected: self.covariate_names.clone(),
            });
        }
        Ok(loaded)
    }

    /// Evaluates the objective and the expected response on `data` at the
    /// fitted parameters.
    pub fn evaluate(&self, data: &ZoibData) -> Result<ModelEvaluation, ModelError> {
        if data.num_covariates() != self.covariate_names.len() {
            return Err(ModelError::MismatchedCovariateCount {
                found: data.num_covariates(),
                expected: self.covariate_names.len(),
            });
        }
        if data.num_groups() != self.group_labels.len() {
            return Err(ModelError::MismatchedGroupCount {
                found: data.num_groups(),
                expected: self.group_labels.len(),
            });
        }

        let theta = self.theta()?;
        let objective = ZoibObjective::new(data, &self.config.priors);
        let (evaluation, params) = objective.evaluate_vector(&theta)?;
        let report = evaluation.report(&params);
        let expected = report
            .mu
            .iter()
            .map(|&mu| zoib_mean(mu, report.zoi, report.coi))
            .collect();

        Ok(ModelEvaluation {
            objective: evaluation.value,
            log_prior: evaluation.log_prior,
            log_likelihood: evaluation.log_likelihood,
            report,
            expected,
        })
    }

    /// Saves the fitted model to a file in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        write_toml(self, path)
    }

    /// Loads a fitted model from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: Self = toml::from_str(&toml_string)?;
        model.config.validate()?;
        Ok(model)
    }
}

fn write_toml<T: Serialize>(value: &T, path: &Path) -> Result<(), ModelError> {
    let toml_string = toml::to_string_pretty(value)?;
    let mut file = BufWriter::new(fs::File::create(path)?);
    file.write_all(toml_string.as_bytes())?;
    file.flush()?;
    Ok(())
}
