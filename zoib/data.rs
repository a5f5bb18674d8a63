//! # Data Loading and Validation Module
//!
//! Everything the objective reads about the observations lives in
//! [`ZoibData`]: the responses, the fixed-effects design matrix, the group
//! incidence matrix and the prior-only switch. Construction is the only place
//! shapes and value ranges are checked, so the density code downstream can
//! assume a consistent, in-range data set.
//!
//! - Dimension mismatches and responses outside `[0, 1]` are rejected here,
//!   never clamped.
//! - The TSV loader builds `X` from every numeric column that is not `y` or
//!   `group` (in file order, with an optional leading intercept) and `IID`
//!   from the `group` column, ordering group labels naturally.

use crate::matrix::{DesignMatrix, MatrixError};
use ndarray::{Array1, Array2};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

pub const RESPONSE_COLUMN: &str = "y";
pub const GROUP_COLUMN: &str = "group";
pub const INTERCEPT_NAME: &str = "intercept";

/// A validated data set ready for objective evaluation.
#[derive(Debug, Clone)]
pub struct ZoibData {
    /// Responses, each in `[0, 1]`.
    pub y: Array1<f64>,
    /// Fixed-effects design matrix, `[n_obs, n_covariates]`.
    pub x: Array2<f64>,
    /// Observation-to-group incidence, `[n_obs, n_groups]`.
    pub iid: DesignMatrix,
    /// When set, the objective omits the data likelihood.
    pub prior_only: bool,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse the TSV input: {0}")]
    CsvError(#[from] csv::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("Column '{column}' row {row} holds '{value}', which is not a number.")]
    NonNumericValue {
        column: String,
        row: usize,
        value: String,
    },
    #[error(
        "Non-finite values (NaN or Infinity) were found in '{0}'. All data must be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Response {value} at row {row} lies outside [0, 1].")]
    ResponseOutOfRange { row: usize, value: f64 },
    #[error("{what} has {found} rows, but the response has {expected}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("The data set contains no observations.")]
    Empty,
    #[error("Group '{0}' does not appear in the fitted model.")]
    UnknownGroup(String),
    #[error("Failed to build the group incidence matrix: {0}")]
    MatrixError(#[from] MatrixError),
    #[error("Covariate values do not form a rectangular matrix: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl ZoibData {
    pub fn new(
        y: Array1<f64>,
        x: Array2<f64>,
        iid: DesignMatrix,
        prior_only: bool,
    ) -> Result<Self, DataError> {
        let n = y.len();
        if n == 0 {
            return Err(DataError::Empty);
        }
        if x.nrows() != n {
            return Err(DataError::DimensionMismatch {
                what: "The design matrix X",
                expected: n,
                found: x.nrows(),
            });
        }
        if iid.nrows() != n {
            return Err(DataError::DimensionMismatch {
                what: "The group incidence matrix IID",
                expected: n,
                found: iid.nrows(),
            });
        }
        for (row, &value) in y.iter().enumerate() {
            if !value.is_finite() {
                return Err(DataError::NonFiniteValuesFound(RESPONSE_COLUMN.to_string()));
            }
            if !(0.0..=1.0).contains(&value) {
                return Err(DataError::ResponseOutOfRange { row, value });
            }
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound("X".to_string()));
        }
        if !iid.is_finite() {
            return Err(DataError::NonFiniteValuesFound("IID".to_string()));
        }

        Ok(Self {
            y,
            x,
            iid,
            prior_only,
        })
    }

    pub fn num_observations(&self) -> usize {
        self.y.len()
    }

    pub fn num_covariates(&self) -> usize {
        self.x.ncols()
    }

    pub fn num_groups(&self) -> usize {
        self.iid.ncols()
    }
}

/// A data set read from disk together with the names needed to interpret it.
#[derive(Debug)]
pub struct LoadedData {
    pub data: ZoibData,
    /// One name per column of `X`.
    pub covariate_names: Vec<String>,
    /// One label per column of `IID`.
    pub group_labels: Vec<String>,
}

/// Reads a tab-separated file with a header row.
///
/// When `known_groups` is given, its order defines the columns of `IID` and
/// any other label is an error; otherwise the distinct labels in the file are
/// sorted naturally.
pub fn load_tsv(
    path: &Path,
    intercept: bool,
    prior_only: bool,
    known_groups: Option<&[String]>,
) -> Result<LoadedData, DataError> {
    log::info!("Loading data from '{}'", path.display());

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let find = |name: &str| -> Result<usize, DataError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    };
    let y_idx = find(RESPONSE_COLUMN)?;
    let group_idx = find(GROUP_COLUMN)?;
    let covariate_idx: Vec<usize> = (0..headers.len())
        .filter(|&i| i != y_idx && i != group_idx)
        .collect();

    let mut y = Vec::new();
    let mut raw_groups = Vec::new();
    let mut covariates: Vec<f64> = Vec::new();

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let parse = |idx: usize| -> Result<f64, DataError> {
            let text = record.get(idx).unwrap_or("");
            text.parse::<f64>().map_err(|_| DataError::NonNumericValue {
                column: headers.get(idx).unwrap_or("?").to_string(),
                row,
                value: text.to_string(),
            })
        };
        y.push(parse(y_idx)?);
        raw_groups.push(record.get(group_idx).unwrap_or("").to_string());
        if intercept {
            covariates.push(1.0);
        }
        for &idx in &covariate_idx {
            let value = parse(idx)?;
            if !value.is_finite() {
                return Err(DataError::NonFiniteValuesFound(
                    headers.get(idx).unwrap_or("?").to_string(),
                ));
            }
            covariates.push(value);
        }
    }

    let n = y.len();
    if n == 0 {
        return Err(DataError::Empty);
    }

    let mut covariate_names: Vec<String> = Vec::with_capacity(covariate_idx.len() + 1);
    if intercept {
        covariate_names.push(INTERCEPT_NAME.to_string());
    }
    covariate_names.extend(
        covariate_idx
            .iter()
            .map(|&i| headers.get(i).unwrap_or("?").to_string()),
    );

    let group_labels = match known_groups {
        Some(labels) => labels.to_vec(),
        None => natural_group_order(&raw_groups),
    };
    let lookup: HashMap<&str, usize> = group_labels
        .iter()
        .enumerate()
        .map(|(i, label)| (label.as_str(), i))
        .collect();
    let groups = raw_groups
        .iter()
        .map(|label| {
            lookup
                .get(label.as_str())
                .copied()
                .ok_or_else(|| DataError::UnknownGroup(label.clone()))
        })
        .collect::<Result<Vec<usize>, DataError>>()?;

    let x = Array2::from_shape_vec((n, covariate_names.len()), covariates)?;
    let iid = DesignMatrix::incidence(&groups, group_labels.len())?;
    let data = ZoibData::new(Array1::from_vec(y), x, iid, prior_only)?;

    log::info!(
        "Loaded {} observations, {} covariates, {} groups.",
        data.num_observations(),
        data.num_covariates(),
        data.num_groups()
    );

    Ok(LoadedData {
        data,
        covariate_names,
        group_labels,
    })
}

fn natural_group_order(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut labels: Vec<String> = raw
        .iter()
        .filter(|label| seen.insert(label.as_str()))
        .cloned()
        .collect();
    labels.sort_by(|a, b| natord::compare(a, b));
    labels
}
