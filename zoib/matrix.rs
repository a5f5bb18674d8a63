use crate::scalar::Scalar;
use faer::sparse::{SparseColMat, Triplet};
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("Entry ({row}, {col}) lies outside a {nrows}x{ncols} matrix.")]
    EntryOutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },
    #[error("Non-finite value {value} at entry ({row}, {col}).")]
    NonFiniteEntry { row: usize, col: usize, value: f64 },
    #[error("Sparse matrix construction failed: {0}")]
    Construction(String),
}

/// Unified representation of a model matrix, stored densely or in compressed
/// sparse column form.
///
/// The group incidence matrix is the typical sparse case: one structural
/// nonzero per row, so products cost O(N) rather than O(N·G).
#[derive(Clone, Debug)]
pub enum DesignMatrix {
    Dense(Array2<f64>),
    Sparse(SparseColMat<usize, f64>),
}

impl DesignMatrix {
    /// Builds a sparse matrix from `(row, col, value)` entries. Repeated
    /// coordinates are summed; explicit zeros are dropped.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        entries: &[(usize, usize, f64)],
    ) -> Result<Self, MatrixError> {
        let mut merged: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for &(row, col, value) in entries {
            if row >= nrows || col >= ncols {
                return Err(MatrixError::EntryOutOfBounds {
                    row,
                    col,
                    nrows,
                    ncols,
                });
            }
            if !value.is_finite() {
                return Err(MatrixError::NonFiniteEntry { row, col, value });
            }
            *merged.entry((col, row)).or_insert(0.0) += value;
        }

        let triplets: Vec<Triplet<usize, usize, f64>> = merged
            .into_iter()
            .filter(|&(_, value)| value != 0.0)
            .map(|((col, row), value)| Triplet::new(row, col, value))
            .collect();

        SparseColMat::try_new_from_triplets(nrows, ncols, &triplets)
            .map(DesignMatrix::Sparse)
            .map_err(|e| MatrixError::Construction(format!("{e:?}")))
    }

    /// Incidence matrix mapping observation `i` to group `groups[i]` with
    /// weight one.
    pub fn incidence(groups: &[usize], num_groups: usize) -> Result<Self, MatrixError> {
        let entries: Vec<(usize, usize, f64)> = groups
            .iter()
            .enumerate()
            .map(|(row, &group)| (row, group, 1.0))
            .collect();
        Self::from_triplets(groups.len(), num_groups, &entries)
    }

    pub fn nrows(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.nrows(),
            Self::Sparse(matrix) => matrix.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.ncols(),
            Self::Sparse(matrix) => matrix.ncols(),
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Self::Dense(matrix) => matrix.iter().all(|v| v.is_finite()),
            Self::Sparse(matrix) => matrix.val().iter().all(|v| v.is_finite()),
        }
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => matrix.clone(),
            Self::Sparse(matrix) => {
                let mut dense = Array2::<f64>::zeros((matrix.nrows(), matrix.ncols()));
                let symbolic = matrix.symbolic();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                let values = matrix.val();
                for col in 0..matrix.ncols() {
                    for idx in col_ptr[col]..col_ptr[col + 1] {
                        dense[[row_idx[idx], col]] += values[idx];
                    }
                }
                dense
            }
        }
    }

    /// `A · v` for any scalar type. Only structural nonzeros of a sparse
    /// matrix are visited.
    pub fn matrix_vector_multiply<T: Scalar>(&self, vector: &[T]) -> Vec<T> {
        debug_assert_eq!(vector.len(), self.ncols());
        match self {
            Self::Dense(matrix) => matrix
                .rows()
                .into_iter()
                .map(|row| {
                    row.iter()
                        .zip(vector)
                        .fold(T::zero(), |acc, (&a, &x)| acc + T::from_f64(a) * x)
                })
                .collect(),
            Self::Sparse(matrix) => {
                let mut output = vec![T::zero(); matrix.nrows()];
                let symbolic = matrix.symbolic();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                let values = matrix.val();
                for col in 0..matrix.ncols() {
                    let x = vector[col];
                    for idx in col_ptr[col]..col_ptr[col + 1] {
                        output[row_idx[idx]] += T::from_f64(values[idx]) * x;
                    }
                }
                output
            }
        }
    }

    /// `Aᵀ · v`.
    pub fn transpose_vector_multiply(&self, vector: &Array1<f64>) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => matrix.t().dot(vector),
            Self::Sparse(matrix) => {
                let mut output = Array1::<f64>::zeros(matrix.ncols());
                let symbolic = matrix.symbolic();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                let values = matrix.val();
                for col in 0..matrix.ncols() {
                    let mut acc = 0.0;
                    for idx in col_ptr[col]..col_ptr[col + 1] {
                        acc += values[idx] * vector[row_idx[idx]];
                    }
                    output[col] = acc;
                }
                output
            }
        }
    }

    /// `Aᵀ · diag(w) · A`.
    ///
    /// For the sparse case each pair of columns is combined by merging their
    /// sorted row indices; with one nonzero per row the result is diagonal and
    /// the merge degenerates to a single pass per column.
    pub fn weighted_gram(&self, weights: &Array1<f64>) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => {
                let weighted = matrix * &weights.view().insert_axis(ndarray::Axis(1));
                matrix.t().dot(&weighted)
            }
            Self::Sparse(matrix) => {
                let ncols = matrix.ncols();
                let mut gram = Array2::<f64>::zeros((ncols, ncols));
                let symbolic = matrix.symbolic();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                let values = matrix.val();
                for a in 0..ncols {
                    for b in a..ncols {
                        let (mut i, mut j) = (col_ptr[a], col_ptr[b]);
                        let (end_a, end_b) = (col_ptr[a + 1], col_ptr[b + 1]);
                        let mut acc = 0.0;
                        while i < end_a && j < end_b {
                            match row_idx[i].cmp(&row_idx[j]) {
                                std::cmp::Ordering::Less => i += 1,
                                std::cmp::Ordering::Greater => j += 1,
                                std::cmp::Ordering::Equal => {
                                    acc += values[i] * weights[row_idx[i]] * values[j];
                                    i += 1;
                                    j += 1;
                                }
                            }
                        }
                        gram[[a, b]] = acc;
                        gram[[b, a]] = acc;
                    }
                }
                gram
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dual::Dual;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn example_entries() -> Vec<(usize, usize, f64)> {
        vec![(0, 0, 1.0), (1, 2, 0.5), (2, 1, 1.0), (3, 2, 2.0), (3, 0, -1.0)]
    }

    #[test]
    fn sparse_and_dense_products_agree() {
        let sparse = DesignMatrix::from_triplets(4, 3, &example_entries()).unwrap();
        let dense = DesignMatrix::Dense(sparse.to_dense());
        let v = [0.3, -1.2, 2.0];
        let a = sparse.matrix_vector_multiply(&v);
        let b = dense.matrix_vector_multiply(&v);
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(x, y, epsilon = 1e-15);
        }
        assert_relative_eq!(a[3], 2.0 * 2.0 - 0.3, epsilon = 1e-15);
    }

    #[test]
    fn duplicate_entries_are_summed() {
        let m = DesignMatrix::from_triplets(2, 2, &[(0, 1, 1.0), (0, 1, 0.5)]).unwrap();
        assert_eq!(m.to_dense(), array![[0.0, 1.5], [0.0, 0.0]]);
    }

    #[test]
    fn out_of_bounds_entry_is_rejected() {
        let err = DesignMatrix::from_triplets(2, 2, &[(2, 0, 1.0)]).unwrap_err();
        assert!(matches!(err, MatrixError::EntryOutOfBounds { row: 2, .. }));
    }

    #[test]
    fn incidence_picks_group_effect() {
        let m = DesignMatrix::incidence(&[1, 0, 1], 2).unwrap();
        let pid = [Dual::new(-0.5, 0.0), Dual::new(0.25, 1.0)];
        let out = m.matrix_vector_multiply(&pid);
        assert_eq!(out[0], Dual::new(0.25, 1.0));
        assert_eq!(out[1], Dual::new(-0.5, 0.0));
    }

    #[test]
    fn transpose_product_agrees_with_dense() {
        let sparse = DesignMatrix::from_triplets(4, 3, &example_entries()).unwrap();
        let v = array![1.0, 2.0, -1.0, 0.5];
        let expected = sparse.to_dense().t().dot(&v);
        assert_eq!(sparse.transpose_vector_multiply(&v), expected);
    }

    #[test]
    fn weighted_gram_agrees_with_dense() {
        let sparse = DesignMatrix::from_triplets(4, 3, &example_entries()).unwrap();
        let w = array![0.5, 1.0, 2.0, 3.0];
        let dense = DesignMatrix::Dense(sparse.to_dense());
        let a = sparse.weighted_gram(&w);
        let b = dense.weighted_gram(&w);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-14);
        }
    }
}
