use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Compressed sparse row matrix of f64 values
///
/// Explicit zeros are never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl SparseMatrix {
    /// Builds a matrix from (row, col, value) entries
    ///
    /// Duplicate coordinates are summed; entries that end up exactly zero are
    /// dropped. Out-of-range coordinates are rejected.
    pub fn from_triplets(
        n_rows: usize,
        n_cols: usize,
        triplets: impl IntoIterator<Item = (usize, usize, f64)>,
    ) -> AppResult<Self> {
        let mut entries: Vec<(usize, usize, f64)> = triplets.into_iter().collect();
        if let Some(&(r, c, _)) = entries.iter().find(|(r, c, _)| *r >= n_rows || *c >= n_cols) {
            return Err(AppError::Model(format!(
                "Entry ({}, {}) outside {}x{} matrix",
                r, c, n_rows, n_cols
            )));
        }
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut merged: Vec<(usize, usize, f64)> = Vec::with_capacity(entries.len());
        for (r, c, v) in entries {
            match merged.last_mut() {
                Some(last) if last.0 == r && last.1 == c => last.2 += v,
                _ => merged.push((r, c, v)),
            }
        }

        let mut indptr = vec![0usize; n_rows + 1];
        let mut indices = Vec::with_capacity(merged.len());
        let mut data = Vec::with_capacity(merged.len());
        for (r, c, v) in merged {
            if v == 0.0 {
                continue;
            }
            indptr[r + 1] += 1;
            indices.push(c);
            data.push(v);
        }
        for r in 0..n_rows {
            indptr[r + 1] += indptr[r];
        }

        Ok(Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            data,
        })
    }

    /// Converts a dense matrix, dropping zero entries
    pub fn from_dense(dense: &Array2<f64>) -> Self {
        let (n_rows, n_cols) = dense.dim();
        let mut indptr = Vec::with_capacity(n_rows + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for row in dense.rows() {
            for (c, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    indices.push(c);
                    data.push(v);
                }
            }
            indptr.push(indices.len());
        }
        Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            data,
        }
    }

    /// Checks the CSR layout of a matrix that did not come from a constructor
    ///
    /// `row` slices by `indptr` and indexes output by column, so a deserialised
    /// matrix must pass this before any product is taken.
    pub fn validate(&self) -> AppResult<()> {
        if self.indptr.len() != self.n_rows + 1 || self.indptr.first() != Some(&0) {
            return Err(AppError::Artifact(format!(
                "Row pointer of length {} does not fit {} rows",
                self.indptr.len(),
                self.n_rows
            )));
        }
        if self.indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(AppError::Artifact("Row pointer is not monotone".to_string()));
        }
        let nnz = self.indptr[self.n_rows];
        if nnz != self.indices.len() || nnz != self.data.len() {
            return Err(AppError::Artifact(format!(
                "Row pointer ends at {} but there are {} indices and {} values",
                nnz,
                self.indices.len(),
                self.data.len()
            )));
        }
        if let Some(&c) = self.indices.iter().find(|&&c| c >= self.n_cols) {
            return Err(AppError::Artifact(format!(
                "Column index {} outside {} columns",
                c, self.n_cols
            )));
        }
        Ok(())
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Stored (column, value) entries of one row; empty for out-of-range rows
    pub fn row(&self, r: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let (start, end) = if r < self.n_rows {
            (self.indptr[r], self.indptr[r + 1])
        } else {
            (0, 0)
        };
        self.indices[start..end]
            .iter()
            .copied()
            .zip(self.data[start..end].iter().copied())
    }

    pub fn row_dense(&self, r: usize) -> Array1<f64> {
        let mut out = Array1::zeros(self.n_cols);
        for (c, v) in self.row(r) {
            out[c] = v;
        }
        out
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut out = Array2::zeros((self.n_rows, self.n_cols));
        for r in 0..self.n_rows {
            for (c, v) in self.row(r) {
                out[[r, c]] = v;
            }
        }
        out
    }

    /// `self · rhs`
    pub fn dot_dense(&self, rhs: &Array2<f64>) -> AppResult<Array2<f64>> {
        if rhs.nrows() != self.n_cols {
            return Err(shape_error("dot", self.shape(), rhs.dim()));
        }
        let mut out = Array2::zeros((self.n_rows, rhs.ncols()));
        for r in 0..self.n_rows {
            for (c, v) in self.row(r) {
                let mut out_row = out.row_mut(r);
                out_row.scaled_add(v, &rhs.row(c));
            }
        }
        Ok(out)
    }

    /// `selfᵀ · rhs`
    pub fn transpose_dot_dense(&self, rhs: &Array2<f64>) -> AppResult<Array2<f64>> {
        if rhs.nrows() != self.n_rows {
            return Err(shape_error("transpose dot", self.shape(), rhs.dim()));
        }
        let mut out = Array2::zeros((self.n_cols, rhs.ncols()));
        for r in 0..self.n_rows {
            let rhs_row = rhs.row(r);
            for (c, v) in self.row(r) {
                let mut out_row = out.row_mut(c);
                out_row.scaled_add(v, &rhs_row);
            }
        }
        Ok(out)
    }
}

fn shape_error(op: &str, lhs: (usize, usize), rhs: (usize, usize)) -> AppError {
    AppError::Model(format!(
        "Shape mismatch in sparse {}: {}x{} and {}x{}",
        op, lhs.0, lhs.1, rhs.0, rhs.1
    ))
}
