use nalgebra::{DMatrix, SVD};
use ndarray::{Array1, Array2};
use rand::{distributions::Uniform, rngs::StdRng, Rng, SeedableRng};

use super::sparse::SparseMatrix;
use crate::error::{AppError, AppResult};

const RANK_EPS: f64 = 1e-10;

/// Randomised truncated singular value decomposition of a sparse matrix
///
/// Range finder with power iterations (Halko, Martinsson & Tropp), followed by
/// an exact SVD of the small projected matrix.
#[derive(Debug, Clone)]
pub struct TruncatedSvd {
    pub n_components: usize,
    pub n_oversamples: usize,
    pub n_iter: usize,
    pub seed: u64,
}

impl Default for TruncatedSvd {
    fn default() -> Self {
        Self {
            n_components: 50,
            n_oversamples: 10,
            n_iter: 5,
            seed: 42,
        }
    }
}

/// Rank-k factorisation `A ≈ u_sigma · components`
#[derive(Debug, Clone)]
pub struct SvdFactors {
    /// `U Σ`, shape (n_rows × k)
    pub u_sigma: Array2<f64>,
    /// Descending singular values, length k
    pub singular_values: Array1<f64>,
    /// `Vᵀ`, shape (k × n_cols)
    pub components: Array2<f64>,
}

impl TruncatedSvd {
    pub fn with_components(n_components: usize, seed: u64) -> Self {
        Self {
            n_components,
            seed,
            ..Self::default()
        }
    }

    /// Effective rank for a matrix of the given shape
    pub fn effective_rank(&self, shape: (usize, usize)) -> usize {
        self.n_components.min(shape.0).min(shape.1)
    }

    pub fn fit(&self, a: &SparseMatrix) -> AppResult<SvdFactors> {
        let (m, n) = a.shape();
        let k = self.effective_rank((m, n));
        if k == 0 {
            return Err(AppError::Model(format!(
                "Cannot factorise a {}x{} matrix",
                m, n
            )));
        }
        let width = (k + self.n_oversamples).min(m.min(n));

        let mut rng = StdRng::seed_from_u64(self.seed);
        let dist = Uniform::new_inclusive(-1.0, 1.0);
        let omega = Array2::from_shape_simple_fn((n, width), || rng.sample(dist));

        let mut q = orthonormalize(a.dot_dense(&omega)?);
        for _ in 0..self.n_iter {
            let z = orthonormalize(a.transpose_dot_dense(&q)?);
            q = orthonormalize(a.dot_dense(&z)?);
        }

        // B = Qᵀ A, computed as (Aᵀ Q)ᵀ
        let b = a.transpose_dot_dense(&q)?.reversed_axes();
        let svd = SVD::new(to_nalgebra(&b), true, true);
        let u_b = svd
            .u
            .ok_or_else(|| AppError::Model("SVD failed to compute U".to_string()))?;
        let v_t = svd
            .v_t
            .ok_or_else(|| AppError::Model("SVD failed to compute V^T".to_string()))?;
        let sigma = &svd.singular_values;

        let mut order: Vec<usize> = (0..sigma.len()).collect();
        order.sort_by(|&i, &j| sigma[j].total_cmp(&sigma[i]));

        let u_b = from_nalgebra(&u_b);
        let mut u_sigma = Array2::zeros((m, k));
        let mut singular_values = Array1::zeros(k);
        let mut components = Array2::zeros((k, n));
        for (slot, &idx) in order.iter().take(k).enumerate() {
            let value = sigma[idx];
            singular_values[slot] = value;
            if value > RANK_EPS {
                u_sigma.column_mut(slot).assign(&(q.dot(&u_b.column(idx)) * value));
                for col in 0..n {
                    components[[slot, col]] = v_t[(idx, col)];
                }
            }
        }

        tracing::debug!(rows = m, cols = n, rank = k, "Truncated SVD fitted");

        Ok(SvdFactors {
            u_sigma,
            singular_values,
            components,
        })
    }
}

/// Thin QR of the columns, keeping Q
fn orthonormalize(y: Array2<f64>) -> Array2<f64> {
    from_nalgebra(&to_nalgebra(&y).qr().q())
}

fn to_nalgebra(a: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = a.dim();
    DMatrix::from_fn(rows, cols, |i, j| a[[i, j]])
}

fn from_nalgebra(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn(m.shape(), |(i, j)| m[(i, j)])
}
