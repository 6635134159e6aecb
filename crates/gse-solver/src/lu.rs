//! Block-sparse LU with symbolic-pattern reuse.
//!
//! The solver is constructed once from shared CSR index arrays describing a
//! fill-completed sparsity pattern (see the Y-bus view, which computes the
//! fill-in). Per iteration only the numerical factorization re-runs:
//! [`SparseBlockLu::prefactorize`] overwrites the caller's block data with
//! the L/U factors in place, then
//! [`SparseBlockLu::solve_with_prefactorized_matrix`] runs block
//! forward/back substitution. The right-hand side is solved in place, so
//! input and output may alias.
//!
//! Pivoting is confined to the dense diagonal blocks; the block-row
//! pivot sequences live in a flat permutation array sized
//! `n_rows * block_size`, allocated once by the caller and reused across
//! iterations.

use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;

use crate::block::{BlockError, LuBlock};

/// Errors from the sparse block LU solver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LuError {
    /// A diagonal pivot block was singular within tolerance.
    #[error("singular pivot block in row {row}")]
    SingularMatrix { row: usize },

    /// The caller's pattern is not closed under LU fill-in.
    #[error("sparsity pattern misses fill-in entry ({row}, {col})")]
    MissingFillIn { row: usize, col: usize },
}

/// Block sparse LU solver over a fixed, fill-completed CSR pattern.
#[derive(Debug, Clone)]
pub struct SparseBlockLu<B: LuBlock> {
    row_indptr: Arc<Vec<usize>>,
    col_indices: Arc<Vec<usize>>,
    diag: Arc<Vec<usize>>,
    _block: PhantomData<B>,
}

impl<B: LuBlock> SparseBlockLu<B> {
    /// Construct from shared pattern arrays. `diag[i]` is the data index of
    /// the diagonal entry of block row `i`; every diagonal must be present.
    pub fn new(
        row_indptr: Arc<Vec<usize>>,
        col_indices: Arc<Vec<usize>>,
        diag: Arc<Vec<usize>>,
    ) -> Self {
        Self {
            row_indptr,
            col_indices,
            diag,
            _block: PhantomData,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.row_indptr.len() - 1
    }

    /// Length required of the permutation array.
    pub fn perm_len(&self) -> usize {
        self.n_rows() * B::SIZE
    }

    /// Numerical block LU factorization in place over `data`.
    ///
    /// Fill-in positions must already be present in `data` (zero blocks);
    /// the factorization writes L (strictly below the diagonal, with the
    /// unit diagonal implicit) and U over `data`, and the per-block pivot
    /// sequences into `perm`.
    pub fn prefactorize(&self, data: &mut [B], perm: &mut [usize]) -> Result<(), LuError> {
        let n = self.n_rows();
        debug_assert_eq!(data.len(), *self.row_indptr.last().unwrap_or(&0));
        debug_assert_eq!(perm.len(), self.perm_len());

        for row in 0..n {
            let start = self.row_indptr[row];
            let end = self.row_indptr[row + 1];
            let diag_idx = self.diag[row];

            // Eliminate against all finished rows k < row appearing in this
            // row's lower part, in ascending column order.
            for idx in start..diag_idx {
                let k = self.col_indices[idx];
                let k_pivots = &perm[k * B::SIZE..(k + 1) * B::SIZE];

                // L[row, k] = A[row, k] * U[k, k]^-1
                let lik = B::right_divide(&data[idx], &data[self.diag[k]], k_pivots);
                data[idx] = lik;

                // A[row, m] -= L[row, k] * U[k, m] for m > k in row k.
                for k_idx in (self.diag[k] + 1)..self.row_indptr[k + 1] {
                    let m = self.col_indices[k_idx];
                    let target = self.find_entry(row, m).ok_or(LuError::MissingFillIn {
                        row,
                        col: m,
                    })?;
                    let ukm = data[k_idx];
                    data[target].sub_mul_assign(&lik, &ukm);
                }
            }

            // Factor the diagonal pivot block.
            let pivots = &mut perm[row * B::SIZE..(row + 1) * B::SIZE];
            data[diag_idx]
                .factorize(pivots)
                .map_err(|_: BlockError| LuError::SingularMatrix { row })?;
        }

        Ok(())
    }

    /// Forward/back substitution with a prefactorized matrix.
    ///
    /// Solves in place over `rhs`, which doubles as the output vector.
    pub fn solve_with_prefactorized_matrix(
        &self,
        data: &[B],
        perm: &[usize],
        rhs: &mut [B::Rhs],
    ) {
        let n = self.n_rows();
        debug_assert_eq!(rhs.len(), n);

        // Forward: y[i] = b[i] - sum_{k < i} L[i, k] y[k]
        for row in 0..n {
            let (done, rest) = rhs.split_at_mut(row);
            let y_row = &mut rest[0];
            for idx in self.row_indptr[row]..self.diag[row] {
                let k = self.col_indices[idx];
                B::sub_mul_vec(y_row, &data[idx], &done[k]);
            }
        }

        // Backward: x[i] = U[i, i]^-1 (y[i] - sum_{m > i} U[i, m] x[m])
        for row in (0..n).rev() {
            let (head, tail) = rhs.split_at_mut(row + 1);
            let x_row = &mut head[row];
            for idx in (self.diag[row] + 1)..self.row_indptr[row + 1] {
                let m = self.col_indices[idx];
                B::sub_mul_vec(x_row, &data[idx], &tail[m - row - 1]);
            }
            let pivots = &perm[row * B::SIZE..(row + 1) * B::SIZE];
            data[self.diag[row]].solve_vec(pivots, x_row);
        }
    }

    /// Binary search for the data index of entry `(row, col)`.
    fn find_entry(&self, row: usize, col: usize) -> Option<usize> {
        let start = self.row_indptr[row];
        let end = self.row_indptr[row + 1];
        let cols = &self.col_indices[start..end];
        cols.binary_search(&col).ok().map(|pos| start + pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockVec, SquareMat};

    /// 3-block-row test system over a dense pattern so no fill-in concerns.
    fn dense_pattern(n: usize) -> (Arc<Vec<usize>>, Arc<Vec<usize>>, Arc<Vec<usize>>) {
        let mut indptr = Vec::with_capacity(n + 1);
        let mut indices = Vec::new();
        let mut diag = Vec::with_capacity(n);
        indptr.push(0);
        for row in 0..n {
            for col in 0..n {
                if col == row {
                    diag.push(indices.len());
                }
                indices.push(col);
            }
            indptr.push(indices.len());
        }
        (Arc::new(indptr), Arc::new(indices), Arc::new(diag))
    }

    fn spd_block(seed: f64) -> SquareMat<4> {
        // Diagonally dominant blocks keep the reference system well posed.
        let mut m = SquareMat::<4>::zero();
        for i in 0..4 {
            for j in 0..4 {
                m.0[i][j] = if i == j {
                    10.0 + seed + i as f64
                } else {
                    0.3 * seed + 0.1 * (i as f64 - j as f64)
                };
            }
        }
        m
    }

    fn block_matvec(
        indptr: &[usize],
        indices: &[usize],
        data: &[SquareMat<4>],
        x: &[BlockVec<4>],
    ) -> Vec<BlockVec<4>> {
        let n = indptr.len() - 1;
        let mut out = vec![BlockVec::<4>::default(); n];
        for row in 0..n {
            for idx in indptr[row]..indptr[row + 1] {
                let col = indices[idx];
                for i in 0..4 {
                    for j in 0..4 {
                        out[row].0[i] += data[idx].0[i][j] * x[col].0[j];
                    }
                }
            }
        }
        out
    }

    #[test]
    fn test_factor_and_solve_matches_reference() {
        let n = 3;
        let (indptr, indices, diag) = dense_pattern(n);
        let mut data: Vec<SquareMat<4>> = (0..indices.len())
            .map(|k| spd_block(0.2 * k as f64))
            .collect();
        // Strengthen diagonals blocks.
        for row in 0..n {
            for i in 0..4 {
                data[diag[row]].0[i][i] += 20.0;
            }
        }
        let original = data.clone();

        let x_expected: Vec<BlockVec<4>> = (0..n)
            .map(|b| {
                let mut v = BlockVec::<4>::default();
                for i in 0..4 {
                    v.0[i] = (b * 4 + i) as f64 * 0.25 - 1.0;
                }
                v
            })
            .collect();
        let mut rhs = block_matvec(&indptr, &indices, &original, &x_expected);

        let solver = SparseBlockLu::<SquareMat<4>>::new(indptr, indices, diag);
        let mut perm = vec![0usize; solver.perm_len()];
        solver.prefactorize(&mut data, &mut perm).unwrap();
        solver.solve_with_prefactorized_matrix(&data, &perm, &mut rhs);

        for b in 0..n {
            for i in 0..4 {
                assert!(
                    (rhs[b].0[i] - x_expected[b].0[i]).abs() < 1e-9,
                    "mismatch at block {} lane {}: {} vs {}",
                    b,
                    i,
                    rhs[b].0[i],
                    x_expected[b].0[i]
                );
            }
        }
    }

    #[test]
    fn test_refactorization_reuses_pattern() {
        let n = 2;
        let (indptr, indices, diag) = dense_pattern(n);
        let solver = SparseBlockLu::<SquareMat<4>>::new(indptr.clone(), indices.clone(), diag);
        let mut perm = vec![0usize; solver.perm_len()];

        for scale in [1.0, 2.5] {
            let mut data: Vec<SquareMat<4>> =
                (0..indices.len()).map(|k| spd_block(scale + k as f64)).collect();
            for i in 0..4 {
                data[0].0[i][i] += 30.0;
                data[3].0[i][i] += 30.0;
            }
            let original = data.clone();

            let x: Vec<BlockVec<4>> = vec![BlockVec([1.0, 0.0, -1.0, 2.0]); n];
            let mut rhs = block_matvec(&indptr, &indices, &original, &x);

            solver.prefactorize(&mut data, &mut perm).unwrap();
            solver.solve_with_prefactorized_matrix(&data, &perm, &mut rhs);

            for b in 0..n {
                for i in 0..4 {
                    assert!((rhs[b].0[i] - x[b].0[i]).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_singular_matrix_reported() {
        let n = 2;
        let (indptr, indices, diag) = dense_pattern(n);
        let solver = SparseBlockLu::<SquareMat<4>>::new(indptr, indices, diag);
        let mut perm = vec![0usize; solver.perm_len()];

        // Second diagonal block all zero: singular at row 1.
        let mut data = vec![SquareMat::<4>::zero(); 4];
        data[0] = SquareMat::<4>::identity();

        let err = solver.prefactorize(&mut data, &mut perm);
        assert_eq!(err, Err(LuError::SingularMatrix { row: 1 }));
    }
}
