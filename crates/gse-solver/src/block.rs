//! Dense fixed-size block kernels for the block-sparse LU solver.
//!
//! Every nonzero of the gain matrix is a dense `N x N` block of reals
//! (`N = 4` for the positive-sequence model, `N = 12` for three-phase).
//! The kernels here are plain partial-pivoting LU over stack arrays: at
//! these sizes a direct dense factorization beats anything fancier, and
//! the block solver above only needs multiply, right-division by a
//! factored pivot, and triangular solves.

use thiserror::Error;

/// Pivot magnitudes below this are treated as structurally singular.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Errors from dense block factorization.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    #[error("singular pivot block (column {column})")]
    SingularBlock { column: usize },
}

/// Dense square block of reals, stored row-major on the stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareMat<const N: usize>(pub [[f64; N]; N]);

/// Dense block-sized vector segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockVec<const N: usize>(pub [f64; N]);

impl<const N: usize> SquareMat<N> {
    pub const ZERO: Self = Self([[0.0; N]; N]);

    pub fn zero() -> Self {
        Self::ZERO
    }

    pub fn identity() -> Self {
        let mut m = Self::ZERO;
        for i in 0..N {
            m.0[i][i] = 1.0;
        }
        m
    }
}

impl<const N: usize> Default for SquareMat<N> {
    fn default() -> Self {
        Self::ZERO
    }
}

impl<const N: usize> Default for BlockVec<N> {
    fn default() -> Self {
        Self([0.0; N])
    }
}

/// Operations the sparse block LU solver needs from its block type.
///
/// Implemented once for all `SquareMat<N>`; the solver itself is agnostic
/// of the block size.
pub trait LuBlock: Copy + std::fmt::Debug + Send + Sync + 'static {
    type Rhs: Copy + Default + std::fmt::Debug + Send + Sync + 'static;

    /// Scalar dimension of the block.
    const SIZE: usize;

    fn zero() -> Self;

    /// `self -= a * b`
    fn sub_mul_assign(&mut self, a: &Self, b: &Self);

    /// `rhs -= a * v`
    fn sub_mul_vec(rhs: &mut Self::Rhs, a: &Self, v: &Self::Rhs);

    /// In-place dense LU factorization with partial pivoting.
    ///
    /// L (unit lower) and U are stored over `self`; the row-swap sequence
    /// goes to `pivots` (`pivots.len() == SIZE`).
    fn factorize(&mut self, pivots: &mut [usize]) -> Result<(), BlockError>;

    /// Solve `self * x = b` in place, given `self` factored by
    /// [`LuBlock::factorize`] with the recorded `pivots`.
    fn solve_vec(&self, pivots: &[usize], b: &mut Self::Rhs);

    /// `b * self^-1`, given `self` factored with `pivots`.
    fn right_divide(b: &Self, factored: &Self, pivots: &[usize]) -> Self;
}

impl<const N: usize> LuBlock for SquareMat<N> {
    type Rhs = BlockVec<N>;

    const SIZE: usize = N;

    fn zero() -> Self {
        Self::ZERO
    }

    fn sub_mul_assign(&mut self, a: &Self, b: &Self) {
        for i in 0..N {
            for k in 0..N {
                let aik = a.0[i][k];
                if aik == 0.0 {
                    continue;
                }
                for j in 0..N {
                    self.0[i][j] -= aik * b.0[k][j];
                }
            }
        }
    }

    fn sub_mul_vec(rhs: &mut Self::Rhs, a: &Self, v: &Self::Rhs) {
        for i in 0..N {
            let mut acc = 0.0;
            for k in 0..N {
                acc += a.0[i][k] * v.0[k];
            }
            rhs.0[i] -= acc;
        }
    }

    fn factorize(&mut self, pivots: &mut [usize]) -> Result<(), BlockError> {
        debug_assert_eq!(pivots.len(), N);
        let lu = &mut self.0;

        for k in 0..N {
            // Find pivot
            let mut max_val = lu[k][k].abs();
            let mut max_idx = k;
            for i in (k + 1)..N {
                let val = lu[i][k].abs();
                if val > max_val {
                    max_val = val;
                    max_idx = i;
                }
            }

            if max_val < PIVOT_TOLERANCE {
                return Err(BlockError::SingularBlock { column: k });
            }

            pivots[k] = max_idx;
            if max_idx != k {
                lu.swap(k, max_idx);
            }

            // Elimination
            let pivot = lu[k][k];
            for i in (k + 1)..N {
                let factor = lu[i][k] / pivot;
                lu[i][k] = factor;
                for j in (k + 1)..N {
                    lu[i][j] -= factor * lu[k][j];
                }
            }
        }

        Ok(())
    }

    fn solve_vec(&self, pivots: &[usize], b: &mut Self::Rhs) {
        let lu = &self.0;
        let x = &mut b.0;

        // Apply row permutations
        for k in 0..N {
            if pivots[k] != k {
                x.swap(k, pivots[k]);
            }
        }

        // Forward substitution (L y = b, unit diagonal)
        for i in 1..N {
            for j in 0..i {
                x[i] -= lu[i][j] * x[j];
            }
        }

        // Back substitution (U x = y)
        for i in (0..N).rev() {
            for j in (i + 1)..N {
                x[i] -= lu[i][j] * x[j];
            }
            x[i] /= lu[i][i];
        }
    }

    fn right_divide(b: &Self, factored: &Self, pivots: &[usize]) -> Self {
        let lu = &factored.0;
        let mut z = *b;

        // Solve Z U = B column by column of U, per row of B.
        for r in 0..N {
            for j in 0..N {
                let mut acc = z.0[r][j];
                for k in 0..j {
                    acc -= z.0[r][k] * lu[k][j];
                }
                z.0[r][j] = acc / lu[j][j];
            }
        }

        // Solve Z' L = Z with L unit lower triangular.
        for r in 0..N {
            for j in (0..N).rev() {
                let mut acc = z.0[r][j];
                for k in (j + 1)..N {
                    acc -= z.0[r][k] * lu[k][j];
                }
                z.0[r][j] = acc;
            }
        }

        // Undo the row permutation of the factorization on the columns.
        for k in (0..N).rev() {
            if pivots[k] != k {
                for r in 0..N {
                    z.0[r].swap(k, pivots[k]);
                }
            }
        }

        z
    }
}
