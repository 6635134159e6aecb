//! Scalar and three-phase tensor primitives behind one parametric interface.
//!
//! The estimator is written once, generic over a [`PhaseModel`]:
//! [`Symmetric`] collapses every tensor operation to plain `f64`/`Complex64`
//! arithmetic for the positive-sequence model, [`Asymmetric`] expands the
//! same operations to per-phase 3-vectors and 3x3 tensors. Dispatch is
//! static; the symmetric instantiation compiles down to scalar code.
//!
//! The two combinators [`g_cos_plus_b_sin`] and [`g_sin_minus_b_cos`]
//! evaluate the active- and reactive-power contribution of an admittance
//! term from real/imaginary products of the cached complex voltages.
//! `cos(theta_i - theta_j)` is never materialized; keep it that way.

use num_complex::Complex64;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;
use std::ops::{Add, Neg, Sub};

use crate::block::{BlockVec, LuBlock, SquareMat};

/// Block slot for the voltage angle unknown (and `eta_theta` residual).
pub const SLOT_THETA: usize = 0;
/// Block slot for the relative magnitude unknown (and `eta_v` residual).
pub const SLOT_V: usize = 1;
/// Block slot for the active-power Lagrange multiplier (and `tau_p`).
pub const SLOT_PHI_P: usize = 2;
/// Block slot for the reactive-power Lagrange multiplier (and `tau_q`).
pub const SLOT_PHI_Q: usize = 3;

/// Per-phase real 3-vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RealVec3(pub [f64; 3]);

/// Per-phase complex 3-vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplexVec3(pub [Complex64; 3]);

/// Real 3x3 phase tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RealMat3(pub [[f64; 3]; 3]);

/// Complex 3x3 phase tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplexMat3(pub [[Complex64; 3]; 3]);

impl ComplexMat3 {
    /// Diagonal tensor with the same admittance on every phase, for
    /// balanced components without mutual coupling.
    pub fn balanced_diagonal(y: Complex64) -> Self {
        let mut m = Self::default();
        for p in 0..3 {
            m.0[p][p] = y;
        }
        m
    }
}

macro_rules! impl_elementwise_vec {
    ($name:ident) => {
        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                let mut out = self;
                for i in 0..3 {
                    out.0[i] = out.0[i] + rhs.0[i];
                }
                out
            }
        }

        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                let mut out = self;
                for i in 0..3 {
                    out.0[i] = out.0[i] - rhs.0[i];
                }
                out
            }
        }

        impl Neg for $name {
            type Output = Self;
            fn neg(self) -> Self {
                let mut out = self;
                for i in 0..3 {
                    out.0[i] = -out.0[i];
                }
                out
            }
        }
    };
}

macro_rules! impl_elementwise_mat {
    ($name:ident) => {
        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                let mut out = self;
                for i in 0..3 {
                    for j in 0..3 {
                        out.0[i][j] = out.0[i][j] + rhs.0[i][j];
                    }
                }
                out
            }
        }

        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                let mut out = self;
                for i in 0..3 {
                    for j in 0..3 {
                        out.0[i][j] = out.0[i][j] - rhs.0[i][j];
                    }
                }
                out
            }
        }

        impl Neg for $name {
            type Output = Self;
            fn neg(self) -> Self {
                let mut out = self;
                for i in 0..3 {
                    for j in 0..3 {
                        out.0[i][j] = -out.0[i][j];
                    }
                }
                out
            }
        }
    };
}

impl_elementwise_vec!(RealVec3);
impl_elementwise_vec!(ComplexVec3);
impl_elementwise_mat!(RealMat3);
impl_elementwise_mat!(ComplexMat3);

/// Parametric interface over the scalar (positive-sequence) and 3x3
/// (three-phase) tensor shapes.
pub trait PhaseModel: Copy + Debug + Send + Sync + 'static {
    /// Scalar lanes per block slot: 1 or 3.
    const LANES: usize;
    /// Scalar dimension of a gain block: `4 * LANES`.
    const BLOCK_SIZE: usize;

    type Real: Copy
        + Debug
        + Default
        + PartialEq
        + Add<Output = Self::Real>
        + Sub<Output = Self::Real>
        + Neg<Output = Self::Real>
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;
    type Complex: Copy
        + Debug
        + Default
        + PartialEq
        + Add<Output = Self::Complex>
        + Sub<Output = Self::Complex>
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;
    type RealTensor: Copy
        + Debug
        + Default
        + Add<Output = Self::RealTensor>
        + Sub<Output = Self::RealTensor>
        + Neg<Output = Self::RealTensor>
        + Send
        + Sync
        + 'static;
    type ComplexTensor: Copy
        + Debug
        + Default
        + Add<Output = Self::ComplexTensor>
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Dense gain block handed to the LU solver.
    type GainBlock: LuBlock<Rhs = Self::RhsBlock>;
    /// Dense right-hand-side / unknown block.
    type RhsBlock: Copy + Debug + Default + Send + Sync + 'static;

    /// Broadcast a scalar to all lanes.
    fn real_scalar(x: f64) -> Self::Real;

    /// Broadcast a phasor to all lanes, applying the nominal phase rotation
    /// (identity in symmetric mode, `1, a^2, a` in asymmetric mode).
    fn balanced_complex(c: Complex64) -> Self::Complex;

    /// Nominal per-lane angle offset: zero, or `(0, -2pi/3, +2pi/3)`.
    fn nominal_angle_shift() -> Self::Real;

    fn real(c: &Self::Complex) -> Self::Real;
    fn imag(c: &Self::Complex) -> Self::Real;
    fn complex_from_parts(re: &Self::Real, im: &Self::Real) -> Self::Complex;
    /// Per-lane magnitude.
    fn cabs(c: &Self::Complex) -> Self::Real;
    /// `magnitude * exp(i * angle)` per lane. The only transcendental call
    /// in the solver hot path.
    fn polar(magnitude: &Self::Real, angle: &Self::Real) -> Self::Complex;
    /// Keep the angle of `u`, replace its magnitude.
    fn rescale_magnitude(u: &Self::Complex, magnitude: &Self::Real) -> Self::Complex;

    /// Elementwise lane product.
    fn mul_r(a: &Self::Real, b: &Self::Real) -> Self::Real;
    /// Per-lane reciprocal, the `diagonal_inverse` of the formulation.
    fn inv(v: &Self::Real) -> Self::Real;
    fn max_val(v: &Self::Real) -> f64;
    fn lane_mean(v: &Self::Real) -> f64;

    /// `a_i * b_j` outer product.
    fn outer(a: &Self::Real, b: &Self::Real) -> Self::RealTensor;
    /// Hadamard (elementwise) tensor product.
    fn mul_elem(a: &Self::RealTensor, b: &Self::RealTensor) -> Self::RealTensor;
    /// Row sums, reducing a tensor to a lane vector (identity for scalars).
    fn sum_row(t: &Self::RealTensor) -> Self::Real;
    /// Embed a lane vector as a diagonal tensor.
    fn diag(v: &Self::Real) -> Self::RealTensor;
    fn transpose(t: &Self::RealTensor) -> Self::RealTensor;
    fn tensor_real(y: &Self::ComplexTensor) -> Self::RealTensor;
    fn tensor_imag(y: &Self::ComplexTensor) -> Self::RealTensor;
    /// `y * u` tensor-vector product.
    fn complex_matvec(y: &Self::ComplexTensor, u: &Self::Complex) -> Self::Complex;
    /// Elementwise `a * conj(b)`.
    fn mul_conj(a: &Self::Complex, b: &Self::Complex) -> Self::Complex;

    /// Weighted normal-equation cell `a^T * diag(w) * b`.
    fn wls_cell(a: &Self::RealTensor, w: &Self::Real, b: &Self::RealTensor) -> Self::RealTensor;
    /// Weighted residual projection `a^T * diag(w) * v`.
    fn wls_rhs(a: &Self::RealTensor, w: &Self::Real, v: &Self::Real) -> Self::Real;

    /// Accumulate a tensor into the `(row, col)` cell of a gain block,
    /// with slot indices in `0..4` (see the `SLOT_*` constants).
    fn gain_add(block: &mut Self::GainBlock, row: usize, col: usize, t: &Self::RealTensor);
    fn gain_get(block: &Self::GainBlock, row: usize, col: usize) -> Self::RealTensor;
    fn gain_set(block: &mut Self::GainBlock, row: usize, col: usize, t: &Self::RealTensor);
    fn rhs_add(rhs: &mut Self::RhsBlock, slot: usize, v: &Self::Real);
    fn rhs_get(rhs: &Self::RhsBlock, slot: usize) -> Self::Real;
}

/// Positive-sequence model: one scalar lane per quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symmetric;

/// Three-phase model: three lanes, tensors are 3x3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asymmetric;

impl PhaseModel for Symmetric {
    const LANES: usize = 1;
    const BLOCK_SIZE: usize = 4;

    type Real = f64;
    type Complex = Complex64;
    type RealTensor = f64;
    type ComplexTensor = Complex64;
    type GainBlock = SquareMat<4>;
    type RhsBlock = BlockVec<4>;

    fn real_scalar(x: f64) -> f64 {
        x
    }

    fn balanced_complex(c: Complex64) -> Complex64 {
        c
    }

    fn nominal_angle_shift() -> f64 {
        0.0
    }

    fn real(c: &Complex64) -> f64 {
        c.re
    }

    fn imag(c: &Complex64) -> f64 {
        c.im
    }

    fn complex_from_parts(re: &f64, im: &f64) -> Complex64 {
        Complex64::new(*re, *im)
    }

    fn cabs(c: &Complex64) -> f64 {
        c.norm()
    }

    fn polar(magnitude: &f64, angle: &f64) -> Complex64 {
        Complex64::from_polar(*magnitude, *angle)
    }

    fn rescale_magnitude(u: &Complex64, magnitude: &f64) -> Complex64 {
        *u * (magnitude / u.norm())
    }

    fn mul_r(a: &f64, b: &f64) -> f64 {
        a * b
    }

    fn inv(v: &f64) -> f64 {
        1.0 / v
    }

    fn max_val(v: &f64) -> f64 {
        *v
    }

    fn lane_mean(v: &f64) -> f64 {
        *v
    }

    fn outer(a: &f64, b: &f64) -> f64 {
        a * b
    }

    fn mul_elem(a: &f64, b: &f64) -> f64 {
        a * b
    }

    fn sum_row(t: &f64) -> f64 {
        *t
    }

    fn diag(v: &f64) -> f64 {
        *v
    }

    fn transpose(t: &f64) -> f64 {
        *t
    }

    fn tensor_real(y: &Complex64) -> f64 {
        y.re
    }

    fn tensor_imag(y: &Complex64) -> f64 {
        y.im
    }

    fn complex_matvec(y: &Complex64, u: &Complex64) -> Complex64 {
        y * u
    }

    fn mul_conj(a: &Complex64, b: &Complex64) -> Complex64 {
        a * b.conj()
    }

    fn wls_cell(a: &f64, w: &f64, b: &f64) -> f64 {
        a * w * b
    }

    fn wls_rhs(a: &f64, w: &f64, v: &f64) -> f64 {
        a * w * v
    }

    fn gain_add(block: &mut SquareMat<4>, row: usize, col: usize, t: &f64) {
        block.0[row][col] += t;
    }

    fn gain_get(block: &SquareMat<4>, row: usize, col: usize) -> f64 {
        block.0[row][col]
    }

    fn gain_set(block: &mut SquareMat<4>, row: usize, col: usize, t: &f64) {
        block.0[row][col] = *t;
    }

    fn rhs_add(rhs: &mut BlockVec<4>, slot: usize, v: &f64) {
        rhs.0[slot] += v;
    }

    fn rhs_get(rhs: &BlockVec<4>, slot: usize) -> f64 {
        rhs.0[slot]
    }
}

impl PhaseModel for Asymmetric {
    const LANES: usize = 3;
    const BLOCK_SIZE: usize = 12;

    type Real = RealVec3;
    type Complex = ComplexVec3;
    type RealTensor = RealMat3;
    type ComplexTensor = ComplexMat3;
    type GainBlock = SquareMat<12>;
    type RhsBlock = BlockVec<12>;

    fn real_scalar(x: f64) -> RealVec3 {
        RealVec3([x; 3])
    }

    fn balanced_complex(c: Complex64) -> ComplexVec3 {
        let rot = Self::nominal_angle_shift();
        let mut out = ComplexVec3::default();
        for p in 0..3 {
            out.0[p] = c * Complex64::from_polar(1.0, rot.0[p]);
        }
        out
    }

    fn nominal_angle_shift() -> RealVec3 {
        let third = 2.0 * std::f64::consts::PI / 3.0;
        RealVec3([0.0, -third, third])
    }

    fn real(c: &ComplexVec3) -> RealVec3 {
        RealVec3([c.0[0].re, c.0[1].re, c.0[2].re])
    }

    fn imag(c: &ComplexVec3) -> RealVec3 {
        RealVec3([c.0[0].im, c.0[1].im, c.0[2].im])
    }

    fn complex_from_parts(re: &RealVec3, im: &RealVec3) -> ComplexVec3 {
        let mut out = ComplexVec3::default();
        for p in 0..3 {
            out.0[p] = Complex64::new(re.0[p], im.0[p]);
        }
        out
    }

    fn cabs(c: &ComplexVec3) -> RealVec3 {
        RealVec3([c.0[0].norm(), c.0[1].norm(), c.0[2].norm()])
    }

    fn polar(magnitude: &RealVec3, angle: &RealVec3) -> ComplexVec3 {
        let mut out = ComplexVec3::default();
        for p in 0..3 {
            out.0[p] = Complex64::from_polar(magnitude.0[p], angle.0[p]);
        }
        out
    }

    fn rescale_magnitude(u: &ComplexVec3, magnitude: &RealVec3) -> ComplexVec3 {
        let mut out = *u;
        for p in 0..3 {
            out.0[p] *= magnitude.0[p] / u.0[p].norm();
        }
        out
    }

    fn mul_r(a: &RealVec3, b: &RealVec3) -> RealVec3 {
        RealVec3([a.0[0] * b.0[0], a.0[1] * b.0[1], a.0[2] * b.0[2]])
    }

    fn inv(v: &RealVec3) -> RealVec3 {
        RealVec3([1.0 / v.0[0], 1.0 / v.0[1], 1.0 / v.0[2]])
    }

    fn max_val(v: &RealVec3) -> f64 {
        v.0[0].max(v.0[1]).max(v.0[2])
    }

    fn lane_mean(v: &RealVec3) -> f64 {
        (v.0[0] + v.0[1] + v.0[2]) / 3.0
    }

    fn outer(a: &RealVec3, b: &RealVec3) -> RealMat3 {
        let mut out = RealMat3::default();
        for i in 0..3 {
            for j in 0..3 {
                out.0[i][j] = a.0[i] * b.0[j];
            }
        }
        out
    }

    fn mul_elem(a: &RealMat3, b: &RealMat3) -> RealMat3 {
        let mut out = RealMat3::default();
        for i in 0..3 {
            for j in 0..3 {
                out.0[i][j] = a.0[i][j] * b.0[i][j];
            }
        }
        out
    }

    fn sum_row(t: &RealMat3) -> RealVec3 {
        let mut out = RealVec3::default();
        for i in 0..3 {
            out.0[i] = t.0[i][0] + t.0[i][1] + t.0[i][2];
        }
        out
    }

    fn diag(v: &RealVec3) -> RealMat3 {
        let mut out = RealMat3::default();
        for i in 0..3 {
            out.0[i][i] = v.0[i];
        }
        out
    }

    fn transpose(t: &RealMat3) -> RealMat3 {
        let mut out = RealMat3::default();
        for i in 0..3 {
            for j in 0..3 {
                out.0[i][j] = t.0[j][i];
            }
        }
        out
    }

    fn tensor_real(y: &ComplexMat3) -> RealMat3 {
        let mut out = RealMat3::default();
        for i in 0..3 {
            for j in 0..3 {
                out.0[i][j] = y.0[i][j].re;
            }
        }
        out
    }

    fn tensor_imag(y: &ComplexMat3) -> RealMat3 {
        let mut out = RealMat3::default();
        for i in 0..3 {
            for j in 0..3 {
                out.0[i][j] = y.0[i][j].im;
            }
        }
        out
    }

    fn complex_matvec(y: &ComplexMat3, u: &ComplexVec3) -> ComplexVec3 {
        let mut out = ComplexVec3::default();
        for i in 0..3 {
            for j in 0..3 {
                out.0[i] += y.0[i][j] * u.0[j];
            }
        }
        out
    }

    fn mul_conj(a: &ComplexVec3, b: &ComplexVec3) -> ComplexVec3 {
        let mut out = ComplexVec3::default();
        for p in 0..3 {
            out.0[p] = a.0[p] * b.0[p].conj();
        }
        out
    }

    fn wls_cell(a: &RealMat3, w: &RealVec3, b: &RealMat3) -> RealMat3 {
        let mut out = RealMat3::default();
        for i in 0..3 {
            for j in 0..3 {
                let mut acc = 0.0;
                for lane in 0..3 {
                    acc += a.0[lane][i] * w.0[lane] * b.0[lane][j];
                }
                out.0[i][j] = acc;
            }
        }
        out
    }

    fn wls_rhs(a: &RealMat3, w: &RealVec3, v: &RealVec3) -> RealVec3 {
        let mut out = RealVec3::default();
        for i in 0..3 {
            let mut acc = 0.0;
            for lane in 0..3 {
                acc += a.0[lane][i] * w.0[lane] * v.0[lane];
            }
            out.0[i] = acc;
        }
        out
    }

    fn gain_add(block: &mut SquareMat<12>, row: usize, col: usize, t: &RealMat3) {
        for p in 0..3 {
            for q in 0..3 {
                block.0[row * 3 + p][col * 3 + q] += t.0[p][q];
            }
        }
    }

    fn gain_get(block: &SquareMat<12>, row: usize, col: usize) -> RealMat3 {
        let mut out = RealMat3::default();
        for p in 0..3 {
            for q in 0..3 {
                out.0[p][q] = block.0[row * 3 + p][col * 3 + q];
            }
        }
        out
    }

    fn gain_set(block: &mut SquareMat<12>, row: usize, col: usize, t: &RealMat3) {
        for p in 0..3 {
            for q in 0..3 {
                block.0[row * 3 + p][col * 3 + q] = t.0[p][q];
            }
        }
    }

    fn rhs_add(rhs: &mut BlockVec<12>, slot: usize, v: &RealVec3) {
        for p in 0..3 {
            rhs.0[slot * 3 + p] += v.0[p];
        }
    }

    fn rhs_get(rhs: &BlockVec<12>, slot: usize) -> RealVec3 {
        RealVec3([rhs.0[slot * 3], rhs.0[slot * 3 + 1], rhs.0[slot * 3 + 2]])
    }
}

/// `Re(ui) Re(uj) + Im(ui) Im(uj)`, i.e. `|ui||uj| cos(ti - tj)` per lane pair.
pub fn ui_uj_cos_ij<P: PhaseModel>(ui: &P::Complex, uj: &P::Complex) -> P::RealTensor {
    P::outer(&P::real(ui), &P::real(uj)) + P::outer(&P::imag(ui), &P::imag(uj))
}

/// `Im(ui) Re(uj) - Re(ui) Im(uj)`, i.e. `|ui||uj| sin(ti - tj)` per lane pair.
pub fn ui_uj_sin_ij<P: PhaseModel>(ui: &P::Complex, uj: &P::Complex) -> P::RealTensor {
    P::outer(&P::imag(ui), &P::real(uj)) - P::outer(&P::real(ui), &P::imag(uj))
}

/// Active-power contribution of an admittance term:
/// `Re(y) . cos_part + Im(y) . sin_part` without transcendentals.
pub fn g_cos_plus_b_sin<P: PhaseModel>(
    y: &P::ComplexTensor,
    ui: &P::Complex,
    uj: &P::Complex,
) -> P::RealTensor {
    P::mul_elem(&P::tensor_real(y), &ui_uj_cos_ij::<P>(ui, uj))
        + P::mul_elem(&P::tensor_imag(y), &ui_uj_sin_ij::<P>(ui, uj))
}

/// Reactive-power contribution of an admittance term:
/// `Re(y) . sin_part - Im(y) . cos_part` without transcendentals.
pub fn g_sin_minus_b_cos<P: PhaseModel>(
    y: &P::ComplexTensor,
    ui: &P::Complex,
    uj: &P::Complex,
) -> P::RealTensor {
    P::mul_elem(&P::tensor_real(y), &ui_uj_sin_ij::<P>(ui, uj))
        - P::mul_elem(&P::tensor_imag(y), &ui_uj_cos_ij::<P>(ui, uj))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combinators_match_closed_form() {
        // gc = vi vj (G cos(ti - tj) + B sin(ti - tj)), checked against the
        // transcendental formula the combinators deliberately avoid.
        let y = Complex64::new(1.2, -8.5);
        let (vi, ti) = (1.03, 0.12);
        let (vj, tj) = (0.97, -0.04);
        let ui = Complex64::from_polar(vi, ti);
        let uj = Complex64::from_polar(vj, tj);

        let gc = g_cos_plus_b_sin::<Symmetric>(&y, &ui, &uj);
        let gs = g_sin_minus_b_cos::<Symmetric>(&y, &ui, &uj);

        let dt = ti - tj;
        let gc_ref = vi * vj * (y.re * dt.cos() + y.im * dt.sin());
        let gs_ref = vi * vj * (y.re * dt.sin() - y.im * dt.cos());

        assert!((gc - gc_ref).abs() < 1e-14, "gc {} vs {}", gc, gc_ref);
        assert!((gs - gs_ref).abs() < 1e-14, "gs {} vs {}", gs, gs_ref);
    }

    #[test]
    fn test_asym_combinators_match_scalar_per_phase() {
        // Balanced voltages with a diagonal admittance tensor must reproduce
        // the scalar result on every phase.
        let y = Complex64::new(0.9, -9.9);
        let ui_s = Complex64::from_polar(1.01, 0.05);
        let uj_s = Complex64::from_polar(0.99, -0.02);

        let y3 = ComplexMat3::balanced_diagonal(y);
        let ui3 = Asymmetric::balanced_complex(ui_s);
        let uj3 = Asymmetric::balanced_complex(uj_s);

        let gc_s = g_cos_plus_b_sin::<Symmetric>(&y, &ui_s, &uj_s);
        let gc_3 = g_cos_plus_b_sin::<Asymmetric>(&y3, &ui3, &uj3);
        let p3 = Asymmetric::sum_row(&gc_3);

        for p in 0..3 {
            assert!(
                (p3.0[p] - gc_s).abs() < 1e-12,
                "phase {} gc {} vs scalar {}",
                p,
                p3.0[p],
                gc_s
            );
        }
    }

    #[test]
    fn test_wls_cell_is_weighted_gram() {
        let a = RealMat3([[1.0, 2.0, 0.0], [0.0, 1.0, -1.0], [2.0, 0.0, 1.0]]);
        let b = RealMat3([[0.5, 0.0, 1.0], [1.0, 1.0, 0.0], [0.0, 2.0, 1.0]]);
        let w = RealVec3([2.0, 3.0, 0.5]);

        let cell = Asymmetric::wls_cell(&a, &w, &b);
        for i in 0..3 {
            for j in 0..3 {
                let mut expected = 0.0;
                for lane in 0..3 {
                    expected += a.0[lane][i] * w.0[lane] * b.0[lane][j];
                }
                assert!((cell.0[i][j] - expected).abs() < 1e-14);
            }
        }
    }

    #[test]
    fn test_balanced_complex_rotation() {
        let u = Asymmetric::balanced_complex(Complex64::new(1.0, 0.0));
        let third = 2.0 * std::f64::consts::PI / 3.0;
        assert!((u.0[0] - Complex64::new(1.0, 0.0)).norm() < 1e-14);
        assert!((u.0[1] - Complex64::from_polar(1.0, -third)).norm() < 1e-14);
        assert!((u.0[2] - Complex64::from_polar(1.0, third)).norm() < 1e-14);

        // polar over the nominal shift agrees with the broadcast.
        let v = Asymmetric::real_scalar(1.0);
        let angles = Asymmetric::nominal_angle_shift();
        let u2 = Asymmetric::polar(&v, &angles);
        for p in 0..3 {
            assert!((u.0[p] - u2.0[p]).norm() < 1e-14);
        }
    }

    #[test]
    fn test_block_dimensions() {
        assert_eq!(Symmetric::LANES, 1);
        assert_eq!(Symmetric::BLOCK_SIZE, 4);
        assert_eq!(Asymmetric::LANES, 3);
        assert_eq!(Asymmetric::BLOCK_SIZE, 12);
    }

    #[test]
    fn test_gain_block_slot_layout() {
        let mut block = SquareMat::<12>::zero();
        let t = RealMat3([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        Asymmetric::gain_add(&mut block, SLOT_V, SLOT_PHI_P, &t);
        // Slot (1, 2) occupies scalar rows 3..6, cols 6..9.
        assert_eq!(block.0[3][6], 1.0);
        assert_eq!(block.0[5][8], 9.0);
        let back = Asymmetric::gain_get(&block, SLOT_V, SLOT_PHI_P);
        assert_eq!(back, t);
    }

    #[test]
    fn test_sum_row_and_diag() {
        let t = RealMat3([[1.0, 2.0, 3.0], [0.0, -1.0, 1.0], [2.0, 2.0, 2.0]]);
        let rows = Asymmetric::sum_row(&t);
        assert_eq!(rows.0, [6.0, 0.0, 6.0]);

        let d = Asymmetric::diag(&rows);
        assert_eq!(d.0[0][0], 6.0);
        assert_eq!(d.0[0][1], 0.0);
        assert_eq!(d.0[2][2], 6.0);
    }
}
