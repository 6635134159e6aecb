//! # Newton-Raphson State Estimation
//!
//! Reconstructs the complex bus voltages of a network from a noisy,
//! redundant measurement set by minimizing a weighted least-squares
//! objective under the AC power-flow equations. Bus injection measurements
//! enter as Hachtel-style soft equality constraints with Lagrange
//! multipliers, giving the augmented per-bus block structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  GAIN BLOCK (4x4 per bus pair, 12x12 in three-phase mode)    │
//! │                                                              │
//! │        ┌            ┐   unknowns per bus:                    │
//! │        │  G    Qᵀ   │     theta     voltage angle            │
//! │        │            │     v         relative magnitude       │
//! │        │  Q    R    │     phi_p     P-constraint multiplier  │
//! │        └            ┘     phi_q     Q-constraint multiplier  │
//! │                                                              │
//! │  G: measurement information (normal equations)               │
//! │  Q/Qᵀ: injection constraint Jacobian and its transpose       │
//! │  R: -variance for measured injections, -1 free multiplier    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each iteration assembles the gain matrix and right-hand side over the
//! LU-completed Y-bus pattern, refactorizes numerically (the symbolic
//! pattern and permutation storage are reused), solves, and applies the
//! update `theta += dtheta`, `v += v * (dv/v)`. The multiplicative
//! magnitude update keeps voltages positive and well scaled.
//!
//! All angle-difference trigonometry is evaluated from real/imaginary
//! products of the cached complex voltages; the only transcendental in the
//! loop is the per-bus `exp(i*theta)` refreshing the voltage cache.
//!
//! ## References
//!
//! - **Abur & Exposito (2004)**: "Power System State Estimation: Theory
//!   and Implementation", Marcel Dekker. WLS formulation and flow
//!   measurement Jacobians.
//! - **Gjelsvik, Aam & Holten (1985)**: "Hachtel's Augmented Matrix
//!   Method - A Rapid Method Improving Numerical Stability in Power System
//!   Static State Estimation", IEEE Trans. PAS-104(11).
//!   DOI: [10.1109/TPAS.1985.318963](https://doi.org/10.1109/TPAS.1985.318963)

use gse_core::{keys, CalculationInfo, GseError, Stopwatch};
use thiserror::Error;
use tracing::{debug, warn};

use crate::block::LuBlock;
use crate::lu::{LuError, SparseBlockLu};
use crate::measured::{MeasuredValues, MeasurementError, PowerMeasurement, StateEstimationInput};
use crate::observability::find_unobservable_bus;
use crate::tensor::{
    g_cos_plus_b_sin, g_sin_minus_b_cos, PhaseModel, SLOT_PHI_P, SLOT_PHI_Q, SLOT_THETA, SLOT_V,
};
use crate::ybus::{ElementType, YBus};

/// Weight of the virtual angle anchor added to every bus diagonal when no
/// phasor measurement pins the angle. Its residual is always zero, so it
/// removes the absolute-angle null space (the solution stays on the seed)
/// without biasing the estimate.
const ANGLE_ANCHOR_WEIGHT: f64 = 1.0;

/// Errors from the state estimation solver.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    #[error(
        "iteration diverged: deviation {max_dev:.3e} above tolerance {err_tol:.3e} \
         after {max_iter} iterations"
    )]
    IterationDiverge {
        max_iter: usize,
        max_dev: f64,
        err_tol: f64,
    },

    #[error("gain matrix is singular: {0}")]
    SingularMatrix(#[from] LuError),

    #[error("not observable: no measurement reaches the component of bus {bus}")]
    NotObservable { bus: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<MeasurementError> for SolverError {
    fn from(err: MeasurementError) -> Self {
        SolverError::InvalidInput(err.to_string())
    }
}

impl From<SolverError> for GseError {
    fn from(err: SolverError) -> Self {
        GseError::Solver(err.to_string())
    }
}

/// Solution of one estimation run.
#[derive(Debug, Clone)]
pub struct MathOutput<P: PhaseModel> {
    /// Estimated complex voltage per bus.
    pub u: Vec<P::Complex>,
    /// Complex power injection per bus implied by the estimate.
    pub bus_injection: Vec<P::Complex>,
}

/// The 2x2-of-tensors Jacobian of one power-pair measurement with respect
/// to the `(dtheta, dv/v)` unknowns of one bus.
#[derive(Debug, Clone, Copy)]
struct FlowJacobian<P: PhaseModel> {
    dp_dt: P::RealTensor,
    dp_dv: P::RealTensor,
    dq_dt: P::RealTensor,
    dq_dv: P::RealTensor,
}

impl<P: PhaseModel> FlowJacobian<P> {
    /// Jacobian with respect to the far bus of an `ij` admittance term.
    fn far_side(gs_ij: P::RealTensor, gc_ij: P::RealTensor) -> Self {
        Self {
            dp_dt: gs_ij,
            dp_dv: gc_ij,
            dq_dt: -gc_ij,
            dq_dv: gs_ij,
        }
    }

    /// Jacobian with respect to the measurement's own bus: the `ii`
    /// template plus the diagonal correction for the dependence of the
    /// calculated powers on `u_i` itself.
    fn own_side(
        gs_ii: P::RealTensor,
        gc_ii: P::RealTensor,
        calc_p: P::Real,
        calc_q: P::Real,
    ) -> Self {
        Self {
            dp_dt: gs_ii - P::diag(&calc_q),
            dp_dv: gc_ii + P::diag(&calc_p),
            dq_dt: -gc_ii + P::diag(&calc_p),
            dq_dv: gs_ii + P::diag(&calc_q),
        }
    }
}

/// `G += F1^T W F2`, `eta += F1^T W (z - f(x))` for one power sensor.
fn multiply_add_jacobian_blocks<P: PhaseModel>(
    block: &mut P::GainBlock,
    rhs: &mut P::RhsBlock,
    block_1: &FlowJacobian<P>,
    block_2: &FlowJacobian<P>,
    sensor: &PowerMeasurement<P>,
    calc_p: P::Real,
    calc_q: P::Real,
) {
    let w_p = P::inv(&sensor.p_variance);
    let w_q = P::inv(&sensor.q_variance);
    let del_p = P::real(&sensor.value) - calc_p;
    let del_q = P::imag(&sensor.value) - calc_q;

    let cell = |a: &P::RealTensor, b: &P::RealTensor, c: &P::RealTensor, d: &P::RealTensor| {
        P::wls_cell(a, &w_p, b) + P::wls_cell(c, &w_q, d)
    };
    P::gain_add(
        block,
        SLOT_THETA,
        SLOT_THETA,
        &cell(&block_1.dp_dt, &block_2.dp_dt, &block_1.dq_dt, &block_2.dq_dt),
    );
    P::gain_add(
        block,
        SLOT_THETA,
        SLOT_V,
        &cell(&block_1.dp_dt, &block_2.dp_dv, &block_1.dq_dt, &block_2.dq_dv),
    );
    P::gain_add(
        block,
        SLOT_V,
        SLOT_THETA,
        &cell(&block_1.dp_dv, &block_2.dp_dt, &block_1.dq_dv, &block_2.dq_dt),
    );
    P::gain_add(
        block,
        SLOT_V,
        SLOT_V,
        &cell(&block_1.dp_dv, &block_2.dp_dv, &block_1.dq_dv, &block_2.dq_dv),
    );

    P::rhs_add(
        rhs,
        SLOT_THETA,
        &(P::wls_rhs(&block_1.dp_dt, &w_p, &del_p) + P::wls_rhs(&block_1.dq_dt, &w_q, &del_q)),
    );
    P::rhs_add(
        rhs,
        SLOT_V,
        &(P::wls_rhs(&block_1.dp_dv, &w_p, &del_p) + P::wls_rhs(&block_1.dq_dv, &w_q, &del_q)),
    );
}

/// Write a constraint Jacobian into the `Q` rows of a gain block.
fn add_constraint_jacobian<P: PhaseModel>(block: &mut P::GainBlock, jac: &FlowJacobian<P>) {
    P::gain_add(block, SLOT_PHI_P, SLOT_THETA, &jac.dp_dt);
    P::gain_add(block, SLOT_PHI_P, SLOT_V, &jac.dp_dv);
    P::gain_add(block, SLOT_PHI_Q, SLOT_THETA, &jac.dq_dt);
    P::gain_add(block, SLOT_PHI_Q, SLOT_V, &jac.dq_dv);
}

/// Newton-Raphson state estimation solver.
///
/// Owns all mutable per-solve buffers (gain data, RHS/unknown vector,
/// voltage iterate, block permutation), allocated once at construction
/// from the Y-bus structure and reused across iterations and runs. A
/// solver instance is exclusive to one solve at a time; run independent
/// instances for parallel scenarios.
#[derive(Debug)]
pub struct NewtonRaphsonSeSolver<P: PhaseModel> {
    n_bus: usize,
    data_gain: Vec<P::GainBlock>,
    del_x_rhs: Vec<P::RhsBlock>,
    x_theta: Vec<P::Real>,
    x_v: Vec<P::Real>,
    sparse_solver: SparseBlockLu<P::GainBlock>,
    perm: Vec<usize>,
}

impl<P: PhaseModel> NewtonRaphsonSeSolver<P> {
    pub fn new(y_bus: &YBus<P>) -> Self {
        let sparse_solver = SparseBlockLu::new(
            y_bus.shared_row_indptr_lu(),
            y_bus.shared_col_indices_lu(),
            y_bus.shared_diag_lu(),
        );
        let perm_len = sparse_solver.perm_len();
        Self {
            n_bus: y_bus.n_bus(),
            data_gain: vec![P::GainBlock::zero(); y_bus.nnz_lu()],
            del_x_rhs: vec![P::RhsBlock::default(); y_bus.n_bus()],
            x_theta: vec![P::Real::default(); y_bus.n_bus()],
            x_v: vec![P::Real::default(); y_bus.n_bus()],
            sparse_solver,
            perm: vec![0; perm_len],
        }
    }

    /// Run the estimation until the voltage iterate moves less than
    /// `err_tol` between iterations, or fail after `max_iter` iterations.
    ///
    /// Phase timings and the observed iteration count are reported into
    /// `info`; the iteration count merges by maximum so a batch driver
    /// sees the worst case.
    pub fn run_state_estimation(
        &mut self,
        y_bus: &YBus<P>,
        input: &StateEstimationInput<P>,
        err_tol: f64,
        max_iter: usize,
        info: &mut CalculationInfo,
    ) -> Result<MathOutput<P>, SolverError> {
        if !(err_tol > 0.0) {
            return Err(SolverError::InvalidInput(format!(
                "error tolerance must be positive, got {err_tol}"
            )));
        }
        if max_iter < 1 {
            return Err(SolverError::InvalidInput(
                "maximum iteration count must be at least 1".into(),
            ));
        }
        if y_bus.n_bus() != self.n_bus || y_bus.nnz_lu() != self.data_gain.len() {
            return Err(SolverError::InvalidInput(
                "Y-bus structure does not match the solver's buffers".into(),
            ));
        }

        let mut total = Stopwatch::start();
        let mut sw = Stopwatch::start();

        let measured = MeasuredValues::new(y_bus.topology(), input)?;
        if let Some(bus) = find_unobservable_bus(y_bus, &measured) {
            return Err(SolverError::NotObservable { bus });
        }
        info.accumulate(keys::PREPROCESS_MEASUREMENTS, sw.lap());

        // Flat magnitude start on the seeded angle profile.
        let topo = y_bus.topology();
        let mean_angle_shift = measured.mean_angle_shift();
        let mut u = vec![P::Complex::default(); self.n_bus];
        for bus in 0..self.n_bus {
            self.x_v[bus] = P::real_scalar(1.0);
            self.x_theta[bus] = mean_angle_shift + P::real_scalar(topo.phase_shift[bus]);
            u[bus] = P::polar(&self.x_v[bus], &self.x_theta[bus]);
        }
        info.accumulate(keys::INITIALIZE_VOLTAGES, sw.lap());

        let mut max_dev = f64::MAX;
        let mut num_iter = 0usize;
        while max_dev > err_tol || num_iter == 0 {
            if num_iter == max_iter {
                warn!(max_iter, max_dev, err_tol, "state estimation diverged");
                info.observe_max(keys::MAX_ITERATIONS, num_iter as f64);
                return Err(SolverError::IterationDiverge {
                    max_iter,
                    max_dev,
                    err_tol,
                });
            }
            num_iter += 1;

            self.prepare_matrix_and_rhs(y_bus, &measured, &u);
            self.sparse_solver
                .prefactorize(&mut self.data_gain, &mut self.perm)?;
            info.accumulate(keys::PREPARE_LHS_RHS, sw.lap());

            self.sparse_solver.solve_with_prefactorized_matrix(
                &self.data_gain,
                &self.perm,
                &mut self.del_x_rhs,
            );
            info.accumulate(keys::SOLVE_SPARSE_LINEAR, sw.lap());

            max_dev = self.iterate_unknown(&mut u);
            info.accumulate(keys::ITERATE_UNKNOWN, sw.lap());
            debug!(iteration = num_iter, max_dev, "newton-raphson step");
        }

        let output = MathOutput {
            bus_injection: y_bus.calculate_injection(&u),
            u,
        };
        info.accumulate(keys::CALCULATE_RESULT, sw.lap());
        info.accumulate(keys::MATH_SOLVER, total.lap());
        info.observe_max(keys::MAX_ITERATIONS, num_iter as f64);
        Ok(output)
    }

    /// Assemble the gain matrix and right-hand side for the current iterate.
    fn prepare_matrix_and_rhs(
        &mut self,
        y_bus: &YBus<P>,
        measured: &MeasuredValues<P>,
        u: &[P::Complex],
    ) {
        let indptr = y_bus.row_indptr_lu();
        let col_indices = y_bus.col_indices_lu();
        let map = y_bus.map_lu_y_bus();
        let branch_bus = &y_bus.topology().branch_bus;
        let measured_u = measured.voltage(u);

        // Clear every block and residual once; fill-in entries stay zero so
        // the factorization can write into them.
        for block in &mut self.data_gain {
            *block = P::GainBlock::zero();
        }
        for rhs in &mut self.del_x_rhs {
            *rhs = P::RhsBlock::default();
        }

        for row in 0..self.n_bus {
            let ui = &u[row];
            let injection = measured.bus_injection(row);

            // Running sums of the full calculated injection of this row,
            // needed by the diagonal constraint Jacobian.
            let mut inj_p = P::Real::default();
            let mut inj_q = P::Real::default();
            let mut diag_gc = P::RealTensor::default();
            let mut diag_gs = P::RealTensor::default();

            for lu_idx in indptr[row]..indptr[row + 1] {
                let col = col_indices[lu_idx];
                let Some(data_idx) = map[lu_idx] else {
                    continue;
                };
                let uj = &u[col];

                if row == col {
                    self.add_voltage_and_anchor(lu_idx, row, measured, &measured_u);
                }

                // Branch/shunt flow measurements contributing at this entry.
                for element in y_bus.entry_elements(data_idx) {
                    let obj = element.idx;
                    let (y_ii, y_ij, own_bus, far_bus, sensor) = match element.element_type {
                        ElementType::Shunt => {
                            let Some(sensor) = measured.shunt_power(obj) else {
                                continue;
                            };
                            let y_ii = &y_bus.shunt_param()[obj].yff;
                            (y_ii, None, row, row, sensor)
                        }
                        ElementType::Bff | ElementType::Bft => {
                            let Some(sensor) = measured.branch_from_power(obj) else {
                                continue;
                            };
                            let (f, t) = branch_bus[obj];
                            let param = &y_bus.branch_param()[obj];
                            (&param.yff, Some(&param.yft), f, t, sensor)
                        }
                        ElementType::Btt | ElementType::Btf => {
                            let Some(sensor) = measured.branch_to_power(obj) else {
                                continue;
                            };
                            let (f, t) = branch_bus[obj];
                            let param = &y_bus.branch_param()[obj];
                            (&param.ytt, Some(&param.ytf), t, f, sensor)
                        }
                    };

                    let u_own = &u[own_bus];
                    let gc_ii = g_cos_plus_b_sin::<P>(y_ii, u_own, u_own);
                    let gs_ii = g_sin_minus_b_cos::<P>(y_ii, u_own, u_own);

                    let (calc_p, calc_q, gc_ij, gs_ij) = match y_ij {
                        Some(y_ij) => {
                            let u_far = &u[far_bus];
                            let gc_ij = g_cos_plus_b_sin::<P>(y_ij, u_own, u_far);
                            let gs_ij = g_sin_minus_b_cos::<P>(y_ij, u_own, u_far);
                            (
                                P::sum_row(&(gc_ii + gc_ij)),
                                P::sum_row(&(gs_ii + gs_ij)),
                                gc_ij,
                                gs_ij,
                            )
                        }
                        None => (
                            P::sum_row(&gc_ii),
                            P::sum_row(&gs_ii),
                            P::RealTensor::default(),
                            P::RealTensor::default(),
                        ),
                    };

                    let block_own = FlowJacobian::own_side(gs_ii, gc_ii, calc_p, calc_q);
                    // On the diagonal both factors are the own-bus Jacobian;
                    // off the diagonal the column side is the far bus.
                    let block_col = if row == col {
                        block_own
                    } else {
                        FlowJacobian::far_side(gs_ij, gc_ij)
                    };
                    multiply_add_jacobian_blocks(
                        &mut self.data_gain[lu_idx],
                        &mut self.del_x_rhs[row],
                        &block_own,
                        &block_col,
                        sensor,
                        calc_p,
                        calc_q,
                    );
                }

                // Injection measurement: constraint Jacobian and the
                // incrementally built residual tau = z - f(x).
                if injection.is_some() {
                    let y_rc = &y_bus.admittance()[data_idx];
                    let gc = g_cos_plus_b_sin::<P>(y_rc, ui, uj);
                    let gs = g_sin_minus_b_cos::<P>(y_rc, ui, uj);
                    let row_p = P::sum_row(&gc);
                    let row_q = P::sum_row(&gs);
                    P::rhs_add(&mut self.del_x_rhs[row], SLOT_PHI_P, &-row_p);
                    P::rhs_add(&mut self.del_x_rhs[row], SLOT_PHI_Q, &-row_q);
                    inj_p = inj_p + row_p;
                    inj_q = inj_q + row_q;

                    if row == col {
                        diag_gc = gc;
                        diag_gs = gs;
                    } else {
                        add_constraint_jacobian(
                            &mut self.data_gain[lu_idx],
                            &FlowJacobian::<P>::far_side(gs, gc),
                        );
                    }
                } else if row == col {
                    // Free multiplier: the unused Lagrange rows collapse to
                    // -phi = 0.
                    let minus_one = P::diag(&P::real_scalar(-1.0));
                    let block = &mut self.data_gain[lu_idx];
                    P::gain_add(block, SLOT_PHI_P, SLOT_PHI_P, &minus_one);
                    P::gain_add(block, SLOT_PHI_Q, SLOT_PHI_Q, &minus_one);
                }
            }

            // Diagonal injection terms need the full row sums.
            if let Some(m) = injection {
                let diag_idx = y_bus.diag_lu()[row];
                P::rhs_add(&mut self.del_x_rhs[row], SLOT_PHI_P, &P::real(&m.value));
                P::rhs_add(&mut self.del_x_rhs[row], SLOT_PHI_Q, &P::imag(&m.value));

                let block = &mut self.data_gain[diag_idx];
                // Soft constraint: R = -variance on the multiplier diagonal.
                P::gain_add(block, SLOT_PHI_P, SLOT_PHI_P, &P::diag(&-m.p_variance));
                P::gain_add(block, SLOT_PHI_Q, SLOT_PHI_Q, &P::diag(&-m.q_variance));
                add_constraint_jacobian(
                    block,
                    &FlowJacobian::<P>::own_side(diag_gs, diag_gc, inj_p, inj_q),
                );
            }
        }

        // Transpose pass: Q^T blocks mirror the Q blocks of the transpose
        // entry, with the (P,v)/(Q,theta) cross terms swapped and each
        // tensor transposed.
        let transpose_entry = y_bus.lu_transpose_entry();
        for lu_idx in 0..y_bus.nnz_lu() {
            if map[lu_idx].is_none() {
                continue;
            }
            let t_idx = transpose_entry[lu_idx];
            let q_pt = P::gain_get(&self.data_gain[t_idx], SLOT_PHI_P, SLOT_THETA);
            let q_pv = P::gain_get(&self.data_gain[t_idx], SLOT_PHI_P, SLOT_V);
            let q_qt = P::gain_get(&self.data_gain[t_idx], SLOT_PHI_Q, SLOT_THETA);
            let q_qv = P::gain_get(&self.data_gain[t_idx], SLOT_PHI_Q, SLOT_V);

            let block = &mut self.data_gain[lu_idx];
            P::gain_set(block, SLOT_THETA, SLOT_PHI_P, &P::transpose(&q_pt));
            P::gain_set(block, SLOT_THETA, SLOT_PHI_Q, &P::transpose(&q_qt));
            P::gain_set(block, SLOT_V, SLOT_PHI_P, &P::transpose(&q_pv));
            P::gain_set(block, SLOT_V, SLOT_PHI_Q, &P::transpose(&q_qv));
        }
    }

    /// Voltage measurement and angle handling on a diagonal block.
    ///
    /// Magnitude sensors weight the `(v, v)` slot with the chain-rule
    /// factor for the relative-magnitude unknown. The angle slot gets the
    /// phasor measurement when one exists, otherwise the zero-residual
    /// virtual anchor.
    fn add_voltage_and_anchor(
        &mut self,
        lu_idx: usize,
        bus: usize,
        measured: &MeasuredValues<P>,
        measured_u: &[Option<P::Complex>],
    ) {
        let block = &mut self.data_gain[lu_idx];
        let rhs = &mut self.del_x_rhs[bus];

        let Some(sensor) = measured.voltage_measurement(bus) else {
            P::gain_add(
                block,
                SLOT_THETA,
                SLOT_THETA,
                &P::diag(&P::real_scalar(ANGLE_ANCHOR_WEIGHT)),
            );
            return;
        };

        let w_v = P::real_scalar(1.0 / measured.voltage_var(bus));
        match &sensor.angle {
            Some(angle) => {
                P::gain_add(block, SLOT_THETA, SLOT_THETA, &P::diag(&w_v));
                let del_theta = *angle - self.x_theta[bus];
                P::rhs_add(rhs, SLOT_THETA, &P::mul_r(&w_v, &del_theta));
            }
            None => {
                P::gain_add(
                    block,
                    SLOT_THETA,
                    SLOT_THETA,
                    &P::diag(&P::real_scalar(ANGLE_ANCHOR_WEIGHT)),
                );
            }
        }

        if let Some(z_u) = &measured_u[bus] {
            let v = &self.x_v[bus];
            let del_v = P::cabs(z_u) - *v;
            let jac_v = P::mul_r(&w_v, &P::mul_r(v, v));
            P::gain_add(block, SLOT_V, SLOT_V, &P::diag(&jac_v));
            P::rhs_add(rhs, SLOT_V, &P::mul_r(&w_v, &P::mul_r(v, &del_v)));
        }
    }

    /// Apply the solved increments and refresh the complex voltage cache.
    ///
    /// Returns the largest per-bus voltage movement of this iteration.
    fn iterate_unknown(&mut self, u: &mut [P::Complex]) -> f64 {
        let mut max_dev = 0.0f64;
        for bus in 0..self.n_bus {
            let del_theta = P::rhs_get(&self.del_x_rhs[bus], SLOT_THETA);
            let del_v_rel = P::rhs_get(&self.del_x_rhs[bus], SLOT_V);
            self.x_theta[bus] = self.x_theta[bus] + del_theta;
            // The magnitude unknown is dv/v, so the update is multiplicative.
            self.x_v[bus] = self.x_v[bus] + P::mul_r(&self.x_v[bus], &del_v_rel);

            let u_new = P::polar(&self.x_v[bus], &self.x_theta[bus]);
            let dev = P::max_val(&P::cabs(&(u_new - u[bus])));
            max_dev = max_dev.max(dev);
            u[bus] = u_new;
        }
        max_dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measured::VoltageMeasurement;
    use crate::tensor::Symmetric;
    use crate::ybus::{BranchAdmittance, Topology};
    use num_complex::Complex64;
    use std::sync::Arc;

    fn two_bus() -> YBus<Symmetric> {
        let topo = Arc::new(Topology::new(2, vec![(0, 1)], vec![]));
        let branch = BranchAdmittance::from_impedance(0.01, 0.05, 0.0);
        YBus::new(topo, vec![branch], vec![]).unwrap()
    }

    fn voltage(mag: f64, var: f64) -> VoltageMeasurement<Symmetric> {
        VoltageMeasurement {
            magnitude: mag,
            angle: None,
            variance: var,
        }
    }

    #[test]
    fn test_invalid_tolerance_rejected() {
        let y = two_bus();
        let mut solver = NewtonRaphsonSeSolver::new(&y);
        let input = StateEstimationInput::new(2, 1, 0);
        let mut info = CalculationInfo::new();
        let err = solver.run_state_estimation(&y, &input, 0.0, 10, &mut info);
        assert!(matches!(err, Err(SolverError::InvalidInput(_))));
        let err = solver.run_state_estimation(&y, &input, 1e-8, 0, &mut info);
        assert!(matches!(err, Err(SolverError::InvalidInput(_))));
    }

    #[test]
    fn test_gain_transpose_invariant_and_fill_in() {
        // Star network so the LU pattern has genuine fill-in.
        let topo = Arc::new(Topology::new(4, vec![(0, 1), (0, 2), (0, 3)], vec![]));
        let branch = BranchAdmittance::from_impedance(0.01, 0.05, 0.0);
        let y = YBus::new(topo, vec![branch; 3], vec![]).unwrap();

        let mut input: StateEstimationInput<Symmetric> = StateEstimationInput::new(4, 3, 0);
        input.voltage[0] = Some(voltage(1.0, 1e-4));
        input.bus_injection[1] =
            Some(PowerMeasurement::with_variance(Complex64::new(0.2, 0.05), 1e-3, 1e-3));
        input.bus_injection[2] =
            Some(PowerMeasurement::with_variance(Complex64::new(-0.1, 0.0), 1e-3, 1e-3));
        input.bus_injection[3] =
            Some(PowerMeasurement::with_variance(Complex64::new(-0.1, -0.05), 1e-3, 1e-3));

        let measured = MeasuredValues::new(y.topology(), &input).unwrap();
        let mut solver = NewtonRaphsonSeSolver::new(&y);

        let shift = measured.mean_angle_shift();
        let u: Vec<Complex64> = (0..4).map(|_| Complex64::from_polar(1.0, shift)).collect();
        for bus in 0..4 {
            solver.x_v[bus] = 1.0;
            solver.x_theta[bus] = shift;
        }
        solver.prepare_matrix_and_rhs(&y, &measured, &u);

        let map = y.map_lu_y_bus();
        let transpose = y.lu_transpose_entry();
        for lu_idx in 0..y.nnz_lu() {
            match map[lu_idx] {
                None => {
                    // Fill-in entries must stay zero blocks after assembly.
                    for r in 0..4 {
                        for c in 0..4 {
                            assert_eq!(
                                solver.data_gain[lu_idx].0[r][c], 0.0,
                                "fill-in block not zero at entry {}",
                                lu_idx
                            );
                        }
                    }
                }
                Some(_) => {
                    // Q^T of this entry equals Q of the transpose entry.
                    let t = transpose[lu_idx];
                    for (qt_r, qt_c, q_r, q_c) in [
                        (SLOT_THETA, SLOT_PHI_P, SLOT_PHI_P, SLOT_THETA),
                        (SLOT_THETA, SLOT_PHI_Q, SLOT_PHI_Q, SLOT_THETA),
                        (SLOT_V, SLOT_PHI_P, SLOT_PHI_P, SLOT_V),
                        (SLOT_V, SLOT_PHI_Q, SLOT_PHI_Q, SLOT_V),
                    ] {
                        let qt = solver.data_gain[lu_idx].0[qt_r][qt_c];
                        let q = solver.data_gain[t].0[q_r][q_c];
                        assert!(
                            (qt - q).abs() < 1e-14,
                            "Q^T mismatch at entry {} ({}, {})",
                            lu_idx,
                            qt_r,
                            qt_c
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_free_multipliers_settle_to_zero() {
        let y = two_bus();
        let mut input: StateEstimationInput<Symmetric> = StateEstimationInput::new(2, 1, 0);
        input.voltage[0] = Some(voltage(1.0, 1e-4));
        input.voltage[1] = Some(voltage(1.0, 1e-4));

        // Assembly writes the free-multiplier diagonal directly: with no
        // injection measured at either bus, both R slots carry -1.
        let measured = MeasuredValues::new(y.topology(), &input).unwrap();
        let mut solver = NewtonRaphsonSeSolver::new(&y);
        for bus in 0..2 {
            solver.x_v[bus] = 1.0;
            solver.x_theta[bus] = 0.0;
        }
        let u = vec![Complex64::new(1.0, 0.0); 2];
        solver.prepare_matrix_and_rhs(&y, &measured, &u);
        for bus in 0..2 {
            let diag_idx = y.diag_lu()[bus];
            let block = &solver.data_gain[diag_idx];
            assert_eq!(block.0[SLOT_PHI_P][SLOT_PHI_P], -1.0);
            assert_eq!(block.0[SLOT_PHI_Q][SLOT_PHI_Q], -1.0);
            // The off-diagonal multiplier slots stay empty.
            assert_eq!(block.0[SLOT_PHI_P][SLOT_PHI_Q], 0.0);
            assert_eq!(block.0[SLOT_PHI_Q][SLOT_PHI_P], 0.0);
        }

        let mut info = CalculationInfo::new();
        solver
            .run_state_estimation(&y, &input, 1e-8, 20, &mut info)
            .unwrap();

        // No injection anywhere: both multiplier slots solved to zero.
        for bus in 0..2 {
            assert!(solver.del_x_rhs[bus].0[SLOT_PHI_P].abs() < 1e-12);
            assert!(solver.del_x_rhs[bus].0[SLOT_PHI_Q].abs() < 1e-12);
        }
    }

    #[test]
    fn test_iteration_count_reported() {
        let y = two_bus();
        let mut input: StateEstimationInput<Symmetric> = StateEstimationInput::new(2, 1, 0);
        input.voltage[0] = Some(voltage(1.02, 1e-4));
        input.voltage[1] = Some(voltage(0.98, 1e-4));

        let mut solver = NewtonRaphsonSeSolver::new(&y);
        let mut info = CalculationInfo::new();
        solver
            .run_state_estimation(&y, &input, 1e-8, 20, &mut info)
            .unwrap();
        let iterations = info.get(keys::MAX_ITERATIONS).unwrap();
        assert!(iterations >= 1.0);
        assert!(info.get(keys::MATH_SOLVER).is_some());
        assert!(info.get(keys::PREPARE_LHS_RHS).is_some());
    }
}
