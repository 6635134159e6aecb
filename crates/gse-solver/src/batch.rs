//! Parallel batch driver over independent estimation scenarios.
//!
//! A solver instance owns exclusive mutable state and must not be shared;
//! parallelism comes from running one instance per scenario against the
//! shared read-only Y-bus. Per-scenario calculation reports merge so the
//! batch observes accumulated timings and the worst-case iteration count.

use gse_core::CalculationInfo;
use rayon::prelude::*;

use crate::measured::StateEstimationInput;
use crate::nrse::{MathOutput, NewtonRaphsonSeSolver, SolverError};
use crate::tensor::PhaseModel;
use crate::ybus::YBus;

/// Outcome of a batch run: per-scenario results in input order plus the
/// merged calculation report.
#[derive(Debug)]
pub struct BatchOutput<P: PhaseModel> {
    pub results: Vec<Result<MathOutput<P>, SolverError>>,
    pub info: CalculationInfo,
}

/// Run every scenario through its own solver instance, in parallel.
pub fn run_batch<P: PhaseModel>(
    y_bus: &YBus<P>,
    scenarios: &[StateEstimationInput<P>],
    err_tol: f64,
    max_iter: usize,
) -> BatchOutput<P> {
    let per_scenario: Vec<(Result<MathOutput<P>, SolverError>, CalculationInfo)> = scenarios
        .par_iter()
        .map(|input| {
            let mut solver = NewtonRaphsonSeSolver::new(y_bus);
            let mut info = CalculationInfo::new();
            let result = solver.run_state_estimation(y_bus, input, err_tol, max_iter, &mut info);
            (result, info)
        })
        .collect();

    let mut info = CalculationInfo::new();
    let mut results = Vec::with_capacity(per_scenario.len());
    for (result, scenario_info) in per_scenario {
        info.merge(&scenario_info);
        results.push(result);
    }

    BatchOutput { results, info }
}
