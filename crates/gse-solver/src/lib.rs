//! # gse-solver: Newton-Raphson State Estimation
//!
//! The numerical engine of the GSE toolkit: a weighted-least-squares state
//! estimator over the AC power-flow equations, solved by Newton-Raphson
//! iteration on a block-sparse augmented gain system.
//!
//! The crate is organized leaves-first:
//!
//! - [`tensor`]: scalar vs. three-phase algebra behind one parametric
//!   interface ([`tensor::Symmetric`] / [`tensor::Asymmetric`])
//! - [`block`]: dense fixed-size block kernels
//! - [`lu`]: block-sparse LU with symbolic-pattern reuse
//! - [`ybus`]: admittance structure with the LU-completed sparsity pattern
//! - [`measured`]: typed measurement access and validation
//! - [`observability`]: measurement-coverage pre-check
//! - [`nrse`]: the Newton-Raphson estimation iterator
//! - [`batch`]: rayon-parallel driver over independent scenarios

pub mod batch;
pub mod block;
pub mod lu;
pub mod measured;
pub mod nrse;
pub mod observability;
pub mod tensor;
pub mod ybus;

pub use batch::{run_batch, BatchOutput};
pub use lu::{LuError, SparseBlockLu};
pub use measured::{
    MeasuredValues, MeasurementError, PowerMeasurement, StateEstimationInput, VoltageMeasurement,
};
pub use nrse::{MathOutput, NewtonRaphsonSeSolver, SolverError};
pub use tensor::{Asymmetric, PhaseModel, Symmetric};
pub use ybus::{
    BranchAdmittance, BranchFlow, ElementType, ShuntAdmittance, ShuntFlow, Topology, YBus,
    YBusError,
};
