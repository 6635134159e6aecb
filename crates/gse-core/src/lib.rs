//! # gse-core: State Estimation Toolkit Core
//!
//! Shared foundation for the GSE crates: a unified error type for API
//! boundaries and the calculation-info instrumentation that solvers use to
//! report phase timings and iteration counts.

pub mod error;
pub mod info;

pub use error::{GseError, GseResult};
pub use info::{keys, CalculationInfo, InfoKey, Stopwatch};
