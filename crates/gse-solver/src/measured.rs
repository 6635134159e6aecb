//! Typed access to the measurement set of one estimation scenario.
//!
//! [`StateEstimationInput`] is the raw per-scenario data: optional sensors
//! per bus (voltage, injection) and per branch/shunt (power flows), with
//! variances. [`MeasuredValues`] validates it against the topology once per
//! solve and answers the queries the assembly loop needs, including the
//! initial angle seed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::PhaseModel;
use crate::ybus::Topology;

/// Errors from measurement validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeasurementError {
    #[error("{kind} measurement count {got} does not match topology ({expected})")]
    SizeMismatch {
        kind: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("non-positive {kind} variance on {entity} {idx}")]
    InvalidVariance {
        kind: &'static str,
        entity: &'static str,
        idx: usize,
    },
}

/// Voltage sensor at a bus: magnitude, optional phase angle, variance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct VoltageMeasurement<P: PhaseModel> {
    pub magnitude: P::Real,
    /// Present only for phasor-measurement devices.
    pub angle: Option<P::Real>,
    pub variance: f64,
}

/// Complex power sensor with separate active/reactive variances (per phase
/// in asymmetric mode).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PowerMeasurement<P: PhaseModel> {
    pub value: P::Complex,
    pub p_variance: P::Real,
    pub q_variance: P::Real,
}

impl<P: PhaseModel> PowerMeasurement<P> {
    /// Scalar-variance convenience constructor.
    pub fn with_variance(value: P::Complex, p_variance: f64, q_variance: f64) -> Self {
        Self {
            value,
            p_variance: P::real_scalar(p_variance),
            q_variance: P::real_scalar(q_variance),
        }
    }
}

/// All sensors of one estimation scenario.
///
/// Vectors are indexed by bus, branch, and shunt respectively; `None`
/// means no sensor at that location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StateEstimationInput<P: PhaseModel> {
    pub voltage: Vec<Option<VoltageMeasurement<P>>>,
    pub bus_injection: Vec<Option<PowerMeasurement<P>>>,
    pub branch_from_power: Vec<Option<PowerMeasurement<P>>>,
    pub branch_to_power: Vec<Option<PowerMeasurement<P>>>,
    pub shunt_power: Vec<Option<PowerMeasurement<P>>>,
}

impl<P: PhaseModel> StateEstimationInput<P> {
    pub fn new(n_bus: usize, n_branch: usize, n_shunt: usize) -> Self {
        Self {
            voltage: vec![None; n_bus],
            bus_injection: vec![None; n_bus],
            branch_from_power: vec![None; n_branch],
            branch_to_power: vec![None; n_branch],
            shunt_power: vec![None; n_shunt],
        }
    }

    /// Total number of sensors in the scenario.
    pub fn measurement_count(&self) -> usize {
        self.voltage.iter().filter(|m| m.is_some()).count()
            + self.bus_injection.iter().filter(|m| m.is_some()).count()
            + self.branch_from_power.iter().filter(|m| m.is_some()).count()
            + self.branch_to_power.iter().filter(|m| m.is_some()).count()
            + self.shunt_power.iter().filter(|m| m.is_some()).count()
    }
}

/// Validated measurement view used by the assembly loop.
#[derive(Debug)]
pub struct MeasuredValues<'a, P: PhaseModel> {
    input: &'a StateEstimationInput<P>,
    mean_angle_shift: P::Real,
    has_angle: bool,
}

impl<'a, P: PhaseModel> MeasuredValues<'a, P> {
    pub fn new(
        topo: &Topology,
        input: &'a StateEstimationInput<P>,
    ) -> Result<Self, MeasurementError> {
        let checks: [(&'static str, usize, usize); 5] = [
            ("voltage", input.voltage.len(), topo.n_bus),
            ("bus injection", input.bus_injection.len(), topo.n_bus),
            (
                "branch from power",
                input.branch_from_power.len(),
                topo.branch_bus.len(),
            ),
            (
                "branch to power",
                input.branch_to_power.len(),
                topo.branch_bus.len(),
            ),
            ("shunt power", input.shunt_power.len(), topo.shunt_bus.len()),
        ];
        for (kind, got, expected) in checks {
            if got != expected {
                return Err(MeasurementError::SizeMismatch {
                    kind,
                    got,
                    expected,
                });
            }
        }

        for (bus, sensor) in input.voltage.iter().enumerate() {
            if let Some(v) = sensor {
                if !(v.variance > 0.0) {
                    return Err(MeasurementError::InvalidVariance {
                        kind: "voltage",
                        entity: "bus",
                        idx: bus,
                    });
                }
            }
        }
        let power_sets: [(&'static str, &[Option<PowerMeasurement<P>>]); 4] = [
            ("bus", &input.bus_injection),
            ("branch", &input.branch_from_power),
            ("branch", &input.branch_to_power),
            ("shunt", &input.shunt_power),
        ];
        for (entity, sensors) in power_sets {
            for (idx, sensor) in sensors.iter().enumerate() {
                if let Some(m) = sensor {
                    // All lanes positive iff the largest negated lane is negative.
                    if !(P::max_val(&-m.p_variance) < 0.0) {
                        return Err(MeasurementError::InvalidVariance {
                            kind: "active power",
                            entity,
                            idx,
                        });
                    }
                    if !(P::max_val(&-m.q_variance) < 0.0) {
                        return Err(MeasurementError::InvalidVariance {
                            kind: "reactive power",
                            entity,
                            idx,
                        });
                    }
                }
            }
        }

        // Angle seed: nominal rotation, offset by the mean deviation of any
        // phasor measurements from their bus's nominal angle.
        let nominal = P::nominal_angle_shift();
        let mut deviation_sum = 0.0;
        let mut deviation_count = 0usize;
        for (bus, sensor) in input.voltage.iter().enumerate() {
            if let Some(VoltageMeasurement {
                angle: Some(angle), ..
            }) = sensor
            {
                let shift = P::real_scalar(topo.phase_shift[bus]);
                deviation_sum += P::lane_mean(&(*angle - nominal - shift));
                deviation_count += 1;
            }
        }
        let mean_offset = if deviation_count > 0 {
            deviation_sum / deviation_count as f64
        } else {
            0.0
        };

        Ok(Self {
            input,
            mean_angle_shift: nominal + P::real_scalar(mean_offset),
            has_angle: deviation_count > 0,
        })
    }

    pub fn has_voltage(&self, bus: usize) -> bool {
        self.input.voltage[bus].is_some()
    }

    pub fn voltage_measurement(&self, bus: usize) -> Option<&VoltageMeasurement<P>> {
        self.input.voltage[bus].as_ref()
    }

    pub fn voltage_var(&self, bus: usize) -> f64 {
        self.input.voltage[bus]
            .as_ref()
            .map(|v| v.variance)
            .unwrap_or(f64::INFINITY)
    }

    /// Measured voltage phasors aligned to the current angle estimate.
    ///
    /// Magnitude-only sensors inject their magnitude at the present angle
    /// of the iterate; phasor sensors stand on their own measured angle.
    pub fn voltage(&self, current_u: &[P::Complex]) -> Vec<Option<P::Complex>> {
        self.input
            .voltage
            .iter()
            .zip(current_u)
            .map(|(sensor, u)| {
                sensor.as_ref().map(|v| match &v.angle {
                    Some(angle) => P::polar(&v.magnitude, angle),
                    None => P::rescale_magnitude(u, &v.magnitude),
                })
            })
            .collect()
    }

    pub fn has_bus_injection(&self, bus: usize) -> bool {
        self.input.bus_injection[bus].is_some()
    }

    pub fn bus_injection(&self, bus: usize) -> Option<&PowerMeasurement<P>> {
        self.input.bus_injection[bus].as_ref()
    }

    pub fn has_branch_from(&self, obj: usize) -> bool {
        self.input.branch_from_power[obj].is_some()
    }

    pub fn branch_from_power(&self, obj: usize) -> Option<&PowerMeasurement<P>> {
        self.input.branch_from_power[obj].as_ref()
    }

    pub fn has_branch_to(&self, obj: usize) -> bool {
        self.input.branch_to_power[obj].is_some()
    }

    pub fn branch_to_power(&self, obj: usize) -> Option<&PowerMeasurement<P>> {
        self.input.branch_to_power[obj].as_ref()
    }

    pub fn has_shunt(&self, obj: usize) -> bool {
        self.input.shunt_power[obj].is_some()
    }

    pub fn shunt_power(&self, obj: usize) -> Option<&PowerMeasurement<P>> {
        self.input.shunt_power[obj].as_ref()
    }

    /// Initial angle seed, added to the per-bus phase shift of the topology.
    pub fn mean_angle_shift(&self) -> P::Real {
        self.mean_angle_shift
    }

    pub fn has_angle_measurement(&self) -> bool {
        self.has_angle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Symmetric;
    use num_complex::Complex64;

    fn topo2() -> Topology {
        Topology::new(2, vec![(0, 1)], vec![])
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let topo = topo2();
        let input: StateEstimationInput<Symmetric> = StateEstimationInput::new(3, 1, 0);
        let err = MeasuredValues::new(&topo, &input);
        assert!(matches!(err, Err(MeasurementError::SizeMismatch { .. })));
    }

    #[test]
    fn test_negative_variance_rejected() {
        let topo = topo2();
        let mut input: StateEstimationInput<Symmetric> = StateEstimationInput::new(2, 1, 0);
        input.bus_injection[0] = Some(PowerMeasurement::with_variance(
            Complex64::new(0.5, 0.1),
            -1e-3,
            1e-3,
        ));
        let err = MeasuredValues::new(&topo, &input);
        assert!(matches!(
            err,
            Err(MeasurementError::InvalidVariance {
                kind: "active power",
                ..
            })
        ));
    }

    #[test]
    fn test_mean_angle_shift_without_phasors_is_nominal() {
        let topo = topo2();
        let mut input: StateEstimationInput<Symmetric> = StateEstimationInput::new(2, 1, 0);
        input.voltage[0] = Some(VoltageMeasurement {
            magnitude: 1.0,
            angle: None,
            variance: 1e-4,
        });
        let measured = MeasuredValues::new(&topo, &input).unwrap();
        assert_eq!(measured.mean_angle_shift(), 0.0);
        assert!(!measured.has_angle_measurement());
    }

    #[test]
    fn test_mean_angle_shift_averages_phasors() {
        let topo = topo2();
        let mut input: StateEstimationInput<Symmetric> = StateEstimationInput::new(2, 1, 0);
        input.voltage[0] = Some(VoltageMeasurement {
            magnitude: 1.0,
            angle: Some(0.1),
            variance: 1e-4,
        });
        input.voltage[1] = Some(VoltageMeasurement {
            magnitude: 1.0,
            angle: Some(0.3),
            variance: 1e-4,
        });
        let measured = MeasuredValues::new(&topo, &input).unwrap();
        assert!((measured.mean_angle_shift() - 0.2).abs() < 1e-14);
        assert!(measured.has_angle_measurement());
    }

    #[test]
    fn test_measurement_count() {
        let mut input: StateEstimationInput<Symmetric> = StateEstimationInput::new(2, 1, 0);
        assert_eq!(input.measurement_count(), 0);
        input.voltage[0] = Some(VoltageMeasurement {
            magnitude: 1.0,
            angle: None,
            variance: 1e-4,
        });
        input.branch_to_power[0] = Some(PowerMeasurement::with_variance(
            Complex64::new(0.1, 0.0),
            1e-3,
            1e-3,
        ));
        assert_eq!(input.measurement_count(), 2);
    }

    #[test]
    fn test_voltage_alignment_keeps_current_angle() {
        let topo = topo2();
        let mut input: StateEstimationInput<Symmetric> = StateEstimationInput::new(2, 1, 0);
        input.voltage[1] = Some(VoltageMeasurement {
            magnitude: 1.05,
            angle: None,
            variance: 1e-4,
        });
        let measured = MeasuredValues::new(&topo, &input).unwrap();

        let current = vec![
            Complex64::from_polar(1.0, 0.0),
            Complex64::from_polar(0.98, -0.2),
        ];
        let aligned = measured.voltage(&current);
        assert!(aligned[0].is_none());
        let z = aligned[1].unwrap();
        assert!((z.norm() - 1.05).abs() < 1e-14);
        assert!((z.arg() - (-0.2)).abs() < 1e-14);
    }
}
