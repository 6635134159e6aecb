//! Measurement-coverage check ahead of the iteration.
//!
//! A connected component of the bus graph that no sensor touches cannot be
//! estimated: its gain rows are structurally rank deficient and the
//! factorization would only report a bare singular pivot. Checking
//! coverage up front turns that into a targeted error naming an offending
//! bus. Rank sufficiency inside a covered component is still left to the
//! factorization.

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::Bfs;

use crate::measured::MeasuredValues;
use crate::tensor::PhaseModel;
use crate::ybus::YBus;

/// A bus whose connected component carries no measurement at all, if any.
pub fn find_unobservable_bus<P: PhaseModel>(
    y_bus: &YBus<P>,
    measured: &MeasuredValues<P>,
) -> Option<usize> {
    let topo = y_bus.topology();
    let n = topo.n_bus;

    // Sensors touch their own bus; flow sensors touch both branch terminals.
    let mut touched = vec![false; n];
    for bus in 0..n {
        if measured.has_voltage(bus) || measured.has_bus_injection(bus) {
            touched[bus] = true;
        }
    }
    for (obj, &(f, t)) in topo.branch_bus.iter().enumerate() {
        if measured.has_branch_from(obj) || measured.has_branch_to(obj) {
            touched[f] = true;
            touched[t] = true;
        }
    }
    for (obj, &bus) in topo.shunt_bus.iter().enumerate() {
        if measured.has_shunt(obj) {
            touched[bus] = true;
        }
    }

    let mut graph: UnGraph<(), ()> = UnGraph::with_capacity(n, topo.branch_bus.len());
    let nodes: Vec<NodeIndex> = (0..n).map(|_| graph.add_node(())).collect();
    for &(f, t) in &topo.branch_bus {
        graph.add_edge(nodes[f], nodes[t], ());
    }

    let mut visited = vec![false; n];
    for start in 0..n {
        if visited[start] {
            continue;
        }
        let mut component = Vec::new();
        let mut covered = false;
        let mut bfs = Bfs::new(&graph, nodes[start]);
        while let Some(node) = bfs.next(&graph) {
            let bus = node.index();
            visited[bus] = true;
            component.push(bus);
            covered |= touched[bus];
        }
        if !covered {
            return component.into_iter().min();
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measured::{PowerMeasurement, StateEstimationInput, VoltageMeasurement};
    use crate::tensor::Symmetric;
    use crate::ybus::{BranchAdmittance, Topology};
    use num_complex::Complex64;
    use std::sync::Arc;

    /// Buses 0-1 connected, bus 2 isolated.
    fn split_network() -> YBus<Symmetric> {
        let topo = Arc::new(Topology::new(3, vec![(0, 1)], vec![]));
        let branch = BranchAdmittance::from_impedance(0.01, 0.05, 0.0);
        YBus::new(topo, vec![branch], vec![]).unwrap()
    }

    #[test]
    fn test_isolated_unmeasured_bus_flagged() {
        let y = split_network();
        let mut input: StateEstimationInput<Symmetric> = StateEstimationInput::new(3, 1, 0);
        input.voltage[0] = Some(VoltageMeasurement {
            magnitude: 1.0,
            angle: None,
            variance: 1e-4,
        });
        let measured = MeasuredValues::new(y.topology(), &input).unwrap();

        assert_eq!(find_unobservable_bus(&y, &measured), Some(2));
    }

    #[test]
    fn test_empty_measurement_set_flagged() {
        let y = split_network();
        let input: StateEstimationInput<Symmetric> = StateEstimationInput::new(3, 1, 0);
        let measured = MeasuredValues::new(y.topology(), &input).unwrap();

        // Both components are uncovered; the first one found wins.
        assert_eq!(find_unobservable_bus(&y, &measured), Some(0));
    }

    #[test]
    fn test_flow_sensor_covers_both_terminals() {
        let y = split_network();
        let mut input: StateEstimationInput<Symmetric> = StateEstimationInput::new(3, 1, 0);
        input.branch_from_power[0] = Some(PowerMeasurement::with_variance(
            Complex64::new(0.4, 0.0),
            1e-3,
            1e-3,
        ));
        input.bus_injection[2] = Some(PowerMeasurement::with_variance(
            Complex64::new(0.0, 0.0),
            1e-3,
            1e-3,
        ));
        let measured = MeasuredValues::new(y.topology(), &input).unwrap();

        assert_eq!(find_unobservable_bus(&y, &measured), None);
    }
}
