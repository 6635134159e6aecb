//! Y-bus admittance view with an LU-completed sparsity pattern.
//!
//! Immutable per-solve view combining the network topology, per-element
//! admittances, and the sparse structure the gain matrix inherits:
//!
//! - the Y-bus CSR pattern itself (one entry per connected bus pair plus
//!   every diagonal), with a per-entry element list recording which
//!   branches/shunts contribute through which of their four admittance
//!   sub-matrices (`yff`, `yft`, `ytf`, `ytt`);
//! - the LU-completed pattern: the Y-bus pattern closed under the fill-in
//!   of a natural-order factorization, with a map back to Y-bus entries
//!   (`None` marks fill-in) and a transpose-entry map.
//!
//! The structure is computed once and shared read-only between solver
//! instances; only numerical block values change across iterations.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::sync::Arc;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use sprs::TriMat;
use thiserror::Error;

use crate::tensor::{Asymmetric, ComplexMat3, PhaseModel, Symmetric};

/// Errors from Y-bus construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum YBusError {
    #[error("network has no buses")]
    NoBuses,

    #[error("bus index {bus} out of range ({n_bus} buses)")]
    BusOutOfRange { bus: usize, n_bus: usize },

    #[error("{kind} count {got} does not match topology ({expected})")]
    SizeMismatch {
        kind: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("admittance pattern is structurally asymmetric")]
    AsymmetricPattern,
}

/// Structural description of the network: bus count, branch endpoints,
/// shunt connections, and the per-bus phase shift of the transformer chain
/// feeding each bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub n_bus: usize,
    /// `(from_bus, to_bus)` per branch.
    pub branch_bus: Vec<(usize, usize)>,
    /// Connection bus per shunt.
    pub shunt_bus: Vec<usize>,
    /// Accumulated phase shift per bus, radians.
    pub phase_shift: Vec<f64>,
}

impl Topology {
    pub fn new(n_bus: usize, branch_bus: Vec<(usize, usize)>, shunt_bus: Vec<usize>) -> Self {
        Self {
            n_bus,
            branch_bus,
            shunt_bus,
            phase_shift: vec![0.0; n_bus],
        }
    }

    fn validate(&self) -> Result<(), YBusError> {
        if self.n_bus == 0 {
            return Err(YBusError::NoBuses);
        }
        for &(f, t) in &self.branch_bus {
            for bus in [f, t] {
                if bus >= self.n_bus {
                    return Err(YBusError::BusOutOfRange {
                        bus,
                        n_bus: self.n_bus,
                    });
                }
            }
        }
        for &bus in &self.shunt_bus {
            if bus >= self.n_bus {
                return Err(YBusError::BusOutOfRange {
                    bus,
                    n_bus: self.n_bus,
                });
            }
        }
        if self.phase_shift.len() != self.n_bus {
            return Err(YBusError::SizeMismatch {
                kind: "phase shift",
                got: self.phase_shift.len(),
                expected: self.n_bus,
            });
        }
        Ok(())
    }
}

/// The four admittance sub-matrices of a branch pi-model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct BranchAdmittance<P: PhaseModel> {
    pub yff: P::ComplexTensor,
    pub yft: P::ComplexTensor,
    pub ytf: P::ComplexTensor,
    pub ytt: P::ComplexTensor,
}

impl BranchAdmittance<Symmetric> {
    /// Branch admittances from series impedance and total line charging,
    /// unit tap.
    pub fn from_impedance(r: f64, x: f64, b_charging: f64) -> Self {
        let y_series = Complex64::new(r, x).inv();
        let y_shunt_half = Complex64::new(0.0, b_charging / 2.0);
        Self {
            yff: y_series + y_shunt_half,
            yft: -y_series,
            ytf: -y_series,
            ytt: y_series + y_shunt_half,
        }
    }
}

impl BranchAdmittance<Asymmetric> {
    /// Balanced three-phase branch without mutual coupling.
    pub fn balanced(sym: &BranchAdmittance<Symmetric>) -> Self {
        Self {
            yff: ComplexMat3::balanced_diagonal(sym.yff),
            yft: ComplexMat3::balanced_diagonal(sym.yft),
            ytf: ComplexMat3::balanced_diagonal(sym.ytf),
            ytt: ComplexMat3::balanced_diagonal(sym.ytt),
        }
    }
}

/// Shunt admittance (single-terminal element, `yff` only).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ShuntAdmittance<P: PhaseModel> {
    pub yff: P::ComplexTensor,
}

impl ShuntAdmittance<Symmetric> {
    pub fn from_conductance(g: f64, b: f64) -> Self {
        Self {
            yff: Complex64::new(g, b),
        }
    }
}

impl ShuntAdmittance<Asymmetric> {
    pub fn balanced(sym: &ShuntAdmittance<Symmetric>) -> Self {
        Self {
            yff: ComplexMat3::balanced_diagonal(sym.yff),
        }
    }
}

/// Which admittance sub-matrix an element contributes through at a given
/// Y-bus entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    Shunt,
    Bff,
    Bft,
    Btf,
    Btt,
}

/// One contribution of a branch or shunt to a Y-bus entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YBusElement {
    /// Branch index for `Bff..Btt`, shunt index for `Shunt`.
    pub idx: usize,
    pub element_type: ElementType,
}

/// Power flow reconstructed on a branch from a voltage solution.
#[derive(Debug, Clone, Copy)]
pub struct BranchFlow<P: PhaseModel> {
    pub s_from: P::Complex,
    pub s_to: P::Complex,
    pub i_from: P::Complex,
    pub i_to: P::Complex,
}

/// Power drawn by a shunt from a voltage solution.
#[derive(Debug, Clone, Copy)]
pub struct ShuntFlow<P: PhaseModel> {
    pub s: P::Complex,
    pub i: P::Complex,
}

/// Immutable admittance structure shared by solver instances.
#[derive(Debug, Clone)]
pub struct YBus<P: PhaseModel> {
    topo: Arc<Topology>,
    branch_param: Vec<BranchAdmittance<P>>,
    shunt_param: Vec<ShuntAdmittance<P>>,

    // Y-bus pattern
    row_indptr: Vec<usize>,
    col_indices: Vec<usize>,
    admittance: Vec<P::ComplexTensor>,
    entry_indptr: Vec<usize>,
    elements: Vec<YBusElement>,

    // LU-completed pattern
    row_indptr_lu: Arc<Vec<usize>>,
    col_indices_lu: Arc<Vec<usize>>,
    diag_lu: Arc<Vec<usize>>,
    map_lu_y_bus: Vec<Option<usize>>,
    lu_transpose_entry: Vec<usize>,
}

impl<P: PhaseModel> YBus<P> {
    pub fn new(
        topo: Arc<Topology>,
        branch_param: Vec<BranchAdmittance<P>>,
        shunt_param: Vec<ShuntAdmittance<P>>,
    ) -> Result<Self, YBusError> {
        topo.validate()?;
        if branch_param.len() != topo.branch_bus.len() {
            return Err(YBusError::SizeMismatch {
                kind: "branch admittance",
                got: branch_param.len(),
                expected: topo.branch_bus.len(),
            });
        }
        if shunt_param.len() != topo.shunt_bus.len() {
            return Err(YBusError::SizeMismatch {
                kind: "shunt admittance",
                got: shunt_param.len(),
                expected: topo.shunt_bus.len(),
            });
        }

        let n = topo.n_bus;

        // Build the Y-bus pattern from triplets; duplicates collapse in the
        // CSR conversion. Every diagonal is present so isolated buses still
        // get a pivot block.
        let mut pattern = TriMat::new((n, n));
        for bus in 0..n {
            pattern.add_triplet(bus, bus, 1.0f64);
        }
        for &(f, t) in &topo.branch_bus {
            pattern.add_triplet(f, f, 1.0);
            pattern.add_triplet(f, t, 1.0);
            pattern.add_triplet(t, f, 1.0);
            pattern.add_triplet(t, t, 1.0);
        }
        let csr: sprs::CsMat<f64> = pattern.to_csr();
        let mut row_indptr = Vec::with_capacity(n + 1);
        for row in 0..=n {
            row_indptr.push(csr.indptr().index(row));
        }
        let col_indices: Vec<usize> = csr.indices().to_vec();
        let nnz = col_indices.len();

        let find_entry = |row: usize, col: usize| -> usize {
            let start = row_indptr[row];
            let end = row_indptr[row + 1];
            let pos = col_indices[start..end]
                .binary_search(&col)
                .expect("entry present: pattern was built from the same triplets");
            start + pos
        };

        // Element lists per entry, counting-sorted by entry index.
        let mut tagged: Vec<(usize, YBusElement)> = Vec::new();
        for (idx, &(f, t)) in topo.branch_bus.iter().enumerate() {
            for (row, col, element_type) in [
                (f, f, ElementType::Bff),
                (f, t, ElementType::Bft),
                (t, f, ElementType::Btf),
                (t, t, ElementType::Btt),
            ] {
                tagged.push((find_entry(row, col), YBusElement { idx, element_type }));
            }
        }
        for (idx, &bus) in topo.shunt_bus.iter().enumerate() {
            tagged.push((
                find_entry(bus, bus),
                YBusElement {
                    idx,
                    element_type: ElementType::Shunt,
                },
            ));
        }
        let mut entry_indptr = vec![0usize; nnz + 1];
        for &(entry, _) in &tagged {
            entry_indptr[entry + 1] += 1;
        }
        for entry in 0..nnz {
            entry_indptr[entry + 1] += entry_indptr[entry];
        }
        let mut cursor = entry_indptr.clone();
        let mut elements = vec![
            YBusElement {
                idx: 0,
                element_type: ElementType::Shunt
            };
            tagged.len()
        ];
        for &(entry, element) in &tagged {
            elements[cursor[entry]] = element;
            cursor[entry] += 1;
        }

        // Admittance values per entry.
        let mut admittance = vec![P::ComplexTensor::default(); nnz];
        for entry in 0..nnz {
            for element in &elements[entry_indptr[entry]..entry_indptr[entry + 1]] {
                let y = match element.element_type {
                    ElementType::Shunt => shunt_param[element.idx].yff,
                    ElementType::Bff => branch_param[element.idx].yff,
                    ElementType::Bft => branch_param[element.idx].yft,
                    ElementType::Btf => branch_param[element.idx].ytf,
                    ElementType::Btt => branch_param[element.idx].ytt,
                };
                admittance[entry] = admittance[entry] + y;
            }
        }

        // Symbolic fill-in for a natural-order factorization. Row i picks up
        // the upper pattern of every finished row reachable through its lower
        // entries; the worklist runs in ascending column order.
        let mut lu_rows: Vec<Vec<usize>> = Vec::with_capacity(n);
        for row in 0..n {
            let start = row_indptr[row];
            let end = row_indptr[row + 1];
            let mut cols: BTreeSet<usize> = col_indices[start..end].iter().copied().collect();
            let mut worklist: BinaryHeap<Reverse<usize>> =
                cols.iter().copied().filter(|&c| c < row).map(Reverse).collect();
            while let Some(Reverse(k)) = worklist.pop() {
                for &m in lu_rows[k].iter().filter(|&&m| m > k) {
                    if cols.insert(m) && m < row {
                        worklist.push(Reverse(m));
                    }
                }
            }
            lu_rows.push(cols.into_iter().collect());
        }

        let mut row_indptr_lu = Vec::with_capacity(n + 1);
        let mut col_indices_lu = Vec::new();
        let mut diag_lu = Vec::with_capacity(n);
        row_indptr_lu.push(0);
        for (row, cols) in lu_rows.iter().enumerate() {
            for &col in cols {
                if col == row {
                    diag_lu.push(col_indices_lu.len());
                }
                col_indices_lu.push(col);
            }
            row_indptr_lu.push(col_indices_lu.len());
        }

        // Map LU entries back to Y-bus entries; fill-in maps to None.
        let nnz_lu = col_indices_lu.len();
        let mut map_lu_y_bus = vec![None; nnz_lu];
        for row in 0..n {
            let y_cols = &col_indices[row_indptr[row]..row_indptr[row + 1]];
            for lu_idx in row_indptr_lu[row]..row_indptr_lu[row + 1] {
                let col = col_indices_lu[lu_idx];
                if let Ok(pos) = y_cols.binary_search(&col) {
                    map_lu_y_bus[lu_idx] = Some(row_indptr[row] + pos);
                }
            }
        }

        // Transpose-entry map over the LU pattern.
        let mut lu_transpose_entry = vec![0usize; nnz_lu];
        for row in 0..n {
            for lu_idx in row_indptr_lu[row]..row_indptr_lu[row + 1] {
                let col = col_indices_lu[lu_idx];
                let t_start = row_indptr_lu[col];
                let t_end = row_indptr_lu[col + 1];
                let pos = col_indices_lu[t_start..t_end]
                    .binary_search(&row)
                    .map_err(|_| YBusError::AsymmetricPattern)?;
                lu_transpose_entry[lu_idx] = t_start + pos;
            }
        }

        Ok(Self {
            topo,
            branch_param,
            shunt_param,
            row_indptr,
            col_indices,
            admittance,
            entry_indptr,
            elements,
            row_indptr_lu: Arc::new(row_indptr_lu),
            col_indices_lu: Arc::new(col_indices_lu),
            diag_lu: Arc::new(diag_lu),
            map_lu_y_bus,
            lu_transpose_entry,
        })
    }

    pub fn n_bus(&self) -> usize {
        self.topo.n_bus
    }

    pub fn nnz(&self) -> usize {
        self.col_indices.len()
    }

    pub fn nnz_lu(&self) -> usize {
        self.col_indices_lu.len()
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topo
    }

    pub fn branch_param(&self) -> &[BranchAdmittance<P>] {
        &self.branch_param
    }

    pub fn shunt_param(&self) -> &[ShuntAdmittance<P>] {
        &self.shunt_param
    }

    pub fn row_indptr_lu(&self) -> &[usize] {
        &self.row_indptr_lu
    }

    pub fn col_indices_lu(&self) -> &[usize] {
        &self.col_indices_lu
    }

    pub fn diag_lu(&self) -> &[usize] {
        &self.diag_lu
    }

    pub fn shared_row_indptr_lu(&self) -> Arc<Vec<usize>> {
        Arc::clone(&self.row_indptr_lu)
    }

    pub fn shared_col_indices_lu(&self) -> Arc<Vec<usize>> {
        Arc::clone(&self.col_indices_lu)
    }

    pub fn shared_diag_lu(&self) -> Arc<Vec<usize>> {
        Arc::clone(&self.diag_lu)
    }

    /// Y-bus data index per LU entry; `None` marks fill-in.
    pub fn map_lu_y_bus(&self) -> &[Option<usize>] {
        &self.map_lu_y_bus
    }

    /// LU data index of the `(col, row)` entry per LU entry.
    pub fn lu_transpose_entry(&self) -> &[usize] {
        &self.lu_transpose_entry
    }

    pub fn admittance(&self) -> &[P::ComplexTensor] {
        &self.admittance
    }

    /// Elements contributing to a Y-bus entry.
    pub fn entry_elements(&self, data_idx: usize) -> &[YBusElement] {
        &self.elements[self.entry_indptr[data_idx]..self.entry_indptr[data_idx + 1]]
    }

    /// Per-bus complex power injection `S_i = u_i . conj(sum_j Y_ij u_j)`.
    pub fn calculate_injection(&self, u: &[P::Complex]) -> Vec<P::Complex> {
        (0..self.n_bus())
            .map(|row| {
                let mut current = P::Complex::default();
                for idx in self.row_indptr[row]..self.row_indptr[row + 1] {
                    let col = self.col_indices[idx];
                    current = current + P::complex_matvec(&self.admittance[idx], &u[col]);
                }
                P::mul_conj(&u[row], &current)
            })
            .collect()
    }

    /// Branch power/current flows reconstructed from a voltage solution.
    pub fn calculate_branch_flow(&self, u: &[P::Complex]) -> Vec<BranchFlow<P>> {
        self.topo
            .branch_bus
            .iter()
            .zip(&self.branch_param)
            .map(|(&(f, t), param)| {
                let i_from = P::complex_matvec(&param.yff, &u[f])
                    + P::complex_matvec(&param.yft, &u[t]);
                let i_to = P::complex_matvec(&param.ytf, &u[f])
                    + P::complex_matvec(&param.ytt, &u[t]);
                BranchFlow {
                    s_from: P::mul_conj(&u[f], &i_from),
                    s_to: P::mul_conj(&u[t], &i_to),
                    i_from,
                    i_to,
                }
            })
            .collect()
    }

    /// Shunt power/current draws reconstructed from a voltage solution.
    pub fn calculate_shunt_flow(&self, u: &[P::Complex]) -> Vec<ShuntFlow<P>> {
        self.topo
            .shunt_bus
            .iter()
            .zip(&self.shunt_param)
            .map(|(&bus, param)| {
                let i = P::complex_matvec(&param.yff, &u[bus]);
                ShuntFlow {
                    s: P::mul_conj(&u[bus], &i),
                    i,
                }
            })
            .collect()
    }
}
