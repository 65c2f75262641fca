//! Sparse admittance matrix with stable entry handles.
//!
//! Devices resolve one [`MatrixHandle`] per nonzero Jacobian position during
//! setup and stamp through it on every iteration. Stamping only ever adds, so
//! device order does not change which positions receive which contributions.

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::node::NodeId;

/// Opaque reference to one matrix position.
///
/// Handles touching the ground row or column are valid but discard whatever
/// is stamped through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MatrixHandle(Option<u32>);

impl MatrixHandle {
    /// The handle for any position in the ground row or column.
    pub const GROUND: MatrixHandle = MatrixHandle(None);

    /// True if stamps through this handle are discarded.
    pub fn is_ground(self) -> bool {
        self.0.is_none()
    }
}

/// Matrix and right-hand side for one circuit.
///
/// The real part holds the DC/transient Jacobian; the imaginary part is used
/// by small-signal and pole-zero loads, which fill both halves.
#[derive(Debug, Clone, Default)]
pub struct MatrixStore {
    size: usize,
    positions: IndexMap<(u32, u32), u32>,
    real: Vec<f64>,
    imag: Vec<f64>,
    rhs: Vec<f64>,
    irhs: Vec<f64>,
}

impl MatrixStore {
    /// Create an empty store for `size` unknowns.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            positions: IndexMap::new(),
            real: Vec::new(),
            imag: Vec::new(),
            rhs: vec![0.0; size],
            irhs: vec![0.0; size],
        }
    }

    /// Drop every entry and resize. Invalidates all previously issued handles.
    pub fn reset(&mut self, size: usize) {
        self.size = size;
        self.positions.clear();
        self.real.clear();
        self.imag.clear();
        self.rhs = vec![0.0; size];
        self.irhs = vec![0.0; size];
    }

    /// Resize the right-hand sides once every unknown is known, keeping handles.
    pub fn set_size(&mut self, size: usize) {
        self.size = size;
        self.rhs = vec![0.0; size];
        self.irhs = vec![0.0; size];
    }

    /// Number of unknowns.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of structural nonzeros.
    pub fn nnz(&self) -> usize {
        self.real.len()
    }

    /// Resolve the handle for position `(row, col)`, creating it if needed.
    ///
    /// Asking twice for the same position returns the same handle.
    pub fn entry(&mut self, row: NodeId, col: NodeId) -> MatrixHandle {
        let (Some(r), Some(c)) = (row.index(), col.index()) else {
            return MatrixHandle::GROUND;
        };
        let key = (r as u32, c as u32);
        if let Some(&slot) = self.positions.get(&key) {
            return MatrixHandle(Some(slot));
        }
        let slot = self.real.len() as u32;
        self.positions.insert(key, slot);
        self.real.push(0.0);
        self.imag.push(0.0);
        MatrixHandle(Some(slot))
    }

    /// Add `value` to the real part of the entry.
    #[inline]
    pub fn add(&mut self, handle: MatrixHandle, value: f64) {
        if let Some(slot) = handle.0 {
            self.real[slot as usize] += value;
        }
    }

    /// Add `re + j·im` to the entry.
    #[inline]
    pub fn add_complex(&mut self, handle: MatrixHandle, re: f64, im: f64) {
        if let Some(slot) = handle.0 {
            self.real[slot as usize] += re;
            self.imag[slot as usize] += im;
        }
    }

    /// Add `value` to the right-hand side at `node`.
    #[inline]
    pub fn add_rhs(&mut self, node: NodeId, value: f64) {
        if let Some(i) = node.index() {
            self.rhs[i] += value;
        }
    }

    /// Add `re + j·im` to the right-hand side at `node`.
    #[inline]
    pub fn add_rhs_complex(&mut self, node: NodeId, re: f64, im: f64) {
        if let Some(i) = node.index() {
            self.rhs[i] += re;
            self.irhs[i] += im;
        }
    }

    /// Zero every value, keeping the structure and all handles.
    pub fn clear(&mut self) {
        self.real.fill(0.0);
        self.imag.fill(0.0);
        self.rhs.fill(0.0);
        self.irhs.fill(0.0);
    }

    /// Current real value behind a handle.
    pub fn value(&self, handle: MatrixHandle) -> f64 {
        handle.0.map(|s| self.real[s as usize]).unwrap_or(0.0)
    }

    /// Current complex value behind a handle.
    pub fn complex_value(&self, handle: MatrixHandle) -> Complex64 {
        handle
            .0
            .map(|s| Complex64::new(self.real[s as usize], self.imag[s as usize]))
            .unwrap_or_default()
    }

    /// Real value at `(row, col)` (0-based matrix indices), zero if not structural.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.positions
            .get(&(row as u32, col as u32))
            .map(|&s| self.real[s as usize])
            .unwrap_or(0.0)
    }

    /// Real right-hand side.
    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }

    /// Imaginary right-hand side.
    pub fn irhs(&self) -> &[f64] {
        &self.irhs
    }

    /// Real values in handle order.
    pub fn values(&self) -> &[f64] {
        &self.real
    }

    /// `(row, col, value)` for every structural entry.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.positions
            .iter()
            .map(|(&(r, c), &s)| (r as usize, c as usize, self.real[s as usize]))
    }

    /// `(row, col, value)` of the complex matrix.
    pub fn complex_triplets(&self) -> impl Iterator<Item = (usize, usize, Complex64)> + '_ {
        self.positions.iter().map(|(&(r, c), &s)| {
            (
                r as usize,
                c as usize,
                Complex64::new(self.real[s as usize], self.imag[s as usize]),
            )
        })
    }

    /// Complex right-hand side.
    pub fn complex_rhs(&self) -> DVector<Complex64> {
        DVector::from_fn(self.size, |i, _| Complex64::new(self.rhs[i], self.irhs[i]))
    }

    /// Dense copy of the real matrix.
    pub fn to_dense_matrix(&self) -> DMatrix<f64> {
        let mut m = DMatrix::zeros(self.size, self.size);
        for (r, c, v) in self.triplets() {
            m[(r, c)] += v;
        }
        m
    }

    /// Dense copy of the complex matrix.
    pub fn to_dense_complex(&self) -> DMatrix<Complex64> {
        let mut m = DMatrix::from_element(self.size, self.size, Complex64::default());
        for (r, c, v) in self.complex_triplets() {
            m[(r, c)] += v;
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(i: u32) -> NodeId {
        NodeId::new(i)
    }

    #[test]
    fn test_handles_are_stable() {
        let mut m = MatrixStore::new(2);
        let h00 = m.entry(n(1), n(1));
        let h01 = m.entry(n(1), n(2));
        let again = m.entry(n(1), n(1));
        assert_eq!(h00, again);
        assert_ne!(h00, h01);
        assert_eq!(m.nnz(), 2);
        // new entries never move existing ones
        let h11 = m.entry(n(2), n(2));
        m.add(h00, 1.5);
        m.add(h11, 2.0);
        assert_eq!(m.value(h00), 1.5);
        assert_eq!(m.get(1, 1), 2.0);
    }

    #[test]
    fn test_ground_handles_discard() {
        let mut m = MatrixStore::new(1);
        let h = m.entry(NodeId::GROUND, n(1));
        assert!(h.is_ground());
        m.add(h, 10.0);
        m.add_rhs(NodeId::GROUND, 3.0);
        assert_eq!(m.nnz(), 0);
        assert_eq!(m.rhs(), &[0.0]);
    }

    #[test]
    fn test_accumulate_adds() {
        let mut m = MatrixStore::new(1);
        let h = m.entry(n(1), n(1));
        m.add(h, 0.25);
        m.add(h, 0.5);
        assert_eq!(m.value(h), 0.75);
        m.clear();
        assert_eq!(m.value(h), 0.0);
        assert_eq!(m.nnz(), 1);
    }

    #[test]
    fn test_complex_parts() {
        let mut m = MatrixStore::new(2);
        let h = m.entry(n(1), n(2));
        m.add_complex(h, 1.0, -2.0);
        m.add_rhs_complex(n(2), 0.0, 1.0);
        assert_eq!(m.complex_value(h), Complex64::new(1.0, -2.0));
        let dense = m.to_dense_complex();
        assert_eq!(dense[(0, 1)], Complex64::new(1.0, -2.0));
        assert_eq!(m.complex_rhs()[1], Complex64::new(0.0, 1.0));
    }
}
