use std::collections::BTreeSet;

use nalgebra::{DMatrix, DVector};
use parking_lot::Mutex;
use thiserror::Error;

use crate::numerics::atomic::{self, AtomicF64};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SparseError {
    #[error("column {col} is not in the graph of row {row}")]
    MissingGraphEntry { row: usize, col: usize },
    #[error("row {row} is not owned by this linear system")]
    RowNotOwned { row: usize },
}

/// Accumulation interface of a global linear system.
///
/// Everything except [`SumInto::reset_row`] adds into existing storage, so
/// calls touching the same rows may run concurrently. Rows owned elsewhere
/// are pushed to the caller's outbox and handed over once per pass through
/// [`SumInto::park_shared`].
pub trait SumInto: Send + Sync {
    /// Scatter-add one local block.
    ///
    /// `ids[i]` is the global row/column of local dof `i`; `sort_permutation`
    /// lists the local dofs in non-decreasing global order. `lhs` is either
    /// `ids.len()` square or empty (rhs-only contribution). Rows this
    /// system does not own are appended to `outbox`.
    fn sum_into(
        &self,
        ids: &[usize],
        sort_permutation: &[usize],
        rhs: &DVector<f64>,
        lhs: &DMatrix<f64>,
        outbox: &mut Vec<SharedContribution>,
        trace_tag: &str,
    ) -> Result<(), SparseError>;

    /// Take over the outboxes of a finished loop.
    fn park_shared(&self, contributions: Vec<SharedContribution>);

    /// Current diagonal entry of an owned row.
    fn diagonal(&self, row: usize) -> Option<f64>;

    /// Overwrite an owned row: zero off-diagonals, set diagonal and rhs.
    fn reset_row(&self, row: usize, diagonal: f64, rhs: f64) -> Result<(), SparseError>;

    fn owns_row(&self, row: usize) -> bool;
}

/// Contribution to a row owned by another rank, addressed by global ids.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedContribution {
    pub row: usize,
    pub rhs: f64,
    /// Sorted global columns; empty for rhs-only contributions.
    pub cols: Vec<usize>,
    pub values: Vec<f64>,
}

/// Collects connectivity for the rows this system owns.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    owned_rows: BTreeSet<usize>,
    entries: BTreeSet<(usize, usize)>,
}

impl GraphBuilder {
    pub fn new(owned_rows: impl IntoIterator<Item = usize>) -> Self {
        Self {
            owned_rows: owned_rows.into_iter().collect(),
            entries: BTreeSet::new(),
        }
    }

    /// Couple every row in `rows` with every other. Entries for rows owned
    /// elsewhere are dropped; those contributions travel as shared rows.
    pub fn add_connected_rows(&mut self, rows: &[usize]) {
        for &r in rows.iter().filter(|r| self.owned_rows.contains(r)) {
            for &c in rows {
                self.entries.insert((r, c));
            }
        }
    }

    /// Compress to CRS. Every owned row gets a diagonal entry.
    pub fn build(&self) -> CrsGraph {
        let mut entries = self.entries.clone();
        entries.extend(self.owned_rows.iter().map(|&r| (r, r)));

        let owned_rows: Vec<usize> = self.owned_rows.iter().copied().collect();
        let mut row_ptr = Vec::with_capacity(owned_rows.len() + 1);
        let mut col_idx = Vec::with_capacity(entries.len());
        row_ptr.push(0);

        let mut it = entries.into_iter().peekable();
        for &row in &owned_rows {
            while let Some(&(r, c)) = it.peek() {
                if r != row {
                    break;
                }
                col_idx.push(c);
                it.next();
            }
            row_ptr.push(col_idx.len());
        }

        CrsGraph {
            owned_rows,
            row_ptr,
            col_idx,
        }
    }
}

/// Sparsity of the owned rows, columns sorted within each row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CrsGraph {
    owned_rows: Vec<usize>,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
}

impl CrsGraph {
    pub fn num_rows(&self) -> usize {
        self.owned_rows.len()
    }

    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    pub fn owned_rows(&self) -> &[usize] {
        &self.owned_rows
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }

    /// Storage index of a global row.
    #[inline]
    pub fn local_row(&self, row: usize) -> Option<usize> {
        self.owned_rows.binary_search(&row).ok()
    }

    #[inline]
    pub fn row_range(&self, local_row: usize) -> std::ops::Range<usize> {
        self.row_ptr[local_row]..self.row_ptr[local_row + 1]
    }

    #[inline]
    fn find(&self, local_row: usize, col: usize) -> Option<usize> {
        let range = self.row_range(local_row);
        let start = range.start;
        self.col_idx[range].binary_search(&col).ok().map(|k| start + k)
    }
}

/// Compressed-row linear system over the rows one rank owns.
///
/// Values and rhs are atomic so teams can accumulate without locks. Rows
/// owned elsewhere collect in team outboxes and are parked here after each
/// loop, waiting for the routing layer.
#[derive(Debug)]
pub struct CrsLinearSystem {
    graph: CrsGraph,
    values: Vec<AtomicF64>,
    rhs: Vec<AtomicF64>,
    shared: Mutex<Vec<SharedContribution>>,
}

impl CrsLinearSystem {
    pub fn new(graph: CrsGraph) -> Self {
        let values = atomic::zeroed(graph.nnz());
        let rhs = atomic::zeroed(graph.num_rows());
        Self {
            graph,
            values,
            rhs,
            shared: Mutex::new(Vec::new()),
        }
    }

    pub fn graph(&self) -> &CrsGraph {
        &self.graph
    }

    pub fn nnz(&self) -> usize {
        self.graph.nnz()
    }

    /// Start a new assembly pass.
    pub fn zero(&self) {
        self.values.iter().for_each(|v| v.store(0.0));
        self.rhs.iter().for_each(|v| v.store(0.0));
        self.shared.lock().clear();
    }

    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        let lr = self.graph.local_row(row)?;
        self.graph.find(lr, col).map(|k| self.values[k].load())
    }

    pub fn rhs_value(&self, row: usize) -> Option<f64> {
        self.graph.local_row(row).map(|lr| self.rhs[lr].load())
    }

    /// Sum of the stored entries of an owned row.
    pub fn row_sum(&self, row: usize) -> Option<f64> {
        let lr = self.graph.local_row(row)?;
        Some(self.graph.row_range(lr).map(|k| self.values[k].load()).sum())
    }

    /// Rhs in owned-row order.
    pub fn rhs_vector(&self) -> DVector<f64> {
        DVector::from_iterator(self.rhs.len(), self.rhs.iter().map(AtomicF64::load))
    }

    /// Dense `n x n` copy with the owned rows filled in.
    pub fn to_dense(&self, n: usize) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(n, n);
        for (lr, &row) in self.graph.owned_rows.iter().enumerate() {
            for k in self.graph.row_range(lr) {
                dense[(row, self.graph.col_idx[k])] += self.values[k].load();
            }
        }
        dense
    }

    /// Length-`n` rhs with the owned rows filled in.
    pub fn rhs_dense(&self, n: usize) -> DVector<f64> {
        let mut out = DVector::zeros(n);
        for (lr, &row) in self.graph.owned_rows.iter().enumerate() {
            out[row] = self.rhs[lr].load();
        }
        out
    }

    /// Hand the outbox to the routing layer.
    pub fn drain_shared(&self) -> Vec<SharedContribution> {
        std::mem::take(&mut *self.shared.lock())
    }

    pub fn num_shared(&self) -> usize {
        self.shared.lock().len()
    }

    /// Accumulate contributions routed here from other ranks.
    pub fn sum_shared(&self, contributions: &[SharedContribution]) -> Result<(), SparseError> {
        for c in contributions {
            let lr = self
                .graph
                .local_row(c.row)
                .ok_or(SparseError::RowNotOwned { row: c.row })?;
            self.rhs[lr].fetch_add(c.rhs);
            for (&col, &v) in c.cols.iter().zip(&c.values) {
                let k = self
                    .graph
                    .find(lr, col)
                    .ok_or(SparseError::MissingGraphEntry { row: c.row, col })?;
                self.values[k].fetch_add(v);
            }
        }
        Ok(())
    }

    /// Sorted-merge of one local row into a CRS row.
    fn merge_row(
        &self,
        local_row: usize,
        row: usize,
        ids: &[usize],
        sort_permutation: &[usize],
        lhs: &DMatrix<f64>,
        i: usize,
    ) -> Result<(), SparseError> {
        let range = self.graph.row_range(local_row);
        let mut cursor = range.start;
        for &k in sort_permutation {
            let col = ids[k];
            while cursor < range.end && self.graph.col_idx[cursor] < col {
                cursor += 1;
            }
            if cursor == range.end || self.graph.col_idx[cursor] != col {
                return Err(SparseError::MissingGraphEntry { row, col });
            }
            self.values[cursor].fetch_add(lhs[(i, k)]);
        }
        Ok(())
    }
}

impl SumInto for CrsLinearSystem {
    fn sum_into(
        &self,
        ids: &[usize],
        sort_permutation: &[usize],
        rhs: &DVector<f64>,
        lhs: &DMatrix<f64>,
        outbox: &mut Vec<SharedContribution>,
        trace_tag: &str,
    ) -> Result<(), SparseError> {
        let n = ids.len();
        let has_lhs = lhs.nrows() == n && lhs.ncols() == n && n > 0;

        for (i, &row) in ids.iter().enumerate() {
            match self.graph.local_row(row) {
                Some(lr) => {
                    self.rhs[lr].fetch_add(rhs[i]);
                    if has_lhs {
                        self.merge_row(lr, row, ids, sort_permutation, lhs, i)?;
                    }
                }
                None => {
                    let (cols, values) = if has_lhs {
                        sort_permutation
                            .iter()
                            .map(|&k| (ids[k], lhs[(i, k)]))
                            .unzip()
                    } else {
                        (Vec::new(), Vec::new())
                    };
                    log::trace!("{trace_tag}: row {row} routed to its owner");
                    outbox.push(SharedContribution {
                        row,
                        rhs: rhs[i],
                        cols,
                        values,
                    });
                }
            }
        }
        Ok(())
    }

    fn park_shared(&self, contributions: Vec<SharedContribution>) {
        if !contributions.is_empty() {
            self.shared.lock().extend(contributions);
        }
    }

    fn diagonal(&self, row: usize) -> Option<f64> {
        self.value(row, row)
    }

    fn reset_row(&self, row: usize, diagonal: f64, rhs: f64) -> Result<(), SparseError> {
        let lr = self
            .graph
            .local_row(row)
            .ok_or(SparseError::RowNotOwned { row })?;
        for k in self.graph.row_range(lr) {
            let v = if self.graph.col_idx[k] == row { diagonal } else { 0.0 };
            self.values[k].store(v);
        }
        self.rhs[lr].store(rhs);
        Ok(())
    }

    fn owns_row(&self, row: usize) -> bool {
        self.graph.local_row(row).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_block_system() -> CrsLinearSystem {
        let mut g = GraphBuilder::new(0..4);
        g.add_connected_rows(&[0, 1, 2]);
        g.add_connected_rows(&[2, 3]);
        CrsLinearSystem::new(g.build())
    }

    #[test]
    fn graph_has_sorted_unique_columns() {
        let sys = two_block_system();
        let g = sys.graph();
        assert_eq!(g.row_ptr(), &[0, 3, 6, 10, 12]);
        assert_eq!(&g.col_idx()[6..10], &[0, 1, 2, 3]);
    }

    #[test]
    fn unsorted_ids_land_in_the_right_columns() {
        let sys = two_block_system();
        let ids = [2, 0, 1];
        let perm = [1, 2, 0];
        let rhs = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let lhs = DMatrix::from_fn(3, 3, |i, j| (10 * i + j) as f64);
        sys.sum_into(&ids, &perm, &rhs, &lhs, &mut Vec::new(), "test").unwrap();

        assert_eq!(sys.rhs_value(2), Some(1.0));
        assert_eq!(sys.value(2, 0), Some(1.0));
        assert_eq!(sys.value(0, 2), Some(10.0));
        assert_eq!(sys.value(1, 1), Some(22.0));
    }

    #[test]
    fn missing_column_is_reported() {
        let sys = two_block_system();
        let rhs = DVector::zeros(2);
        let lhs = DMatrix::zeros(2, 2);
        let err = sys
            .sum_into(&[0, 3], &[0, 1], &rhs, &lhs, &mut Vec::new(), "test")
            .unwrap_err();
        assert_eq!(err, SparseError::MissingGraphEntry { row: 0, col: 3 });
    }

    #[test]
    fn foreign_rows_go_to_the_outbox() {
        let mut g = GraphBuilder::new([0]);
        g.add_connected_rows(&[0, 5]);
        let sys = CrsLinearSystem::new(g.build());
        let rhs = DVector::from_vec(vec![1.0, 2.0]);
        let lhs = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let mut outbox = Vec::new();
        sys.sum_into(&[5, 0], &[1, 0], &rhs, &lhs, &mut outbox, "test").unwrap();

        let expected = vec![SharedContribution {
            row: 5,
            rhs: 1.0,
            cols: vec![0, 5],
            values: vec![2.0, 1.0],
        }];
        assert_eq!(outbox, expected);
        assert_eq!(sys.num_shared(), 0);

        sys.park_shared(outbox);
        sys.park_shared(Vec::new());
        assert_eq!(sys.drain_shared(), expected);
        assert_eq!(sys.num_shared(), 0);
    }

    #[test]
    fn reset_row_writes_identity() {
        let sys = two_block_system();
        let rhs = DVector::from_element(3, 1.0);
        let lhs = DMatrix::from_element(3, 3, 1.0);
        sys.sum_into(&[0, 1, 2], &[0, 1, 2], &rhs, &lhs, &mut Vec::new(), "test")
            .unwrap();
        sys.reset_row(1, 1.0, 0.0).unwrap();
        assert_eq!(sys.value(1, 0), Some(0.0));
        assert_eq!(sys.diagonal(1), Some(1.0));
        assert_eq!(sys.rhs_value(1), Some(0.0));
        assert_eq!(sys.reset_row(9, 1.0, 0.0), Err(SparseError::RowNotOwned { row: 9 }));
    }

    #[test]
    fn row_sums_cover_every_stored_column() {
        let sys = two_block_system();
        let rhs = DVector::zeros(3);
        let lhs = DMatrix::from_fn(3, 3, |i, j| (1 + 3 * i + j) as f64);
        sys.sum_into(&[0, 1, 2], &[0, 1, 2], &rhs, &lhs, &mut Vec::new(), "test")
            .unwrap();
        assert_eq!(sys.row_sum(0), Some(6.0));
        assert_eq!(sys.row_sum(2), Some(24.0));
        assert_eq!(sys.row_sum(3), Some(0.0));
        assert_eq!(sys.row_sum(7), None);
    }
}
