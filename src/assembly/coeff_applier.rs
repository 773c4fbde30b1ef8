use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::assembly::{global_row, AssemblyError};
use crate::discretization::fields::{names, AtomicField, IntField};
use crate::discretization::mesh::{Mesh, NodeId};
use crate::numerics::sparse::{SharedContribution, SumInto};

/// Maps local blocks onto global rows and hands them to the linear system.
///
/// One applier serves every algorithm of an equation system for a pass. The
/// overset and diagonal flags are fixed at construction, so the per-object
/// path never branches on configuration that could differ between calls.
#[derive(Clone)]
pub struct CoeffApplier {
    global_ids: Arc<[usize]>,
    iblank: Option<Arc<IntField>>,
    diagonal: Option<Arc<AtomicField>>,
    delegate: Arc<dyn SumInto>,
    dofs_per_node: usize,
    has_overset: bool,
    extract_diagonal: bool,
}

impl CoeffApplier {
    /// Capture the mesh handles an applier needs.
    ///
    /// With `has_overset` the `iblank` node field must exist; with
    /// `diagonal_field` set, the named atomic node field receives the
    /// diagonal of every applied block.
    pub fn new(
        mesh: &Mesh,
        delegate: Arc<dyn SumInto>,
        dofs_per_node: usize,
        has_overset: bool,
        diagonal_field: Option<&str>,
    ) -> Result<Self, AssemblyError> {
        let iblank = if has_overset {
            let field = mesh.fields.int(names::IBLANK).ok_or_else(|| {
                AssemblyError::MissingField {
                    field: names::IBLANK.to_string(),
                }
            })?;
            Some(Arc::clone(field))
        } else {
            None
        };

        let diagonal = diagonal_field
            .map(|name| {
                mesh.fields
                    .atomic(name)
                    .map(Arc::clone)
                    .ok_or_else(|| AssemblyError::MissingField {
                        field: name.to_string(),
                    })
            })
            .transpose()?;

        Ok(Self {
            global_ids: mesh.nodes.iter().map(|n| n.global_id).collect(),
            iblank,
            extract_diagonal: diagonal.is_some(),
            diagonal,
            delegate,
            dofs_per_node,
            has_overset,
        })
    }

    pub fn dofs_per_node(&self) -> usize {
        self.dofs_per_node
    }

    pub fn has_overset(&self) -> bool {
        self.has_overset
    }

    /// Nodes with `iblank <= 0` carry an externally supplied value.
    #[inline]
    pub fn is_active(&self, node: NodeId) -> bool {
        self.iblank
            .as_ref()
            .map_or(true, |f| node >= f.len() || *f.get(node, 0) > 0)
    }

    /// Accumulate one local block.
    ///
    /// `rhs` must hold `entities.len() * dofs_per_node` values and `lhs` must
    /// be square of that size or empty. Rows of inactive nodes are zeroed
    /// before the scatter. `scratch_ids` and `sort_permutation` are resized
    /// and overwritten. Rows owned by another rank are appended to `outbox`.
    #[allow(clippy::too_many_arguments)]
    pub fn apply(
        &self,
        entities: &[NodeId],
        scratch_ids: &mut Vec<usize>,
        sort_permutation: &mut Vec<usize>,
        rhs: &mut DVector<f64>,
        lhs: &mut DMatrix<f64>,
        outbox: &mut Vec<SharedContribution>,
        trace_tag: &str,
    ) -> Result<(), AssemblyError> {
        let n = self.check_sizes(entities, rhs, lhs)?;
        let implicit = lhs.nrows() == n && n > 0;

        self.translate(entities, scratch_ids)?;

        if self.has_overset {
            self.mask_inactive_rows(entities, rhs, lhs);
        }

        if let (true, Some(diag)) = (implicit, &self.diagonal) {
            let ndof = self.dofs_per_node;
            for (i, &node) in entities.iter().enumerate() {
                for d in 0..ndof {
                    let k = i * ndof + d;
                    diag.add(node, d, lhs[(k, k)]);
                }
            }
        }

        sort_permutation.clear();
        sort_permutation.extend(0..n);
        // stable: equal ids keep local order
        sort_permutation.sort_by_key(|&k| scratch_ids[k]);

        self.delegate
            .sum_into(scratch_ids, sort_permutation, rhs, lhs, outbox, trace_tag)?;
        Ok(())
    }

    /// Hand the merged outboxes of a finished loop to the linear system.
    pub fn park_shared(&self, contributions: Vec<SharedContribution>) {
        self.delegate.park_shared(contributions);
    }

    /// Copy the assembled diagonal of each owned row into `lhs`.
    pub fn extract_diagonal(
        &self,
        entities: &[NodeId],
        lhs: &mut DMatrix<f64>,
    ) -> Result<(), AssemblyError> {
        let n = entities.len() * self.dofs_per_node;
        if lhs.nrows() != n || lhs.ncols() != n {
            return Err(AssemblyError::DofMismatch {
                expected: n,
                found: lhs.nrows(),
            });
        }
        let ndof = self.dofs_per_node;
        for (i, &node) in entities.iter().enumerate() {
            let gid = self.global_id(node)?;
            for d in 0..ndof {
                if let Some(v) = self.delegate.diagonal(global_row(gid, ndof, d)) {
                    let k = i * ndof + d;
                    lhs[(k, k)] = v;
                }
            }
        }
        Ok(())
    }

    /// Zero the local rows of inactive nodes and put their owned global rows
    /// into the reset state: unit diagonal, zero off-diagonals and rhs. The
    /// diagonal field, when present, receives the same unit diagonal.
    ///
    /// Overwrites global storage, so it must finish before any `apply` that
    /// touches the same rows in this pass.
    pub fn reset_overset_rows(
        &self,
        entities: &[NodeId],
        rhs: &mut DVector<f64>,
        lhs: &mut DMatrix<f64>,
    ) -> Result<(), AssemblyError> {
        self.check_sizes(entities, rhs, lhs)?;
        if !self.has_overset {
            return Ok(());
        }
        self.mask_inactive_rows(entities, rhs, lhs);

        let ndof = self.dofs_per_node;
        for &node in entities.iter().filter(|&&n| !self.is_active(n)) {
            let gid = self.global_id(node)?;
            for d in 0..ndof {
                let row = global_row(gid, ndof, d);
                if self.delegate.owns_row(row) {
                    self.delegate.reset_row(row, 1.0, 0.0)?;
                    if let Some(diag) = &self.diagonal {
                        diag.add(node, d, 1.0);
                    }
                }
            }
        }
        Ok(())
    }

    fn check_sizes(
        &self,
        entities: &[NodeId],
        rhs: &DVector<f64>,
        lhs: &DMatrix<f64>,
    ) -> Result<usize, AssemblyError> {
        let n = entities.len() * self.dofs_per_node;
        if rhs.len() != n {
            return Err(AssemblyError::DofMismatch {
                expected: n,
                found: rhs.len(),
            });
        }
        let empty = lhs.nrows() == 0 && lhs.ncols() == 0;
        if !empty && (lhs.nrows() != n || lhs.ncols() != n) {
            return Err(AssemblyError::DofMismatch {
                expected: n,
                found: lhs.nrows(),
            });
        }
        Ok(n)
    }

    #[inline]
    fn global_id(&self, node: NodeId) -> Result<usize, AssemblyError> {
        self.global_ids
            .get(node)
            .copied()
            .ok_or(AssemblyError::UnknownNode { node })
    }

    fn translate(&self, entities: &[NodeId], scratch_ids: &mut Vec<usize>) -> Result<(), AssemblyError> {
        let ndof = self.dofs_per_node;
        scratch_ids.clear();
        for &node in entities {
            let gid = self.global_id(node)?;
            scratch_ids.extend((0..ndof).map(|d| global_row(gid, ndof, d)));
        }
        Ok(())
    }

    /// Inactive rows are assigned zero, so non-finite physics cannot leak through.
    fn mask_inactive_rows(&self, entities: &[NodeId], rhs: &mut DVector<f64>, lhs: &mut DMatrix<f64>) {
        let ndof = self.dofs_per_node;
        let implicit = lhs.nrows() == rhs.len() && !rhs.is_empty();
        for (i, &node) in entities.iter().enumerate() {
            if self.is_active(node) {
                continue;
            }
            for d in 0..ndof {
                let k = i * ndof + d;
                rhs[k] = 0.0;
                if implicit {
                    lhs.row_mut(k).fill(0.0);
                }
            }
        }
    }
}

impl std::fmt::Debug for CoeffApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoeffApplier")
            .field("dofs_per_node", &self.dofs_per_node)
            .field("has_overset", &self.has_overset)
            .field("extract_diagonal", &self.extract_diagonal)
            .finish()
    }
}
