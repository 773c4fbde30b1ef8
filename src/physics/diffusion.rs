use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::assembly::ScratchViews;
use crate::discretization::fields::names;
use crate::discretization::mesh::MeshObject;
use crate::physics::{ElemDataRequests, Kernel};

/// Steady conduction `-∇·(k∇T)` on linear tetrahedra.
///
/// On Tet4 the control-volume fluxes through the median-dual faces give the
/// same operator as the P1 stiffness, `K_ij = k V ∇N_i·∇N_j`, which is what
/// is assembled here.
#[derive(Debug, Clone)]
pub struct SteadyThermalDiffusionElemKernel {
    conductivity: f64,
}

impl SteadyThermalDiffusionElemKernel {
    pub fn new(conductivity: f64) -> Self {
        Self { conductivity }
    }

    /// Element stiffness, or `None` for a degenerate tetrahedron.
    pub fn stiffness(&self, coords: &[f64]) -> Option<DMatrix<f64>> {
        let x = |n: usize| Vector3::new(coords[3 * n], coords[3 * n + 1], coords[3 * n + 2]);
        let x0 = x(0);
        let jac = Matrix3::from_columns(&[x(1) - x0, x(2) - x0, x(3) - x0]);
        let volume = jac.determinant() / 6.0;
        let inv = jac.try_inverse()?;

        // rows of the inverse Jacobian are the gradients of N1..N3
        let mut grad = [Vector3::zeros(); 4];
        for (k, g) in grad.iter_mut().enumerate().skip(1) {
            *g = inv.row(k - 1).transpose();
        }
        grad[0] = -(grad[1] + grad[2] + grad[3]);

        let scale = self.conductivity * volume.abs();
        Some(DMatrix::from_fn(4, 4, |i, j| scale * grad[i].dot(&grad[j])))
    }
}

impl Kernel for SteadyThermalDiffusionElemKernel {
    fn name(&self) -> &str {
        "steady_thermal_diffusion"
    }

    fn data_requests(&self) -> ElemDataRequests {
        let mut r = ElemDataRequests::default();
        r.add_gathered_nodal_field(names::COORDINATES, 3);
        r.add_gathered_nodal_field(names::TEMPERATURE, 1);
        r
    }

    fn execute(
        &self,
        lhs: &mut DMatrix<f64>,
        rhs: &mut DVector<f64>,
        object: MeshObject,
        views: &ScratchViews,
    ) {
        let coords = views.nodal(names::COORDINATES);
        let (Some(coords), Some(t)) = (coords, views.nodal(names::TEMPERATURE)) else {
            return;
        };
        let Some(k) = self.stiffness(coords) else {
            log::debug!("skipping degenerate element {}", object.index);
            return;
        };

        let t = DVector::from_column_slice(t);
        *rhs -= &k * t;
        if lhs.nrows() == k.nrows() {
            *lhs += k;
        }
    }
}
