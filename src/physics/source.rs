use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::assembly::ScratchViews;
use crate::discretization::fields::names;
use crate::discretization::master_element::Tet4Scv;
use crate::discretization::mesh::MeshObject;
use crate::physics::{ElemDataRequests, Kernel};

/// Constants of the manufactured contact-conduction solution
/// `T = k/4 (cos 2aπx + cos 2aπy + cos 2aπz)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactSourceParams {
    #[serde(default = "unit")]
    pub a: f64,
    #[serde(default = "unit")]
    pub k: f64,
}

fn unit() -> f64 {
    1.0
}

impl Default for ContactSourceParams {
    fn default() -> Self {
        Self { a: 1.0, k: 1.0 }
    }
}

impl ContactSourceParams {
    /// Volumetric source at a point.
    #[inline]
    pub fn source(&self, x: [f64; 3]) -> f64 {
        let w = 2.0 * self.a * PI;
        self.k / 4.0 * w * w * x.iter().map(|xi| (w * xi).cos()).sum::<f64>()
    }
}

/// Manufactured heat source for the steady 3D contact problem.
///
/// At every sub-control-volume ip the source is evaluated at the
/// interpolated coordinates, weighted by the sub-control volume and added to
/// the node that owns the ip. Explicit: `lhs` is left alone.
#[derive(Debug, Clone)]
pub struct SteadyThermal3dContactSrcElemKernel {
    params: ContactSourceParams,
    shape_fcn: [[f64; 4]; 4],
    ip_node_map: &'static [usize],
}

impl SteadyThermal3dContactSrcElemKernel {
    pub fn new(params: ContactSourceParams) -> Self {
        let me = Tet4Scv;
        Self {
            params,
            shape_fcn: me.shape_fcn(),
            ip_node_map: me.ip_node_map(),
        }
    }
}

impl Default for SteadyThermal3dContactSrcElemKernel {
    fn default() -> Self {
        Self::new(ContactSourceParams::default())
    }
}

impl Kernel for SteadyThermal3dContactSrcElemKernel {
    fn name(&self) -> &str {
        "steady_thermal_3d_contact_src"
    }

    fn data_requests(&self) -> ElemDataRequests {
        let mut r = ElemDataRequests::default();
        r.add_gathered_nodal_field(names::COORDINATES, 3);
        r.add_scv_volume();
        r
    }

    fn execute(
        &self,
        _lhs: &mut DMatrix<f64>,
        rhs: &mut DVector<f64>,
        _object: MeshObject,
        views: &ScratchViews,
    ) {
        let Some(coords) = views.nodal(names::COORDINATES) else {
            return;
        };

        for (ip, &nearest) in self.ip_node_map.iter().enumerate() {
            let mut x = [0.0; 3];
            for (ic, r) in self.shape_fcn[ip].iter().enumerate() {
                for (j, xj) in x.iter_mut().enumerate() {
                    *xj += r * coords[3 * ic + j];
                }
            }
            rhs[nearest] += self.params.source(x) * views.scv_volume[ip];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::create_single_tet_mesh;
    use approx::assert_relative_eq;

    #[test]
    fn unit_tet_matches_reference_quadrature() {
        let mesh = create_single_tet_mesh([
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ]);
        let kernel = SteadyThermal3dContactSrcElemKernel::default();
        let req = kernel.data_requests();
        let mut views = ScratchViews::new(&req);
        views.gather(&mesh, MeshObject::element(0), &req).unwrap();

        let mut rhs = DVector::zeros(4);
        let mut lhs = DMatrix::zeros(0, 0);
        kernel.execute(&mut lhs, &mut rhs, MeshObject::element(0), &views);

        // ip 0 sits at (17/96, 17/96, 17/96), the others share one coordinate at 45/96
        let c17 = (2.0 * PI * 17.0 / 96.0).cos();
        let c45 = (2.0 * PI * 45.0 / 96.0).cos();
        let w = PI * PI / 24.0;
        assert_relative_eq!(rhs[0], w * 3.0 * c17, epsilon = 1e-14);
        for n in 1..4 {
            assert_relative_eq!(rhs[n], w * (2.0 * c17 + c45), epsilon = 1e-14);
        }
        assert_relative_eq!(rhs.sum(), 0.4269600613276405, epsilon = 1e-13);
        assert_eq!(lhs.shape(), (0, 0));
    }

    #[test]
    fn source_scales_with_conductivity() {
        let p = ContactSourceParams { a: 0.5, k: 2.0 };
        let base = ContactSourceParams { a: 0.5, k: 1.0 };
        let x = [0.1, 0.2, 0.3];
        assert_relative_eq!(p.source(x), 2.0 * base.source(x), epsilon = 1e-14);
    }
}
