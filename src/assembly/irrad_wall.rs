use nalgebra::{DMatrix, DVector};
use num_dual::{Dual64, DualNum};

use crate::assembly::{
    register_part_connectivity, run_object_loop, validate_pass, AssemblyContext, AssemblyError,
    ConnectivityCache, ScratchViews, SolverAlgorithm,
};
use crate::discretization::fields::names;
use crate::discretization::master_element::Tri3Scs;
use crate::discretization::mesh::{Mesh, MeshObject};
use crate::numerics::sparse::GraphBuilder;
use crate::physics::ElemDataRequests;

pub const STEFAN_BOLTZMANN: f64 = 5.670374419e-8;

/// Net radiative flux into the wall, `ε (H - σ T⁴)`.
#[inline]
pub fn irradiation_flux<T: DualNum<f64>>(t: T, irradiation: f64, emissivity: f64, sigma: f64) -> T {
    let eps = T::from(emissivity);
    let h = T::from(irradiation);
    let sigma = T::from(sigma);
    eps * (h - sigma * t.powi(4))
}

/// Radiating wall of a conduction equation.
///
/// Every sub-control surface adds `q |A|` to the node it belongs to, with the
/// Jacobian `-dq/dT N_ic |A|` taken from a forward-mode dual number.
#[derive(Debug)]
pub struct AssembleHeatCondIrradWallSolverAlgorithm {
    part_name: String,
    use_shifted: bool,
    sigma: f64,
    requests: ElemDataRequests,
    cache: Option<ConnectivityCache>,
}

impl AssembleHeatCondIrradWallSolverAlgorithm {
    pub fn new(part_name: impl Into<String>, use_shifted: bool) -> Self {
        let mut requests = ElemDataRequests::default();
        requests.add_gathered_nodal_field(names::TEMPERATURE, 1);
        requests.add_gathered_nodal_field(names::IRRADIATION, 1);
        requests.add_gathered_nodal_field(names::EMISSIVITY, 1);
        requests.add_entity_field(names::EXPOSED_AREA_VECTOR, 3 * Tri3Scs::NUM_IP);
        Self {
            part_name: part_name.into(),
            use_shifted,
            sigma: STEFAN_BOLTZMANN,
            requests,
            cache: None,
        }
    }

    pub fn with_stefan_boltzmann(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    fn face_contribution(&self, lhs: &mut DMatrix<f64>, rhs: &mut DVector<f64>, views: &ScratchViews) {
        let (Some(t), Some(h), Some(e), Some(areas)) = (
            views.nodal(names::TEMPERATURE),
            views.nodal(names::IRRADIATION),
            views.nodal(names::EMISSIVITY),
            views.entity(names::EXPOSED_AREA_VECTOR),
        ) else {
            return;
        };

        let me = Tri3Scs;
        let shape = if self.use_shifted {
            me.shifted_shape_fcn()
        } else {
            me.shape_fcn()
        };
        let implicit = !lhs.is_empty();

        for (ip, &nearest) in me.ip_node_map().iter().enumerate() {
            let r = &shape[ip];
            let interp = |v: &[f64]| r.iter().zip(v).map(|(ri, vi)| ri * vi).sum::<f64>();
            let (t_ip, h_ip, e_ip) = (interp(t), interp(h), interp(e));
            let a = &areas[3 * ip..3 * ip + 3];
            let a_mag = a.iter().map(|ai| ai * ai).sum::<f64>().sqrt();

            let q = irradiation_flux(Dual64::from_re(t_ip).derivative(), h_ip, e_ip, self.sigma);
            rhs[nearest] += q.re * a_mag;
            if implicit {
                for (ic, ri) in r.iter().enumerate() {
                    lhs[(nearest, ic)] -= q.eps * ri * a_mag;
                }
            }
        }
    }
}

impl SolverAlgorithm for AssembleHeatCondIrradWallSolverAlgorithm {
    fn name(&self) -> &str {
        "heat_cond_irrad_wall"
    }

    fn part_name(&self) -> &str {
        &self.part_name
    }

    fn initialize_connectivity(
        &mut self,
        mesh: &Mesh,
        graph: &mut GraphBuilder,
    ) -> Result<(), AssemblyError> {
        self.cache = Some(register_part_connectivity(mesh, &self.part_name, 1, graph)?);
        Ok(())
    }

    fn validate(&self, ctx: &AssemblyContext<'_>) -> Result<Vec<MeshObject>, AssemblyError> {
        validate_pass(ctx, &self.part_name, self.cache.as_ref(), &self.requests)
    }

    fn execute(
        &self,
        ctx: &AssemblyContext<'_>,
        objects: &[MeshObject],
    ) -> Result<(), AssemblyError> {
        run_object_loop(
            ctx,
            objects,
            &self.requests,
            true,
            self.name(),
            |lhs, rhs, _object: MeshObject, views| self.face_contribution(lhs, rhs, views),
        )
    }
}
