//! Control-volume finite-element assembly of steady heat conduction.
//!
//! A [`realm::Realm`] owns the mesh, the boundary conditions and one
//! [`assembly::EquationSystem`] per simulated rank. Each system's solver
//! algorithms walk their mesh part and scatter local element blocks into a
//! compressed-row linear system through a [`assembly::CoeffApplier`].

pub mod assembly;
pub mod discretization;
pub mod numerics;
pub mod physics;
pub mod processing;
pub mod realm;
