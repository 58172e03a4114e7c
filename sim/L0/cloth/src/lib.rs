//! Cloth simulation with Extended Position-Based Dynamics (XPBD).
//!
//! This crate provides a CPU-side XPBD constraint solver for a rectangular
//! cloth, offering:
//!
//! - **Particles**: A fixed-capacity arena addressed by stable handles
//! - **Constraints**: Distance, long range attachment (LRA), dihedral bending
//!   and sphere collision, each with its own compliance
//! - **Solver**: Sub-stepped predict / project / velocity-update integration
//!   with Gauss-Seidel constraint projection
//!
//! # Physics Model
//!
//! ```text
//! For each time step:
//!   1. Remember the start-of-step positions
//!   2. For each sub-step:
//!      a. Predict positions from velocity and accumulated forces
//!      b. For each solver iteration:
//!         - Solve distance constraints (stretch, shear)
//!         - Solve bending constraints
//!         - Solve LRA tethers (only when overstretched)
//!         - Solve sphere collisions (only when penetrating)
//!      c. Update velocities: v = (x - x_prev) / h, with damping
//!   3. Velocities from the whole-step displacement; clear forces
//! ```
//!
//! Each correction follows the XPBD update
//! `Δλ = (-C - α̃λ) / (Σ w|∇C|² + α̃)` with `α̃ = compliance / h²`.
//!
//! # Numerical Safety
//!
//! The per-frame loop never fails. A constraint that evaluates to a
//! non-finite value is skipped, a non-finite corrected position is
//! discarded, non-finite velocities become zero. Every recovery is counted in
//! [`SolverStats`] and reported to the injected [`SolverLogger`].
//!
//! # Quick Start
//!
//! ```
//! use sim_cloth::{Cloth, ClothConfig};
//! use nalgebra::Point3;
//!
//! # fn main() -> sim_cloth::Result<()> {
//! let mut cloth = Cloth::new(ClothConfig::default().with_grid(10, 10))?;
//!
//! // Drape over a sphere below the cloth
//! cloth.initialize_collisions(Point3::new(0.0, -1.0, 0.0), 0.5)?;
//!
//! for _ in 0..60 {
//!     cloth.step(1.0 / 60.0);
//! }
//!
//! // Hand the surface to a renderer
//! let (positions, normals, indices) = (cloth.positions(), cloth.normals(), cloth.indices());
//! assert_eq!(positions.len(), normals.len());
//! assert_eq!(indices.len(), 9 * 9 * 6);
//! # Ok(())
//! # }
//! ```
//!
//! # Layer 0 Crate
//!
//! This is a Layer 0 crate with **no rendering or engine dependencies**. It
//! exposes positions, normals and triangle indices for whatever draws them.

#![doc(html_root_url = "https://docs.rs/sim-cloth/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
// Allow precision loss when converting grid indices to f32 - these are small values
#![allow(clippy::cast_precision_loss)]
// Allow truncation from f64 multipliers and usize indices - bounds are validated
#![allow(clippy::cast_possible_truncation)]
// Allow pass by value for small Copy types
#![allow(clippy::needless_pass_by_value)]
// Test-related lints - these are style preferences
#![cfg_attr(
    test,
    allow(
        clippy::uninlined_format_args,
        clippy::float_cmp,
        clippy::expect_used,
        clippy::panic
    )
)]

pub mod cloth;
pub mod constraints;
pub mod error;
pub mod logger;
pub mod solver;
pub mod types;

// Re-export main types at crate root
pub use cloth::{Cloth, ClothConfig, Sphere};
pub use constraints::{
    ConstraintKind, ConstraintSet, DihedralBendingConstraint, DistanceConstraint, Evaluation,
    LraConstraint, Projection, SphereCollisionConstraint, XpbdConstraint, project,
};
pub use error::{ClothError, Result};
pub use logger::{NoopLogger, SolverLogger, TracingLogger};
pub use solver::{SolverConfig, SolverPhase, SolverStats, XpbdSolver};
pub use types::{Particle, ParticleFlags, ParticleId, ParticleStore};
