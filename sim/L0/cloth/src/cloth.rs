//! Rectangular cloth: particle grid, triangle mesh and constraint graph.
//!
//! The grid lies in the XZ plane, centred on the origin, with `width`
//! particles along X and `height` along Z. Row `j = 0` is the top edge; its
//! two corners are pinned and serve as LRA anchors.
//!
//! ```text
//!   P───●───●───P      j = 0 (pinned corners P)
//!   │ ╱ │ ╱ │ ╱ │
//!   ●───●───●───●
//!   │ ╱ │ ╱ │ ╱ │
//!   ●───●───●───●
//! ```
//!
//! Each cell `(i, j)` is split into triangles `[tl, bl, tr]` and
//! `[tr, bl, br]`, whose normals face +Y while the cloth is flat.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::constraints::{
    ConstraintSet, DihedralBendingConstraint, DistanceConstraint, LraConstraint,
    SphereCollisionConstraint,
};
use crate::error::{ClothError, Result};
use crate::logger::{SolverLogger, TracingLogger};
use crate::solver::{SolverConfig, SolverStats, XpbdSolver};
use crate::types::{Particle, ParticleId, ParticleStore};

/// Unnormalized face normals shorter than this count as degenerate.
const NORMAL_EPSILON: f32 = 1e-12;

/// Configuration for a rectangular cloth.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClothConfig {
    /// Particles along X.
    pub width: usize,
    /// Particles along Z.
    pub height: usize,
    /// Side length of the cloth (m).
    pub size: f32,
    /// Mass per particle (kg).
    pub mass: f32,
    /// Add distance constraints across both cell diagonals.
    pub add_shear_constraints: bool,
    /// Tether every free particle to both pinned corners.
    pub add_lra_constraints: bool,
    /// Add dihedral bending across interior vertical grid edges.
    pub add_bending_constraints: bool,
    /// Also add dihedral bending across interior horizontal grid edges.
    pub add_vertical_bending: bool,
    /// Fraction a tether may stretch past its rest distance.
    pub lra_max_stretch: f32,
    /// Compliance of structural distance constraints (0 = inextensible).
    pub distance_compliance: f32,
    /// Compliance of shear distance constraints.
    pub shear_compliance: f32,
    /// Compliance of bending constraints (0 = rigid, larger = more flexible).
    pub bending_compliance: f32,
    /// Compliance of tethers.
    pub lra_compliance: f32,
    /// Compliance of sphere collisions.
    pub collision_compliance: f32,
    /// Solver configuration.
    pub solver: SolverConfig,
}

impl Default for ClothConfig {
    fn default() -> Self {
        Self {
            width: 20,
            height: 20,
            size: 3.0,
            mass: 1.0,
            add_shear_constraints: true,
            add_lra_constraints: true,
            add_bending_constraints: true,
            add_vertical_bending: false,
            lra_max_stretch: 0.1,
            distance_compliance: 1e-8,
            shear_compliance: 1e-7,
            bending_compliance: 1e-3,
            lra_compliance: 0.0,
            collision_compliance: 1e-10,
            solver: SolverConfig::default(),
        }
    }
}

impl ClothConfig {
    /// Create a config for cotton fabric.
    #[must_use]
    pub fn cotton() -> Self {
        Self {
            distance_compliance: 1e-6,
            shear_compliance: 1e-5,
            bending_compliance: 1e-2,
            lra_max_stretch: 0.1,
            ..Self::default()
        }
    }

    /// Create a config for silk fabric (light, very flexible).
    #[must_use]
    pub fn silk() -> Self {
        Self {
            mass: 0.25,
            distance_compliance: 1e-5,
            shear_compliance: 1e-4,
            bending_compliance: 0.1,
            lra_max_stretch: 0.2,
            ..Self::default()
        }
    }

    /// Create a config for stiff fabric (canvas, denim).
    #[must_use]
    pub fn stiff() -> Self {
        Self {
            distance_compliance: 0.0,
            shear_compliance: 1e-8,
            bending_compliance: 1e-4,
            add_vertical_bending: true,
            lra_max_stretch: 0.02,
            solver: SolverConfig::accurate(),
            ..Self::default()
        }
    }

    /// Set the grid resolution.
    #[must_use]
    pub const fn with_grid(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the side length.
    #[must_use]
    pub const fn with_size(mut self, size: f32) -> Self {
        self.size = size;
        self
    }

    /// Set the solver configuration.
    #[must_use]
    pub const fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Number of particles.
    #[must_use]
    pub const fn particle_count(&self) -> usize {
        self.width * self.height
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the grid, size, mass, a compliance or the solver
    /// configuration is out of range.
    pub fn validate(&self) -> Result<()> {
        let dimensions_error = || ClothError::InvalidDimensions {
            width: self.width,
            height: self.height,
        };

        if self.width < 2 || self.height < 2 {
            return Err(dimensions_error());
        }
        // Triangle indices are u32
        let count = self
            .width
            .checked_mul(self.height)
            .ok_or_else(dimensions_error)?;
        if u32::try_from(count).is_err() {
            return Err(dimensions_error());
        }

        if !(self.size > 0.0 && self.size.is_finite()) {
            return Err(ClothError::InvalidSize(self.size));
        }
        if !(self.mass > 0.0 && self.mass.is_finite()) {
            return Err(ClothError::InvalidMass(self.mass));
        }

        let non_negative = [
            ("lra_max_stretch", self.lra_max_stretch),
            ("distance_compliance", self.distance_compliance),
            ("shear_compliance", self.shear_compliance),
            ("bending_compliance", self.bending_compliance),
            ("lra_compliance", self.lra_compliance),
            ("collision_compliance", self.collision_compliance),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ClothError::invalid_config(format!(
                    "{name} must be non-negative and finite, got {value}"
                )));
            }
        }

        self.solver.validate()
    }
}

/// Sphere collider in cloth space.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sphere {
    /// Centre.
    pub center: Point3<f32>,
    /// Radius.
    pub radius: f32,
}

/// A rectangular XPBD cloth.
///
/// Owns the particles, the constraints and the solver. The exposed
/// `positions`, `normals` and `indices` buffers are what a renderer
/// consumes; positions and normals are refreshed after every [`Cloth::step`].
#[derive(Debug, Clone)]
pub struct Cloth<L: SolverLogger = TracingLogger> {
    config: ClothConfig,
    particles: ParticleStore,
    constraints: ConstraintSet,
    solver: XpbdSolver<L>,
    anchors: [ParticleId; 2],
    positions: Vec<Point3<f32>>,
    normals: Vec<Vector3<f32>>,
    indices: Vec<u32>,
    collision_sphere: Option<Sphere>,
}

impl Cloth {
    /// Build a cloth that logs through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ClothConfig) -> Result<Self> {
        Self::with_logger(config, TracingLogger)
    }
}

impl<L: SolverLogger> Cloth<L> {
    /// Build a cloth whose solver reports to `logger`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_logger(config: ClothConfig, logger: L) -> Result<Self> {
        config.validate()?;

        let ClothConfig {
            width,
            height,
            size,
            mass,
            ..
        } = config;

        let half = 0.5 * size;
        let dx = size / (width - 1) as f32;
        let dz = size / (height - 1) as f32;

        let mut particles = Vec::with_capacity(width * height);
        for j in 0..height {
            for i in 0..width {
                let position = Point3::new(-half + i as f32 * dx, 0.0, -half + j as f32 * dz);
                particles.push(Particle::new(position, mass));
            }
        }

        let anchors = [ParticleId(0), ParticleId(width - 1)];
        for anchor in anchors {
            particles[anchor.index()].pin();
        }

        let particles = ParticleStore::new(particles);
        let positions = particles.iter().map(|p| p.position).collect();
        let normals = vec![Vector3::y(); particles.len()];

        let mut cloth = Self {
            config,
            particles,
            constraints: ConstraintSet::new(),
            solver: XpbdSolver::with_logger(config.solver, logger),
            anchors,
            positions,
            normals,
            indices: Self::grid_indices(width, height),
            collision_sphere: None,
        };

        cloth.recompute_normals();
        cloth.build_constraints();

        tracing::debug!(
            width,
            height,
            particles = cloth.particles.len(),
            constraints = cloth.constraints.len(),
            "cloth built"
        );

        Ok(cloth)
    }

    /// Two triangles per cell, `[tl, bl, tr]` and `[tr, bl, br]`.
    // `validate` guarantees the particle count fits in u32
    fn grid_indices(width: usize, height: usize) -> Vec<u32> {
        let mut indices = Vec::with_capacity((width - 1) * (height - 1) * 6);
        for j in 0..height - 1 {
            for i in 0..width - 1 {
                let tl = (j * width + i) as u32;
                let tr = tl + 1;
                let bl = tl + width as u32;
                let br = bl + 1;
                indices.extend_from_slice(&[tl, bl, tr, tr, bl, br]);
            }
        }
        indices
    }

    /// Handle of the particle at column `i`, row `j`.
    #[must_use]
    pub const fn grid_index(&self, i: usize, j: usize) -> Option<ParticleId> {
        if i < self.config.width && j < self.config.height {
            Some(ParticleId(j * self.config.width + i))
        } else {
            None
        }
    }

    const fn id(&self, i: usize, j: usize) -> ParticleId {
        ParticleId(j * self.config.width + i)
    }

    /// Rebuild the structural, shear, LRA and bending constraints.
    ///
    /// Rest values are measured from the current particle positions.
    /// Collision constraints are left untouched.
    pub fn build_constraints(&mut self) {
        let ClothConfig {
            width,
            height,
            distance_compliance,
            shear_compliance,
            ..
        } = self.config;

        self.constraints.clear_structural();

        // Structural: horizontal, then vertical
        for j in 0..height {
            for i in 0..width - 1 {
                self.push_distance(self.id(i, j), self.id(i + 1, j), distance_compliance);
            }
        }
        for j in 0..height - 1 {
            for i in 0..width {
                self.push_distance(self.id(i, j), self.id(i, j + 1), distance_compliance);
            }
        }

        if self.config.add_shear_constraints {
            for j in 0..height - 1 {
                for i in 0..width - 1 {
                    self.push_distance(self.id(i, j), self.id(i + 1, j + 1), shear_compliance);
                    self.push_distance(self.id(i + 1, j), self.id(i, j + 1), shear_compliance);
                }
            }
        }

        if self.config.add_bending_constraints {
            self.build_bending();
        }

        if self.config.add_lra_constraints {
            self.build_lra();
        }

        tracing::debug!(
            distance = self.constraints.distance().len(),
            bending = self.constraints.bending().len(),
            lra = self.constraints.lra().len(),
            "constraints built"
        );
    }

    fn push_distance(&mut self, a: ParticleId, b: ParticleId, compliance: f32) {
        let constraint = DistanceConstraint::from_positions(a, b, &self.particles, compliance);
        self.constraints.push_distance(constraint);
    }

    fn build_bending(&mut self) {
        let ClothConfig {
            width,
            height,
            bending_compliance,
            add_vertical_bending,
            ..
        } = self.config;

        // Triangles [tr, bl, br] of cell i and [tl, bl, tr] of cell i + 1
        // share the edge (i+1, j)-(i+1, j+1).
        for j in 0..height - 1 {
            for i in 0..width.saturating_sub(2) {
                let ids = [
                    self.id(i + 1, j),
                    self.id(i + 1, j + 1),
                    self.id(i, j + 1),
                    self.id(i + 2, j),
                ];
                self.push_bending(ids, bending_compliance);
            }
        }

        // Triangles [tr, bl, br] of cell j and [tl, bl, tr] of cell j + 1
        // share the edge (i, j+1)-(i+1, j+1).
        if add_vertical_bending {
            for j in 0..height.saturating_sub(2) {
                for i in 0..width - 1 {
                    let ids = [
                        self.id(i, j + 1),
                        self.id(i + 1, j + 1),
                        self.id(i + 1, j),
                        self.id(i, j + 2),
                    ];
                    self.push_bending(ids, bending_compliance);
                }
            }
        }
    }

    fn push_bending(&mut self, ids: [ParticleId; 4], compliance: f32) {
        let constraint =
            DihedralBendingConstraint::from_positions(ids, &self.particles, compliance);
        self.constraints.push_bending(constraint);
    }

    fn build_lra(&mut self) {
        let ClothConfig {
            lra_max_stretch,
            lra_compliance,
            ..
        } = self.config;

        for id in self.particles.ids() {
            if self.particles[id].is_static() || self.anchors.contains(&id) {
                continue;
            }
            for anchor in self.anchors {
                self.constraints.push_lra(LraConstraint::from_positions(
                    id,
                    anchor,
                    &self.particles,
                    lra_max_stretch,
                    lra_compliance,
                ));
            }
        }
    }

    /// Replace the collision set with one sphere constraint per particle.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::InvalidCollider`] for a non-finite centre or a
    /// non-positive radius. The existing collision set is kept in that case.
    pub fn initialize_collisions(&mut self, center: Point3<f32>, radius: f32) -> Result<()> {
        if !center.iter().all(|c| c.is_finite()) {
            return Err(ClothError::invalid_collider("sphere centre must be finite"));
        }
        if !(radius > 0.0 && radius.is_finite()) {
            return Err(ClothError::invalid_collider(format!(
                "sphere radius must be positive and finite, got {radius}"
            )));
        }

        let compliance = self.config.collision_compliance;
        self.constraints.clear_collisions();
        for id in self.particles.ids() {
            self.constraints
                .push_collision(SphereCollisionConstraint::new(id, center, radius, compliance));
        }
        self.collision_sphere = Some(Sphere { center, radius });

        let count = self.constraints.collisions().len();
        self.solver
            .logger_mut()
            .collisions_rebuilt(count, center, radius);
        Ok(())
    }

    /// Remove every collision constraint.
    pub fn clear_collisions(&mut self) {
        let count = self.constraints.collisions().len();
        self.constraints.clear_collisions();
        self.collision_sphere = None;
        self.solver.logger_mut().collisions_cleared(count);
    }

    /// Toggle whether collision constraints take part in solving.
    pub const fn set_use_xpbd_collision(&mut self, enabled: bool) {
        self.solver.config_mut().use_xpbd_collision = enabled;
    }

    /// Recompute per-vertex normals from the current positions.
    ///
    /// Face normals follow the index winding, are averaged per vertex and
    /// normalized. Degenerate faces and vertices fall back to +Y.
    pub fn recompute_normals(&mut self) {
        self.normals.fill(Vector3::zeros());

        for triangle in self.indices.chunks_exact(3) {
            let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
            let p0 = self.particles[ParticleId(a)].position;
            let p1 = self.particles[ParticleId(b)].position;
            let p2 = self.particles[ParticleId(c)].position;

            let normal = (p1 - p0).cross(&(p2 - p0));
            let length = normal.norm();
            let face = if length > NORMAL_EPSILON && length.is_finite() {
                normal / length
            } else {
                Vector3::y()
            };

            self.normals[a] += face;
            self.normals[b] += face;
            self.normals[c] += face;
        }

        for normal in &mut self.normals {
            *normal = normal
                .try_normalize(NORMAL_EPSILON)
                .unwrap_or_else(Vector3::y);
        }
    }

    /// Advance the simulation by `dt` seconds and refresh the surface.
    pub fn step(&mut self, dt: f32) {
        self.solver
            .step(&mut self.particles, &mut self.constraints, dt);
        self.recompute_normals();
        for (position, particle) in self.positions.iter_mut().zip(self.particles.iter()) {
            *position = particle.position;
        }
    }

    /// Accumulate an external force on one particle until the end of the
    /// next step.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::IndexOutOfBounds`] for a dangling handle.
    pub fn apply_force(&mut self, id: ParticleId, force: Vector3<f32>) -> Result<()> {
        self.particles.check(id)?;
        self.particles[id].apply_force(force);
        Ok(())
    }

    /// Particle positions after the last step.
    #[must_use]
    pub fn positions(&self) -> &[Point3<f32>] {
        &self.positions
    }

    /// Per-vertex normals after the last step.
    #[must_use]
    pub fn normals(&self) -> &[Vector3<f32>] {
        &self.normals
    }

    /// Triangle indices, six per grid cell.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// The particles.
    #[must_use]
    pub const fn particles(&self) -> &ParticleStore {
        &self.particles
    }

    /// The constraints.
    #[must_use]
    pub const fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// The current configuration.
    ///
    /// The `solver` field is read from the solver, so changes made through
    /// [`Cloth::solver_mut`] show up here.
    #[must_use]
    pub const fn config(&self) -> ClothConfig {
        ClothConfig {
            solver: *self.solver.config(),
            ..self.config
        }
    }

    /// The pinned corners that anchor the tethers.
    #[must_use]
    pub const fn anchors(&self) -> [ParticleId; 2] {
        self.anchors
    }

    /// The current collision sphere, if any.
    #[must_use]
    pub const fn collision_sphere(&self) -> Option<Sphere> {
        self.collision_sphere
    }

    /// Statistics from the last step.
    #[must_use]
    pub const fn stats(&self) -> &SolverStats {
        self.solver.stats()
    }

    /// The solver.
    #[must_use]
    pub const fn solver(&self) -> &XpbdSolver<L> {
        &self.solver
    }

    /// Mutable access to the solver.
    pub const fn solver_mut(&mut self) -> &mut XpbdSolver<L> {
        &mut self.solver
    }

    /// Total surface area of the triangle mesh.
    #[must_use]
    pub fn surface_area(&self) -> f32 {
        self.indices
            .chunks_exact(3)
            .map(|t| {
                let p0 = self.positions[t[0] as usize];
                let p1 = self.positions[t[1] as usize];
                let p2 = self.positions[t[2] as usize];
                0.5 * (p1 - p0).cross(&(p2 - p0)).norm()
            })
            .sum()
    }
}
