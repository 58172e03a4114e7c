//! XPBD (Extended Position-Based Dynamics) solver for cloth.
//!
//! # Algorithm Overview
//!
//! ```text
//! For each step of length dt:
//!   BeginStep: remember x₀ = x for free particles
//!   For each of N sub-steps (h = dt / N):
//!     Predict:  x_old = x; f += g; x += v h + ½ f w h²
//!     Project:  K Gauss-Seidel passes over distance, bending, LRA, collision
//!     Velocity: v = (x - x_old) / h, with adaptive damping
//!   EndStep:   v = (x - x₀) / dt; f = 0
//! ```
//!
//! Lagrange multipliers accumulate across sub-steps and steps unless
//! [`SolverConfig::reset_multipliers`] is set.
//!
//! Forces accumulate over the sub-steps of a step and are only cleared in
//! `EndStep`.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::constraints::{ConstraintSet, Projection, XpbdConstraint, project};
use crate::error::{ClothError, Result};
use crate::logger::{SolverLogger, TracingLogger};
use crate::types::{ParticleId, ParticleStore};

/// Where the solver is within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SolverPhase {
    /// Between steps.
    #[default]
    Idle,
    /// Integrating forces into predicted positions.
    Predicting,
    /// Running constraint passes.
    Projecting,
    /// Deriving velocities from the sub-step displacement.
    VelocityUpdate,
    /// Deriving step velocities and clearing forces.
    Finalizing,
}

/// Configuration for the XPBD solver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverConfig {
    /// Gauss-Seidel passes per sub-step.
    /// Typical range: 4-20.
    pub iterator_count: u32,

    /// Sub-steps per step.
    /// Typical range: 1-8.
    pub sub_iterator_count: u32,

    /// Whether sphere collision constraints take part in projection.
    pub use_xpbd_collision: bool,

    /// Constant force (N) applied to every free particle.
    pub gravity: Vector3<f32>,

    /// Velocity damping below `high_speed_threshold`.
    /// 0 = no damping, 1 = full damping.
    pub damping: f32,

    /// Velocity damping above `high_speed_threshold`.
    pub high_speed_damping: f32,

    /// Speed (m/s) above which `high_speed_damping` applies.
    pub high_speed_threshold: f32,

    /// Zero every Lagrange multiplier at the start of each step.
    pub reset_multipliers: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iterator_count: 10,
            sub_iterator_count: 4,
            use_xpbd_collision: true,
            gravity: Vector3::new(0.0, -9.8, 0.0),
            damping: 0.001,
            high_speed_damping: 0.05,
            high_speed_threshold: 10.0,
            reset_multipliers: false,
        }
    }
}

impl SolverConfig {
    /// Create a config optimized for real-time simulation.
    #[must_use]
    pub fn realtime() -> Self {
        Self {
            iterator_count: 4,
            sub_iterator_count: 2,
            damping: 0.01,
            high_speed_damping: 0.1,
            ..Self::default()
        }
    }

    /// Create a config optimized for accuracy.
    #[must_use]
    pub fn accurate() -> Self {
        Self {
            iterator_count: 20,
            sub_iterator_count: 8,
            damping: 0.0005,
            high_speed_damping: 0.02,
            high_speed_threshold: 20.0,
            ..Self::default()
        }
    }

    /// Set the gravity vector.
    #[must_use]
    pub const fn with_gravity(mut self, gravity: Vector3<f32>) -> Self {
        self.gravity = gravity;
        self
    }

    /// Set the pass and sub-step counts.
    #[must_use]
    pub const fn with_iterations(mut self, iterator_count: u32, sub_iterator_count: u32) -> Self {
        self.iterator_count = iterator_count;
        self.sub_iterator_count = sub_iterator_count;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.iterator_count == 0 {
            return Err(ClothError::invalid_config(
                "iterator_count must be at least 1",
            ));
        }
        if self.sub_iterator_count == 0 {
            return Err(ClothError::invalid_config(
                "sub_iterator_count must be at least 1",
            ));
        }
        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(ClothError::invalid_config("gravity must be finite"));
        }
        if !(0.0..=1.0).contains(&self.damping) {
            return Err(ClothError::invalid_config(format!(
                "damping must be in [0, 1], got {}",
                self.damping
            )));
        }
        if !(0.0..=1.0).contains(&self.high_speed_damping) {
            return Err(ClothError::invalid_config(format!(
                "high_speed_damping must be in [0, 1], got {}",
                self.high_speed_damping
            )));
        }
        if self.high_speed_threshold.is_nan() || self.high_speed_threshold <= 0.0 {
            return Err(ClothError::invalid_config(format!(
                "high_speed_threshold must be positive, got {}",
                self.high_speed_threshold
            )));
        }
        Ok(())
    }
}

/// Statistics from a solver step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverStats {
    /// Sub-steps performed.
    pub substeps: u32,
    /// Gauss-Seidel passes performed over all sub-steps.
    pub passes: u32,
    /// Projections that changed a multiplier.
    pub projections_applied: usize,
    /// Projections that found the constraint already satisfied.
    pub satisfied: usize,
    /// Constraints skipped because their value was not finite.
    pub constraints_skipped: usize,
    /// Position corrections discarded because they were not finite.
    pub corrections_discarded: usize,
    /// Velocities replaced with zero because they were not finite.
    pub velocities_reset: usize,
    /// Largest `|C|` seen in the final pass of the final sub-step.
    pub max_violation: f32,
    /// Total kinetic energy after the step.
    pub kinetic_energy: f32,
}

/// XPBD solver for cloth.
///
/// The logger is a capability passed in at construction. It defaults to
/// [`TracingLogger`].
#[derive(Debug, Clone)]
pub struct XpbdSolver<L: SolverLogger = TracingLogger> {
    config: SolverConfig,
    logger: L,
    stats: SolverStats,
    phase: SolverPhase,
}

impl Default for XpbdSolver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl XpbdSolver {
    /// Create a new solver that logs through `tracing`.
    #[must_use]
    pub fn new(config: SolverConfig) -> Self {
        Self::with_logger(config, TracingLogger)
    }
}

impl<L: SolverLogger> XpbdSolver<L> {
    /// Create a new solver reporting to `logger`.
    #[must_use]
    pub fn with_logger(config: SolverConfig, logger: L) -> Self {
        Self {
            config,
            logger,
            stats: SolverStats::default(),
            phase: SolverPhase::Idle,
        }
    }

    /// Get the solver configuration.
    #[must_use]
    pub const fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Set the solver configuration.
    pub const fn set_config(&mut self, config: SolverConfig) {
        self.config = config;
    }

    /// Mutable access to the solver configuration.
    pub const fn config_mut(&mut self) -> &mut SolverConfig {
        &mut self.config
    }

    /// Get statistics from the last step.
    #[must_use]
    pub const fn stats(&self) -> &SolverStats {
        &self.stats
    }

    /// Current phase. [`SolverPhase::Idle`] outside of [`Self::step`].
    #[must_use]
    pub const fn phase(&self) -> SolverPhase {
        self.phase
    }

    /// Get the logger.
    #[must_use]
    pub const fn logger(&self) -> &L {
        &self.logger
    }

    /// Mutable access to the logger.
    pub const fn logger_mut(&mut self) -> &mut L {
        &mut self.logger
    }

    /// Advance the simulation by `dt` seconds.
    ///
    /// A non-positive or non-finite `dt` leaves everything untouched.
    pub fn step(
        &mut self,
        particles: &mut ParticleStore,
        constraints: &mut ConstraintSet,
        dt: f32,
    ) {
        if !(dt > 0.0 && dt.is_finite()) {
            self.logger.step_rejected(dt);
            return;
        }

        let substeps = self.config.sub_iterator_count.max(1);
        let sub_dt = dt / substeps as f32;
        let mut stats = SolverStats {
            substeps,
            ..SolverStats::default()
        };

        if self.config.reset_multipliers {
            constraints.reset_lambdas();
        }

        Self::begin_step(particles);

        for substep in 0..substeps {
            self.enter(SolverPhase::Predicting, substep);
            self.predict(particles, sub_dt);

            self.enter(SolverPhase::Projecting, substep);
            let last_substep = substep + 1 == substeps;
            self.project_all(particles, constraints, sub_dt, last_substep, &mut stats);

            self.enter(SolverPhase::VelocityUpdate, substep);
            self.update_velocities(particles, sub_dt, &mut stats);
        }

        self.enter(SolverPhase::Finalizing, substeps - 1);
        self.end_step(particles, dt, &mut stats);

        stats.kinetic_energy = particles.kinetic_energy();
        self.phase = SolverPhase::Idle;
        self.logger.step_completed(&stats);
        self.stats = stats;
    }

    fn enter(&mut self, phase: SolverPhase, substep: u32) {
        self.phase = phase;
        self.logger.phase_entered(phase, substep);
    }

    /// Record where every free particle starts the step.
    fn begin_step(particles: &mut ParticleStore) {
        for particle in particles.iter_mut().filter(|p| !p.is_static()) {
            particle.position_initial = particle.position;
        }
    }

    /// Accumulate gravity and integrate to predicted positions.
    fn predict(&self, particles: &mut ParticleStore, sub_dt: f32) {
        let gravity = self.config.gravity;
        let half_dt_sq = 0.5 * sub_dt * sub_dt;

        for particle in particles.iter_mut() {
            if particle.is_static() {
                continue;
            }
            particle.old_position = particle.position;
            particle.apply_force(gravity);
            particle.position += particle.velocity * sub_dt
                + particle.force * (particle.inverse_mass * half_dt_sq);
        }
    }

    /// Run `iterator_count` Gauss-Seidel passes in the fixed category order.
    fn project_all(
        &mut self,
        particles: &mut ParticleStore,
        constraints: &mut ConstraintSet,
        sub_dt: f32,
        last_substep: bool,
        stats: &mut SolverStats,
    ) {
        let passes = self.config.iterator_count;
        let collide = self.config.use_xpbd_collision;

        for pass in 0..passes {
            let track = last_substep && pass + 1 == passes;
            if track {
                stats.max_violation = 0.0;
            }

            self.project_slice(constraints.distance_mut(), particles, sub_dt, track, stats);
            self.project_slice(constraints.bending_mut(), particles, sub_dt, track, stats);
            self.project_slice(constraints.lra_mut(), particles, sub_dt, track, stats);
            if collide {
                self.project_slice(constraints.collisions_mut(), particles, sub_dt, track, stats);
            }
            stats.passes += 1;
        }
    }

    fn project_slice<C: XpbdConstraint>(
        &mut self,
        constraints: &mut [C],
        particles: &mut ParticleStore,
        sub_dt: f32,
        track: bool,
        stats: &mut SolverStats,
    ) {
        for (index, constraint) in constraints.iter_mut().enumerate() {
            match project(constraint, particles, sub_dt) {
                Projection::Satisfied => stats.satisfied += 1,
                Projection::NonFinite(value) => {
                    stats.constraints_skipped += 1;
                    self.logger.constraint_skipped(constraint.kind(), index, value);
                }
                Projection::Applied {
                    value, discarded, ..
                } => {
                    stats.projections_applied += 1;
                    if track {
                        stats.max_violation = stats.max_violation.max(value.abs());
                    }
                    for particle in discarded {
                        stats.corrections_discarded += 1;
                        self.logger
                            .correction_discarded(constraint.kind(), index, particle);
                    }
                }
            }
        }
    }

    /// Derive sub-step velocities from the displacement and damp them.
    fn update_velocities(
        &mut self,
        particles: &mut ParticleStore,
        sub_dt: f32,
        stats: &mut SolverStats,
    ) {
        let SolverConfig {
            damping,
            high_speed_damping,
            high_speed_threshold,
            ..
        } = self.config;

        for (index, particle) in particles.iter_mut().enumerate() {
            if particle.is_static() {
                continue;
            }

            let mut velocity = (particle.position - particle.old_position) / sub_dt;
            if !velocity.iter().all(|v| v.is_finite()) {
                velocity = Vector3::zeros();
                stats.velocities_reset += 1;
                self.logger.velocity_reset(ParticleId(index));
            }

            let factor = if velocity.norm() > high_speed_threshold {
                1.0 - high_speed_damping
            } else {
                1.0 - damping
            };
            particle.velocity = velocity * factor;
        }
    }

    /// Replace velocities with the whole-step displacement and clear forces.
    fn end_step(&mut self, particles: &mut ParticleStore, dt: f32, stats: &mut SolverStats) {
        for (index, particle) in particles.iter_mut().enumerate() {
            if !particle.is_static() {
                let velocity = (particle.position - particle.position_initial) / dt;
                particle.velocity = if velocity.iter().all(|v| v.is_finite()) {
                    velocity
                } else {
                    stats.velocities_reset += 1;
                    self.logger.velocity_reset(ParticleId(index));
                    Vector3::zeros()
                };
            }
            particle.reset_force();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{
        ConstraintKind, DistanceConstraint, LraConstraint, SphereCollisionConstraint,
    };
    use crate::logger::NoopLogger;
    use crate::types::Particle;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    /// Records every event for inspection.
    #[derive(Debug, Default)]
    struct RecordingLogger {
        phases: Vec<(SolverPhase, u32)>,
        skipped: Vec<(ConstraintKind, usize)>,
        completed: usize,
    }

    impl SolverLogger for RecordingLogger {
        fn phase_entered(&mut self, phase: SolverPhase, substep: u32) {
            self.phases.push((phase, substep));
        }

        fn constraint_skipped(&mut self, kind: ConstraintKind, index: usize, _value: f32) {
            self.skipped.push((kind, index));
        }

        fn step_completed(&mut self, _stats: &SolverStats) {
            self.completed += 1;
        }
    }

    fn pendulum() -> (ParticleStore, ConstraintSet) {
        let particles = ParticleStore::new(vec![
            Particle::pinned(Point3::origin()),
            Particle::new(Point3::new(1.0, 0.0, 0.0), 1.0),
        ]);
        let mut constraints = ConstraintSet::new();
        constraints.push_distance(DistanceConstraint::new(
            ParticleId(0),
            ParticleId(1),
            1.0,
            0.0,
        ));
        (particles, constraints)
    }

    #[test]
    fn test_solver_config_default() {
        let config = SolverConfig::default();
        assert_eq!(config.iterator_count, 10);
        assert_eq!(config.sub_iterator_count, 4);
        assert!(config.use_xpbd_collision);
        assert!(!config.reset_multipliers);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_solver_config_presets() {
        let realtime = SolverConfig::realtime();
        let accurate = SolverConfig::accurate();
        assert!(realtime.iterator_count < accurate.iterator_count);
        assert!(realtime.sub_iterator_count < accurate.sub_iterator_count);
        assert!(realtime.validate().is_ok());
        assert!(accurate.validate().is_ok());
    }

    #[test]
    fn test_solver_config_validation() {
        assert!(SolverConfig::default().with_iterations(0, 4).validate().is_err());
        assert!(SolverConfig::default().with_iterations(4, 0).validate().is_err());
        assert!(
            SolverConfig::default()
                .with_gravity(Vector3::new(0.0, f32::NAN, 0.0))
                .validate()
                .is_err()
        );

        let config = SolverConfig {
            damping: 1.5,
            ..SolverConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SolverConfig {
            high_speed_threshold: 0.0,
            ..SolverConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_free_fall() {
        let mut particles = ParticleStore::new(vec![Particle::new(Point3::origin(), 1.0)]);
        let mut constraints = ConstraintSet::new();
        let config = SolverConfig {
            damping: 0.0,
            ..SolverConfig::default()
        };
        let mut solver = XpbdSolver::with_logger(config, NoopLogger);

        solver.step(&mut particles, &mut constraints, 1.0 / 60.0);

        let particle = &particles[ParticleId(0)];
        assert!(particle.position.y < 0.0);
        assert!(particle.velocity.y < 0.0);
        assert_eq!(particle.position.x, 0.0);
        assert_eq!(particle.force, Vector3::zeros(), "forces cleared at step end");
        assert_eq!(solver.phase(), SolverPhase::Idle);
    }

    #[test]
    fn test_gravity_is_a_force() {
        let fall = |mass: f32| {
            let mut particles = ParticleStore::new(vec![Particle::new(Point3::origin(), mass)]);
            let config = SolverConfig {
                damping: 0.0,
                ..SolverConfig::default().with_iterations(1, 1)
            };
            let mut solver = XpbdSolver::with_logger(config, NoopLogger);
            solver.step(&mut particles, &mut ConstraintSet::new(), 0.1);
            particles[ParticleId(0)].position.y
        };

        // ½ F w h² with F = -9.8, h = 0.1
        assert_relative_eq!(fall(1.0), -0.049, epsilon = 1e-6);
        assert_relative_eq!(fall(2.0), -0.0245, epsilon = 1e-6);
        assert_relative_eq!(fall(0.5), -0.098, epsilon = 1e-6);
    }

    #[test]
    fn test_begin_step_skips_static_particles() {
        let (mut particles, mut constraints) = pendulum();
        let marker = Point3::new(7.0, 7.0, 7.0);
        particles[ParticleId(0)].position_initial = marker;
        let mut solver = XpbdSolver::with_logger(SolverConfig::default(), NoopLogger);

        solver.step(&mut particles, &mut constraints, 1.0 / 60.0);

        assert_eq!(particles[ParticleId(0)].position_initial, marker);
        assert_eq!(particles[ParticleId(1)].position_initial, Point3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_end_step_velocity_is_step_displacement() {
        let mut particles = ParticleStore::new(vec![Particle::new(Point3::origin(), 1.0)]);
        let mut constraints = ConstraintSet::new();
        let mut solver = XpbdSolver::with_logger(SolverConfig::default(), NoopLogger);
        let dt = 1.0 / 60.0;

        solver.step(&mut particles, &mut constraints, dt);

        let particle = &particles[ParticleId(0)];
        let expected = (particle.position - particle.position_initial) / dt;
        assert_relative_eq!(particle.velocity, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_pinned_particle_untouched() {
        let (mut particles, mut constraints) = pendulum();
        let mut solver = XpbdSolver::with_logger(SolverConfig::default(), NoopLogger);

        for _ in 0..30 {
            solver.step(&mut particles, &mut constraints, 1.0 / 60.0);
        }

        assert_eq!(particles[ParticleId(0)].position, Point3::origin());
        assert_eq!(particles[ParticleId(0)].velocity, Vector3::zeros());
    }

    #[test]
    fn test_pendulum_keeps_length() {
        let (mut particles, mut constraints) = pendulum();
        let mut solver = XpbdSolver::with_logger(SolverConfig::default(), NoopLogger);

        for _ in 0..60 {
            solver.step(&mut particles, &mut constraints, 1.0 / 60.0);
            let length = particles[ParticleId(1)].position.coords.norm();
            assert_relative_eq!(length, 1.0, epsilon = 1e-4);
        }
        assert!(particles[ParticleId(1)].position.y < 0.0);
    }

    #[test]
    fn test_phase_sequence() {
        let (mut particles, mut constraints) = pendulum();
        let config = SolverConfig::default().with_iterations(2, 2);
        let mut solver = XpbdSolver::with_logger(config, RecordingLogger::default());

        solver.step(&mut particles, &mut constraints, 1.0 / 60.0);

        let phases = &solver.logger().phases;
        assert_eq!(
            phases.as_slice(),
            &[
                (SolverPhase::Predicting, 0),
                (SolverPhase::Projecting, 0),
                (SolverPhase::VelocityUpdate, 0),
                (SolverPhase::Predicting, 1),
                (SolverPhase::Projecting, 1),
                (SolverPhase::VelocityUpdate, 1),
                (SolverPhase::Finalizing, 1),
            ]
        );
        assert_eq!(solver.logger().completed, 1);
        assert_eq!(solver.stats().passes, 4);
        assert_eq!(solver.stats().substeps, 2);
    }

    #[test]
    fn test_invalid_dt_is_noop() {
        let (mut particles, mut constraints) = pendulum();
        let before = particles.clone();
        let mut solver =
            XpbdSolver::with_logger(SolverConfig::default(), RecordingLogger::default());

        for dt in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            solver.step(&mut particles, &mut constraints, dt);
        }

        assert_eq!(particles, before);
        assert_eq!(solver.logger().completed, 0);
    }

    #[test]
    fn test_nonfinite_constraint_reported() {
        let mut particles = ParticleStore::new(vec![
            Particle::new(Point3::origin(), 1.0),
            Particle::new(Point3::new(1.0, 0.0, 0.0), 1.0),
        ]);
        let mut constraints = ConstraintSet::new();
        constraints.push_distance(DistanceConstraint::new(
            ParticleId(0),
            ParticleId(1),
            f32::NAN,
            0.0,
        ));
        let config = SolverConfig::default().with_iterations(3, 1);
        let mut solver = XpbdSolver::with_logger(config, RecordingLogger::default());

        solver.step(&mut particles, &mut constraints, 1.0 / 60.0);

        assert_eq!(solver.stats().constraints_skipped, 3);
        assert_eq!(
            solver.logger().skipped,
            vec![(ConstraintKind::Distance, 0); 3]
        );
        assert!(particles.iter().all(|p| p.position.iter().all(|c| c.is_finite())));
    }

    #[test]
    fn test_collision_toggle() {
        let build = || {
            let particles = ParticleStore::new(vec![Particle::new(Point3::origin(), 1.0)]);
            let mut constraints = ConstraintSet::new();
            constraints.push_collision(SphereCollisionConstraint::new(
                ParticleId(0),
                Point3::new(0.0, -0.5, 0.0),
                1.0,
                0.0,
            ));
            (particles, constraints)
        };
        let zero_g = SolverConfig::default()
            .with_gravity(Vector3::zeros())
            .with_iterations(10, 1);

        let (mut particles, mut constraints) = build();
        let mut solver = XpbdSolver::with_logger(zero_g, NoopLogger);
        solver.step(&mut particles, &mut constraints, 1.0 / 60.0);
        assert_relative_eq!(particles[ParticleId(0)].position.y, 0.5, epsilon = 1e-5);

        let (mut particles, mut constraints) = build();
        let config = SolverConfig {
            use_xpbd_collision: false,
            ..zero_g
        };
        let mut solver = XpbdSolver::with_logger(config, NoopLogger);
        solver.step(&mut particles, &mut constraints, 1.0 / 60.0);
        assert_eq!(particles[ParticleId(0)].position, Point3::origin());
    }

    /// Two distance constraints and a sphere fight over one particle. Within
    /// a pass the last projection wins, so the result depends on the order.
    #[test]
    fn test_projection_order() {
        let particles = ParticleStore::new(vec![
            Particle::pinned(Point3::origin()),
            Particle::new(Point3::new(1.0, 0.0, 0.0), 1.0),
            Particle::pinned(Point3::new(4.0, 0.0, 0.0)),
        ]);
        let near = DistanceConstraint::new(ParticleId(0), ParticleId(1), 2.0, 0.0);
        let far = DistanceConstraint::new(ParticleId(2), ParticleId(1), 2.5, 0.0);
        let sphere =
            SphereCollisionConstraint::new(ParticleId(1), Point3::new(2.5, 0.0, 0.0), 1.2, 0.0);

        // Collision is pushed first to show that storage order does not matter
        let mut constraints = ConstraintSet::new();
        constraints.push_collision(sphere);
        constraints.push_distance(near);
        constraints.push_distance(far);
        let config = SolverConfig::default()
            .with_gravity(Vector3::zeros())
            .with_iterations(1, 1);
        let mut solver = XpbdSolver::with_logger(config, NoopLogger);
        let mut solved = particles.clone();
        solver.step(&mut solved, &mut constraints, 1.0 / 60.0);

        let sub_dt = 1.0 / 60.0;
        let mut forward = particles.clone();
        let (mut a, mut b, mut c) = (near, far, sphere);
        project(&mut a, &mut forward, sub_dt);
        project(&mut b, &mut forward, sub_dt);
        project(&mut c, &mut forward, sub_dt);

        let mut reversed = particles;
        let (mut a, mut b, mut c) = (near, far, sphere);
        project(&mut c, &mut reversed, sub_dt);
        project(&mut b, &mut reversed, sub_dt);
        project(&mut a, &mut reversed, sub_dt);

        let x = |store: &ParticleStore| store[ParticleId(1)].position;
        assert_eq!(x(&solved), x(&forward));
        assert_relative_eq!(x(&forward).x, 1.3, epsilon = 1e-5);
        assert_relative_eq!(x(&reversed).x, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_lra_limits_fall() {
        let mut particles = ParticleStore::new(vec![
            Particle::pinned(Point3::origin()),
            Particle::new(Point3::new(0.0, -1.0, 0.0), 1.0),
        ]);
        let mut constraints = ConstraintSet::new();
        constraints.push_lra(LraConstraint::from_positions(
            ParticleId(1),
            ParticleId(0),
            &particles,
            0.1,
            0.0,
        ));
        let mut solver = XpbdSolver::with_logger(SolverConfig::default(), NoopLogger);

        for _ in 0..60 {
            solver.step(&mut particles, &mut constraints, 1.0 / 60.0);
        }

        let distance = particles[ParticleId(1)].position.coords.norm();
        assert!(distance <= 1.1 + 1e-4, "tether overstretched to {distance}");
        assert!(distance > 1.0, "gravity should stretch the tether");
    }

    /// Multipliers carry over from one step into the next by default, so the
    /// second step starts from a non-zero λ. Standard XPBD would start every
    /// step at zero, which is what `reset_multipliers` opts into.
    #[test]
    fn test_multipliers_persist_unless_reset() {
        let run = |reset_multipliers: bool| {
            let (mut particles, mut constraints) = pendulum();
            constraints.distance_mut()[0].compliance = 1e-4;
            let config = SolverConfig {
                reset_multipliers,
                ..SolverConfig::default()
            };
            let mut solver = XpbdSolver::with_logger(config, NoopLogger);

            solver.step(&mut particles, &mut constraints, 1.0 / 60.0);
            let first = constraints.distance()[0].lambda();
            solver.step(&mut particles, &mut constraints, 1.0 / 60.0);
            (first, constraints.distance()[0].lambda())
        };

        let (kept_first, kept_second) = run(false);
        let (reset_first, reset_second) = run(true);

        assert_ne!(kept_first, 0.0);
        assert_eq!(kept_first, reset_first);
        assert_ne!(kept_second, reset_second);
    }

    #[test]
    fn test_stats_kinetic_energy() {
        let mut particles = ParticleStore::new(vec![Particle::new(Point3::origin(), 2.0)]);
        let mut constraints = ConstraintSet::new();
        let mut solver = XpbdSolver::with_logger(SolverConfig::default(), NoopLogger);

        solver.step(&mut particles, &mut constraints, 1.0 / 60.0);

        assert_relative_eq!(
            solver.stats().kinetic_energy,
            particles.kinetic_energy(),
            epsilon = 1e-6
        );
        assert!(solver.stats().kinetic_energy > 0.0);
    }
}
