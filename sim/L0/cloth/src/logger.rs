//! Logging capability injected into the solver.
//!
//! The solver never logs through a global function. It reports to whatever
//! [`SolverLogger`] it was constructed with. [`TracingLogger`] forwards to
//! `tracing` and is the default; [`NoopLogger`] drops everything.

use nalgebra::Point3;

use crate::constraints::ConstraintKind;
use crate::solver::{SolverPhase, SolverStats};
use crate::types::ParticleId;

/// Receives solver events. Every hook defaults to a no-op.
pub trait SolverLogger {
    /// A sub-step entered a new phase.
    fn phase_entered(&mut self, _phase: SolverPhase, _substep: u32) {}

    /// A constraint evaluated to a non-finite value and was skipped.
    fn constraint_skipped(&mut self, _kind: ConstraintKind, _index: usize, _value: f32) {}

    /// A non-finite corrected position was discarded.
    fn correction_discarded(
        &mut self,
        _kind: ConstraintKind,
        _index: usize,
        _particle: ParticleId,
    ) {
    }

    /// A non-finite velocity was replaced with zero.
    fn velocity_reset(&mut self, _particle: ParticleId) {}

    /// A step was ignored because its time step was unusable.
    fn step_rejected(&mut self, _dt: f32) {}

    /// A full step finished.
    fn step_completed(&mut self, _stats: &SolverStats) {}

    /// The sphere collision set was rebuilt.
    fn collisions_rebuilt(&mut self, _count: usize, _center: Point3<f32>, _radius: f32) {}

    /// The sphere collision set was cleared.
    fn collisions_cleared(&mut self, _count: usize) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl SolverLogger for NoopLogger {}

/// Forwards solver events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl SolverLogger for TracingLogger {
    fn phase_entered(&mut self, phase: SolverPhase, substep: u32) {
        tracing::trace!(?phase, substep, "solver phase");
    }

    fn constraint_skipped(&mut self, kind: ConstraintKind, index: usize, value: f32) {
        tracing::warn!(?kind, index, value, "skipping constraint with non-finite value");
    }

    fn correction_discarded(&mut self, kind: ConstraintKind, index: usize, particle: ParticleId) {
        tracing::warn!(
            ?kind,
            index,
            particle = particle.index(),
            "discarding non-finite position correction"
        );
    }

    fn velocity_reset(&mut self, particle: ParticleId) {
        tracing::warn!(particle = particle.index(), "non-finite velocity reset to zero");
    }

    fn step_rejected(&mut self, dt: f32) {
        tracing::debug!(dt, "ignoring step with unusable time step");
    }

    fn step_completed(&mut self, stats: &SolverStats) {
        tracing::debug!(
            substeps = stats.substeps,
            applied = stats.projections_applied,
            skipped = stats.constraints_skipped,
            discarded = stats.corrections_discarded,
            max_violation = stats.max_violation,
            kinetic_energy = stats.kinetic_energy,
            "xpbd step complete"
        );
    }

    fn collisions_rebuilt(&mut self, count: usize, center: Point3<f32>, radius: f32) {
        tracing::debug!(
            count,
            center = ?[center.x, center.y, center.z],
            radius,
            "sphere collisions rebuilt"
        );
    }

    fn collisions_cleared(&mut self, count: usize) {
        tracing::debug!(count, "sphere collisions cleared");
    }
}

impl<L: SolverLogger + ?Sized> SolverLogger for &mut L {
    fn phase_entered(&mut self, phase: SolverPhase, substep: u32) {
        (**self).phase_entered(phase, substep);
    }

    fn constraint_skipped(&mut self, kind: ConstraintKind, index: usize, value: f32) {
        (**self).constraint_skipped(kind, index, value);
    }

    fn correction_discarded(&mut self, kind: ConstraintKind, index: usize, particle: ParticleId) {
        (**self).correction_discarded(kind, index, particle);
    }

    fn velocity_reset(&mut self, particle: ParticleId) {
        (**self).velocity_reset(particle);
    }

    fn step_rejected(&mut self, dt: f32) {
        (**self).step_rejected(dt);
    }

    fn step_completed(&mut self, stats: &SolverStats) {
        (**self).step_completed(stats);
    }

    fn collisions_rebuilt(&mut self, count: usize, center: Point3<f32>, radius: f32) {
        (**self).collisions_rebuilt(count, center, radius);
    }

    fn collisions_cleared(&mut self, count: usize) {
        (**self).collisions_cleared(count);
    }
}

impl<L: SolverLogger + ?Sized> SolverLogger for Box<L> {
    fn phase_entered(&mut self, phase: SolverPhase, substep: u32) {
        (**self).phase_entered(phase, substep);
    }

    fn constraint_skipped(&mut self, kind: ConstraintKind, index: usize, value: f32) {
        (**self).constraint_skipped(kind, index, value);
    }

    fn correction_discarded(&mut self, kind: ConstraintKind, index: usize, particle: ParticleId) {
        (**self).correction_discarded(kind, index, particle);
    }

    fn velocity_reset(&mut self, particle: ParticleId) {
        (**self).velocity_reset(particle);
    }

    fn step_rejected(&mut self, dt: f32) {
        (**self).step_rejected(dt);
    }

    fn step_completed(&mut self, stats: &SolverStats) {
        (**self).step_completed(stats);
    }

    fn collisions_rebuilt(&mut self, count: usize, center: Point3<f32>, radius: f32) {
        (**self).collisions_rebuilt(count, center, radius);
    }

    fn collisions_cleared(&mut self, count: usize) {
        (**self).collisions_cleared(count);
    }
}
