//! Constraints for XPBD cloth simulation.
//!
//! - [`DistanceConstraint`] - Keeps two particles at a rest length
//! - [`LraConstraint`] - Long range attachment tether to a fixed anchor
//! - [`DihedralBendingConstraint`] - Keeps the angle between two triangles
//! - [`SphereCollisionConstraint`] - Pushes a particle out of a sphere
//!
//! All four implement [`XpbdConstraint`], which exposes the constraint value
//! and its gradient. A single routine, [`project`], applies one XPBD update:
//!
//! ```text
//! Δλ = (-C - α̃ λ) / (Σ wᵢ |∇ᵢC|² + α̃)
//! Δxᵢ = wᵢ ∇ᵢC Δλ
//! ```
//!
//! Where:
//! - `C` is the constraint function
//! - `α̃ = α / h²` is the time-scaled compliance
//! - `λ` is the Lagrange multiplier
//! - `w` are inverse masses
//! - `∇C` is the constraint gradient

use std::f32::consts::{PI, TAU};

use nalgebra::{Point3, Vector3};
use smallvec::{SmallVec, smallvec};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ParticleId, ParticleStore};

/// Constraint values below this magnitude count as satisfied.
pub const SATISFIED_TOLERANCE: f32 = 1e-9;

/// Floor for the XPBD denominator.
pub const MIN_DENOMINATOR: f64 = 1e-9;

/// Ceiling for the time-scaled compliance `α / h²`.
pub const MAX_SCALED_COMPLIANCE: f64 = 1e6;

/// Lengths below this are treated as degenerate.
const LENGTH_EPSILON: f32 = 1e-8;

/// Below this `|n̂1 × n̂2|` the dihedral gradient is undefined.
const SIN_EPSILON: f32 = 1e-4;

/// Category of a constraint, in solve order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConstraintKind {
    /// Bilateral distance constraint.
    Distance,
    /// Dihedral bending constraint.
    Bending,
    /// Long range attachment tether.
    Lra,
    /// Sphere collision constraint.
    Collision,
}

/// Value and gradient of a constraint at the current particle positions.
///
/// `gradients[i]` belongs to the i-th particle returned by
/// [`XpbdConstraint::particles`].
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Constraint value `C`.
    pub value: f32,
    /// `∇C` per participating particle.
    pub gradients: SmallVec<[Vector3<f32>; 4]>,
}

impl Evaluation {
    /// An inactive (or degenerate) constraint: `C = 0`, zero gradient.
    #[must_use]
    pub fn inactive(arity: usize) -> Self {
        Self {
            value: 0.0,
            gradients: smallvec![Vector3::zeros(); arity],
        }
    }
}

/// A constraint that can be projected with XPBD.
pub trait XpbdConstraint {
    /// Category of this constraint.
    fn kind(&self) -> ConstraintKind;

    /// Participating particles, in gradient order.
    fn particles(&self) -> SmallVec<[ParticleId; 4]>;

    /// Number of participating particles.
    fn arity(&self) -> usize {
        self.particles().len()
    }

    /// Compute `C` and `∇C` from the current positions.
    fn evaluate_and_gradient(&self, particles: &ParticleStore) -> Evaluation;

    /// Compliance (inverse stiffness, 0 = rigid).
    fn compliance(&self) -> f32;

    /// Accumulated Lagrange multiplier.
    fn lambda(&self) -> f64;

    /// Mutable access to the accumulated Lagrange multiplier.
    fn lambda_mut(&mut self) -> &mut f64;

    /// Reset the Lagrange multiplier.
    fn reset_lambda(&mut self) {
        *self.lambda_mut() = 0.0;
    }
}

/// Outcome of projecting one constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// `|C|` was below [`SATISFIED_TOLERANCE`]; nothing changed.
    Satisfied,
    /// `C` or the multiplier update was not finite; nothing changed.
    NonFinite(f32),
    /// The multiplier was updated and corrections were applied.
    Applied {
        /// Constraint value before the correction.
        value: f32,
        /// Multiplier increment.
        delta_lambda: f64,
        /// Particles whose corrected position was not finite and was dropped.
        discarded: SmallVec<[ParticleId; 4]>,
    },
}

/// Apply one XPBD projection to `constraint`.
///
/// Static particles take no part in the weighted sum and are never moved.
/// A corrected position that is not finite is discarded and the particle
/// keeps its previous position.
pub fn project<C: XpbdConstraint + ?Sized>(
    constraint: &mut C,
    particles: &mut ParticleStore,
    sub_dt: f32,
) -> Projection {
    let Evaluation { value, gradients } = constraint.evaluate_and_gradient(particles);

    if !value.is_finite() {
        return Projection::NonFinite(value);
    }
    if value.abs() < SATISFIED_TOLERANCE {
        return Projection::Satisfied;
    }

    let ids = constraint.particles();

    let mut w_sum = 0.0_f64;
    for (&id, gradient) in ids.iter().zip(&gradients) {
        let particle = &particles[id];
        if !particle.is_static() {
            w_sum += f64::from(gradient.norm_squared() * particle.inverse_mass);
        }
    }

    let h = f64::from(sub_dt);
    let alpha = (f64::from(constraint.compliance()) / (h * h)).min(MAX_SCALED_COMPLIANCE);
    w_sum += alpha;

    let delta_lambda =
        alpha.mul_add(-constraint.lambda(), -f64::from(value)) / w_sum.max(MIN_DENOMINATOR);
    if !delta_lambda.is_finite() {
        return Projection::NonFinite(value);
    }
    *constraint.lambda_mut() += delta_lambda;

    let step = delta_lambda as f32;
    let mut discarded = SmallVec::new();
    for (&id, gradient) in ids.iter().zip(&gradients) {
        let particle = &mut particles[id];
        if particle.is_static() {
            continue;
        }
        let candidate = particle.position + gradient * (step * particle.inverse_mass);
        if candidate.iter().all(|c| c.is_finite()) {
            particle.position = candidate;
        } else {
            discarded.push(id);
        }
    }

    Projection::Applied {
        value,
        delta_lambda,
        discarded,
    }
}

/// Distance constraint between two particles.
///
/// `C = |x1 - x2| - rest_length`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DistanceConstraint {
    /// First particle.
    pub p1: ParticleId,
    /// Second particle.
    pub p2: ParticleId,
    /// Rest length (target distance).
    pub rest_length: f32,
    /// Compliance (inverse stiffness).
    pub compliance: f32,
    /// Accumulated Lagrange multiplier.
    lambda: f64,
}

impl DistanceConstraint {
    /// Create a new distance constraint.
    #[must_use]
    pub const fn new(p1: ParticleId, p2: ParticleId, rest_length: f32, compliance: f32) -> Self {
        Self {
            p1,
            p2,
            rest_length,
            compliance,
            lambda: 0.0,
        }
    }

    /// Create a distance constraint whose rest length is the current distance.
    #[must_use]
    pub fn from_positions(
        p1: ParticleId,
        p2: ParticleId,
        particles: &ParticleStore,
        compliance: f32,
    ) -> Self {
        let rest_length = (particles[p1].position - particles[p2].position).norm();
        Self::new(p1, p2, rest_length, compliance)
    }

    /// Compute the constraint value.
    #[must_use]
    pub fn evaluate(&self, particles: &ParticleStore) -> f32 {
        self.evaluate_and_gradient(particles).value
    }
}

impl XpbdConstraint for DistanceConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Distance
    }

    fn particles(&self) -> SmallVec<[ParticleId; 4]> {
        smallvec![self.p1, self.p2]
    }

    fn arity(&self) -> usize {
        2
    }

    fn evaluate_and_gradient(&self, particles: &ParticleStore) -> Evaluation {
        let diff = particles[self.p1].position - particles[self.p2].position;
        let distance = diff.norm();

        // Coincident particles have no separating direction
        if distance < LENGTH_EPSILON {
            return Evaluation::inactive(2);
        }

        let n = diff / distance;
        Evaluation {
            value: distance - self.rest_length,
            gradients: smallvec![n, -n],
        }
    }

    fn compliance(&self) -> f32 {
        self.compliance
    }

    fn lambda(&self) -> f64 {
        self.lambda
    }

    fn lambda_mut(&mut self) -> &mut f64 {
        &mut self.lambda
    }
}

/// Long range attachment: a one-sided tether to a fixed anchor point.
///
/// Inactive while `|x - anchor| <= geodesic_distance * (1 + max_stretch)`.
/// Beyond that, `C = |x - anchor| - geodesic_distance * (1 + max_stretch)`,
/// so the tether only ever pulls the particle back to the stretch limit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LraConstraint {
    /// Tethered particle.
    pub particle: ParticleId,
    /// Anchor position.
    pub attachment: Point3<f32>,
    /// Rest distance to the anchor along the cloth.
    pub geodesic_distance: f32,
    /// Allowed fractional overstretch before the tether activates.
    pub max_stretch: f32,
    /// Compliance (inverse stiffness).
    pub compliance: f32,
    /// Accumulated Lagrange multiplier.
    lambda: f64,
}

impl LraConstraint {
    /// Create a new tether.
    #[must_use]
    pub const fn new(
        particle: ParticleId,
        attachment: Point3<f32>,
        geodesic_distance: f32,
        max_stretch: f32,
        compliance: f32,
    ) -> Self {
        Self {
            particle,
            attachment,
            geodesic_distance,
            max_stretch,
            compliance,
            lambda: 0.0,
        }
    }

    /// Create a tether using the straight-line rest distance to `anchor`.
    #[must_use]
    pub fn from_positions(
        particle: ParticleId,
        anchor: ParticleId,
        particles: &ParticleStore,
        max_stretch: f32,
        compliance: f32,
    ) -> Self {
        let attachment = particles[anchor].position;
        let geodesic_distance = (particles[particle].position - attachment).norm();
        Self::new(particle, attachment, geodesic_distance, max_stretch, compliance)
    }

    /// Distance beyond which the tether activates.
    #[must_use]
    pub fn limit(&self) -> f32 {
        self.geodesic_distance * (1.0 + self.max_stretch)
    }

    /// Whether the tether is currently stretched past its limit.
    #[must_use]
    pub fn is_active(&self, particles: &ParticleStore) -> bool {
        (particles[self.particle].position - self.attachment).norm() > self.limit()
    }
}

impl XpbdConstraint for LraConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Lra
    }

    fn particles(&self) -> SmallVec<[ParticleId; 4]> {
        smallvec![self.particle]
    }

    fn arity(&self) -> usize {
        1
    }

    fn evaluate_and_gradient(&self, particles: &ParticleStore) -> Evaluation {
        let diff = particles[self.particle].position - self.attachment;
        let distance = diff.norm();
        let limit = self.limit();

        if distance <= limit || distance < LENGTH_EPSILON {
            return Evaluation::inactive(1);
        }

        Evaluation {
            value: distance - limit,
            gradients: smallvec![diff / distance],
        }
    }

    fn compliance(&self) -> f32 {
        self.compliance
    }

    fn lambda(&self) -> f64 {
        self.lambda
    }

    fn lambda_mut(&mut self) -> &mut f64 {
        &mut self.lambda
    }
}

/// Dihedral angle between triangles `(p0, p1, p2)` and `(p0, p1, p3)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dihedral {
    /// Angle in `[0, 2π)`. A flat pair measures π.
    pub angle: f32,
    /// `∂angle/∂p` for `[p0, p1, p2, p3]`, `None` where it is undefined
    /// (normals parallel or anti-parallel).
    pub gradients: Option<[Vector3<f32>; 4]>,
}

/// Measure the dihedral angle across edge `(p0, p1)`.
///
/// The normals are `n1 = (p1-p0)×(p2-p0)` and `n2 = (p1-p0)×(p3-p0)`.
/// `acos(n̂1·n̂2)` only covers `[0, π]`; the sign of `(n̂1×n̂2)·(p1-p0)`
/// picks the branch so the result covers `[0, 2π)`.
///
/// Returns `None` for a zero-length edge or a zero-area triangle.
#[must_use]
pub fn dihedral(
    p0: &Point3<f32>,
    p1: &Point3<f32>,
    p2: &Point3<f32>,
    p3: &Point3<f32>,
) -> Option<Dihedral> {
    let e = p1 - p0;
    let b = p2 - p0;
    let c = p3 - p0;

    let n1 = e.cross(&b);
    let n2 = e.cross(&c);
    let n1_len = n1.norm();
    let n2_len = n2.norm();

    if e.norm() < LENGTH_EPSILON || n1_len < LENGTH_EPSILON || n2_len < LENGTH_EPSILON {
        return None;
    }

    let n1_hat = n1 / n1_len;
    let n2_hat = n2 / n2_len;
    let cos_angle = n1_hat.dot(&n2_hat).clamp(-1.0, 1.0);
    let cross = n1_hat.cross(&n2_hat);
    let sin_angle = cross.norm();
    let reflex = cross.dot(&e) < 0.0;

    let principal = cos_angle.acos();
    let mut angle = if reflex { TAU - principal } else { principal };
    if angle >= TAU {
        angle -= TAU;
    }

    if sin_angle < SIN_EPSILON {
        return Some(Dihedral {
            angle,
            gradients: None,
        });
    }

    // dθ/d(n̂1·n̂2) is -1/sin on the principal branch and +1/sin on the reflex one.
    // The tangential parts (n̂2 - cos n̂1) and (n̂1 - cos n̂2) are formed with
    // cross products to avoid cancellation near a flat configuration.
    let sign = if reflex { 1.0 } else { -1.0 };
    let g1 = cross.cross(&n1_hat) * (sign / (sin_angle * n1_len));
    let g2 = n2_hat.cross(&cross) * (sign / (sin_angle * n2_len));

    // ∂n1/∂p1 = -[b]ₓ, ∂n1/∂p2 = [e]ₓ, ∂n2/∂p1 = -[c]ₓ, ∂n2/∂p3 = [e]ₓ
    let grad_p1 = b.cross(&g1) + c.cross(&g2);
    let grad_p2 = g1.cross(&e);
    let grad_p3 = g2.cross(&e);
    let grad_p0 = -(grad_p1 + grad_p2 + grad_p3);

    Some(Dihedral {
        angle,
        gradients: Some([grad_p0, grad_p1, grad_p2, grad_p3]),
    })
}

/// Dihedral bending constraint for cloth (4 particles).
///
/// Particles `p[0]` and `p[1]` form the shared edge, `p[2]` and `p[3]` are
/// the opposite vertices of the two triangles.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DihedralBendingConstraint {
    /// Particle handles `[edge0, edge1, opposite1, opposite2]`.
    pub particles: [ParticleId; 4],
    /// Rest dihedral angle in `[0, 2π)`.
    pub rest_angle: f32,
    /// Compliance (inverse stiffness).
    pub compliance: f32,
    /// Accumulated Lagrange multiplier.
    lambda: f64,
}

impl DihedralBendingConstraint {
    /// Create a new bending constraint.
    #[must_use]
    pub const fn new(particles: [ParticleId; 4], rest_angle: f32, compliance: f32) -> Self {
        Self {
            particles,
            rest_angle,
            compliance,
            lambda: 0.0,
        }
    }

    /// Create a bending constraint with the current angle as rest angle.
    ///
    /// A degenerate rest configuration is treated as flat (π).
    #[must_use]
    pub fn from_positions(
        particles: [ParticleId; 4],
        store: &ParticleStore,
        compliance: f32,
    ) -> Self {
        let [a, b, c, d] = particles.map(|id| store[id].position);
        let rest_angle = dihedral(&a, &b, &c, &d).map_or(PI, |m| m.angle);
        Self::new(particles, rest_angle, compliance)
    }

    /// Current dihedral angle, `None` for degenerate triangles.
    #[must_use]
    pub fn angle(&self, store: &ParticleStore) -> Option<f32> {
        let [a, b, c, d] = self.particles.map(|id| store[id].position);
        dihedral(&a, &b, &c, &d).map(|m| m.angle)
    }
}

impl XpbdConstraint for DihedralBendingConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Bending
    }

    fn particles(&self) -> SmallVec<[ParticleId; 4]> {
        SmallVec::from_buf(self.particles)
    }

    fn arity(&self) -> usize {
        4
    }

    fn evaluate_and_gradient(&self, store: &ParticleStore) -> Evaluation {
        let [a, b, c, d] = self.particles.map(|id| store[id].position);

        match dihedral(&a, &b, &c, &d) {
            Some(Dihedral {
                angle,
                gradients: Some(gradients),
            }) => Evaluation {
                value: angle - self.rest_angle,
                gradients: SmallVec::from_buf(gradients),
            },
            _ => Evaluation::inactive(4),
        }
    }

    fn compliance(&self) -> f32 {
        self.compliance
    }

    fn lambda(&self) -> f64 {
        self.lambda
    }

    fn lambda_mut(&mut self) -> &mut f64 {
        &mut self.lambda
    }
}

/// One-sided sphere collision for a single particle.
///
/// Active only while the particle is inside the sphere:
/// `C = |x - center| - radius` (negative inside), gradient points outward.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SphereCollisionConstraint {
    /// Colliding particle.
    pub particle: ParticleId,
    /// Sphere centre in cloth space.
    pub center: Point3<f32>,
    /// Sphere radius.
    pub radius: f32,
    /// Compliance (inverse stiffness).
    pub compliance: f32,
    /// Accumulated Lagrange multiplier.
    lambda: f64,
}

impl SphereCollisionConstraint {
    /// Create a new sphere collision constraint.
    #[must_use]
    pub const fn new(
        particle: ParticleId,
        center: Point3<f32>,
        radius: f32,
        compliance: f32,
    ) -> Self {
        Self {
            particle,
            center,
            radius,
            compliance,
            lambda: 0.0,
        }
    }
}

impl XpbdConstraint for SphereCollisionConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Collision
    }

    fn particles(&self) -> SmallVec<[ParticleId; 4]> {
        smallvec![self.particle]
    }

    fn arity(&self) -> usize {
        1
    }

    fn evaluate_and_gradient(&self, particles: &ParticleStore) -> Evaluation {
        let particle = &particles[self.particle];
        if particle.is_static() {
            return Evaluation::inactive(1);
        }

        let diff = particle.position - self.center;
        let distance = diff.norm();
        if distance >= self.radius {
            return Evaluation::inactive(1);
        }

        // At the centre every direction is outward; push up
        let normal = if distance < LENGTH_EPSILON {
            Vector3::y()
        } else {
            diff / distance
        };

        Evaluation {
            value: distance - self.radius,
            gradients: smallvec![normal],
        }
    }

    fn compliance(&self) -> f32 {
        self.compliance
    }

    fn lambda(&self) -> f64 {
        self.lambda
    }

    fn lambda_mut(&mut self) -> &mut f64 {
        &mut self.lambda
    }
}

/// All constraints of a cloth, grouped by category.
///
/// Categories are solved in the fixed order distance, bending, LRA,
/// collision; within a category in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintSet {
    distance: Vec<DistanceConstraint>,
    bending: Vec<DihedralBendingConstraint>,
    lra: Vec<LraConstraint>,
    collisions: Vec<SphereCollisionConstraint>,
}

impl ConstraintSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a distance constraint.
    pub fn push_distance(&mut self, constraint: DistanceConstraint) {
        self.distance.push(constraint);
    }

    /// Add a bending constraint.
    pub fn push_bending(&mut self, constraint: DihedralBendingConstraint) {
        self.bending.push(constraint);
    }

    /// Add a tether.
    pub fn push_lra(&mut self, constraint: LraConstraint) {
        self.lra.push(constraint);
    }

    /// Add a sphere collision constraint.
    pub fn push_collision(&mut self, constraint: SphereCollisionConstraint) {
        self.collisions.push(constraint);
    }

    /// Distance constraints.
    #[must_use]
    pub fn distance(&self) -> &[DistanceConstraint] {
        &self.distance
    }

    /// Bending constraints.
    #[must_use]
    pub fn bending(&self) -> &[DihedralBendingConstraint] {
        &self.bending
    }

    /// Tethers.
    #[must_use]
    pub fn lra(&self) -> &[LraConstraint] {
        &self.lra
    }

    /// Sphere collision constraints.
    #[must_use]
    pub fn collisions(&self) -> &[SphereCollisionConstraint] {
        &self.collisions
    }

    /// Mutable distance constraints.
    pub fn distance_mut(&mut self) -> &mut [DistanceConstraint] {
        &mut self.distance
    }

    /// Mutable bending constraints.
    pub fn bending_mut(&mut self) -> &mut [DihedralBendingConstraint] {
        &mut self.bending
    }

    /// Mutable tethers.
    pub fn lra_mut(&mut self) -> &mut [LraConstraint] {
        &mut self.lra
    }

    /// Mutable sphere collision constraints.
    pub fn collisions_mut(&mut self) -> &mut [SphereCollisionConstraint] {
        &mut self.collisions
    }

    /// Number of constraints in a category.
    #[must_use]
    pub fn count(&self, kind: ConstraintKind) -> usize {
        match kind {
            ConstraintKind::Distance => self.distance.len(),
            ConstraintKind::Bending => self.bending.len(),
            ConstraintKind::Lra => self.lra.len(),
            ConstraintKind::Collision => self.collisions.len(),
        }
    }

    /// Total number of constraints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.distance.len() + self.bending.len() + self.lra.len() + self.collisions.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the distance, bending and LRA constraints; collisions stay.
    pub fn clear_structural(&mut self) {
        self.distance.clear();
        self.bending.clear();
        self.lra.clear();
    }

    /// Drop every sphere collision constraint.
    pub fn clear_collisions(&mut self) {
        self.collisions.clear();
    }

    /// Zero every Lagrange multiplier.
    pub fn reset_lambdas(&mut self) {
        self.distance.iter_mut().for_each(XpbdConstraint::reset_lambda);
        self.bending.iter_mut().for_each(XpbdConstraint::reset_lambda);
        self.lra.iter_mut().for_each(XpbdConstraint::reset_lambda);
        self.collisions.iter_mut().for_each(XpbdConstraint::reset_lambda);
    }

    /// Check that every handle refers to a particle in `particles`.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-bounds handle found.
    pub fn validate(&self, particles: &ParticleStore) -> Result<()> {
        let handles = self
            .distance
            .iter()
            .flat_map(XpbdConstraint::particles)
            .chain(self.bending.iter().flat_map(XpbdConstraint::particles))
            .chain(self.lra.iter().flat_map(XpbdConstraint::particles))
            .chain(self.collisions.iter().flat_map(XpbdConstraint::particles));

        for id in handles {
            particles.check(id)?;
        }
        Ok(())
    }
}
