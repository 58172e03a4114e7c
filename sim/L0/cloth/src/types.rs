//! Core particle types for cloth simulation.
//!
//! - [`ParticleId`] - Stable handle into a [`ParticleStore`]
//! - [`ParticleFlags`] - Flags for particle state (pinned, etc.)
//! - [`Particle`] - A point mass in the cloth
//! - [`ParticleStore`] - Fixed-capacity particle arena

use std::ops::{Index, IndexMut};

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ClothError, Result};

/// Stable handle to a particle in a [`ParticleStore`].
///
/// Constraints refer to particles through these handles only. The store
/// never grows or shrinks after creation, so a handle stays valid for the
/// lifetime of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParticleId(pub usize);

impl ParticleId {
    /// Create a new particle handle.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for ParticleId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for ParticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Particle({})", self.0)
    }
}

bitflags::bitflags! {
    /// Flags for particle state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct ParticleFlags: u32 {
        /// Particle is pinned (static, infinite mass).
        const PINNED = 0b0000_0001;
    }
}

/// A point mass in the cloth.
///
/// Positions are tracked at three points in time: `position` is the live
/// value, `old_position` is where the particle was at the start of the
/// current sub-step and `position_initial` is where it was at the start of
/// the whole step.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Particle {
    /// Current position.
    pub position: Point3<f32>,
    /// Position at the start of the current sub-step.
    pub old_position: Point3<f32>,
    /// Position at the start of the current step.
    pub position_initial: Point3<f32>,
    /// Velocity.
    pub velocity: Vector3<f32>,
    /// Accumulated force, cleared at the end of every step.
    pub force: Vector3<f32>,
    /// Mass in kg.
    pub mass: f32,
    /// Inverse mass (0 for static particles).
    pub inverse_mass: f32,
    /// State flags.
    pub flags: ParticleFlags,
}

impl Particle {
    /// Create a particle at rest.
    ///
    /// A non-positive or non-finite mass produces a static particle.
    #[must_use]
    pub fn new(position: Point3<f32>, mass: f32) -> Self {
        if mass > 0.0 && mass.is_finite() {
            Self {
                position,
                old_position: position,
                position_initial: position,
                velocity: Vector3::zeros(),
                force: Vector3::zeros(),
                mass,
                inverse_mass: 1.0 / mass,
                flags: ParticleFlags::empty(),
            }
        } else {
            Self::pinned(position)
        }
    }

    /// Create a pinned particle.
    #[must_use]
    pub fn pinned(position: Point3<f32>) -> Self {
        Self {
            position,
            old_position: position,
            position_initial: position,
            velocity: Vector3::zeros(),
            force: Vector3::zeros(),
            mass: 0.0,
            inverse_mass: 0.0,
            flags: ParticleFlags::PINNED,
        }
    }

    /// Pin this particle in place. The mass is kept so it can be unpinned.
    pub fn pin(&mut self) {
        self.flags.insert(ParticleFlags::PINNED);
        self.inverse_mass = 0.0;
        self.velocity = Vector3::zeros();
        self.force = Vector3::zeros();
        self.old_position = self.position;
        self.position_initial = self.position;
    }

    /// Release a pinned particle with the given mass.
    ///
    /// Ignored for a non-positive or non-finite mass, which would leave the
    /// particle static anyway.
    pub fn unpin(&mut self, mass: f32) {
        if mass > 0.0 && mass.is_finite() {
            self.flags.remove(ParticleFlags::PINNED);
            self.mass = mass;
            self.inverse_mass = 1.0 / mass;
        }
    }

    /// Whether this particle is static.
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.flags.contains(ParticleFlags::PINNED)
    }

    /// Accumulate an external force. Ignored for static particles.
    pub fn apply_force(&mut self, force: Vector3<f32>) {
        if !self.is_static() {
            self.force += force;
        }
    }

    /// Clear the accumulated force.
    pub fn reset_force(&mut self) {
        self.force = Vector3::zeros();
    }

    /// Kinetic energy of this particle.
    #[must_use]
    pub fn kinetic_energy(&self) -> f32 {
        if self.is_static() {
            0.0
        } else {
            0.5 * self.mass * self.velocity.norm_squared()
        }
    }
}

/// Fixed-capacity particle arena.
///
/// Allocated once when the cloth is built. There is no way to add or remove
/// particles afterwards, which keeps every [`ParticleId`] valid.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParticleStore {
    particles: Box<[Particle]>,
}

impl ParticleStore {
    /// Freeze a list of particles into a store.
    #[must_use]
    pub fn new(particles: Vec<Particle>) -> Self {
        Self {
            particles: particles.into_boxed_slice(),
        }
    }

    /// Number of particles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Check that a handle refers to a particle in this store.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::IndexOutOfBounds`] for a dangling handle.
    pub fn check(&self, id: ParticleId) -> Result<()> {
        if id.0 < self.particles.len() {
            Ok(())
        } else {
            Err(ClothError::IndexOutOfBounds {
                index: id.0,
                count: self.particles.len(),
            })
        }
    }

    /// Get a particle.
    #[must_use]
    pub fn get(&self, id: ParticleId) -> Option<&Particle> {
        self.particles.get(id.0)
    }

    /// Get a particle mutably.
    pub fn get_mut(&mut self, id: ParticleId) -> Option<&mut Particle> {
        self.particles.get_mut(id.0)
    }

    /// Iterate over particles.
    pub fn iter(&self) -> std::slice::Iter<'_, Particle> {
        self.particles.iter()
    }

    /// Iterate mutably over particles.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Particle> {
        self.particles.iter_mut()
    }

    /// Iterate over all handles in storage order.
    pub fn ids(&self) -> impl Iterator<Item = ParticleId> + use<> {
        (0..self.particles.len()).map(ParticleId)
    }

    /// The particles as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Particle] {
        &self.particles
    }

    /// Total mass of all non-static particles.
    #[must_use]
    pub fn total_mass(&self) -> f32 {
        self.particles
            .iter()
            .filter(|p| !p.is_static())
            .map(|p| p.mass)
            .sum()
    }

    /// Total kinetic energy.
    #[must_use]
    pub fn kinetic_energy(&self) -> f32 {
        self.particles.iter().map(Particle::kinetic_energy).sum()
    }
}

impl Index<ParticleId> for ParticleStore {
    type Output = Particle;

    fn index(&self, id: ParticleId) -> &Particle {
        &self.particles[id.0]
    }
}

impl IndexMut<ParticleId> for ParticleStore {
    fn index_mut(&mut self, id: ParticleId) -> &mut Particle {
        &mut self.particles[id.0]
    }
}

impl<'a> IntoIterator for &'a ParticleStore {
    type Item = &'a Particle;
    type IntoIter = std::slice::Iter<'a, Particle>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
