//! Error types for cloth construction and setup.
//!
//! Only setup-time problems are reported as errors. The per-frame solve loop
//! never fails: numerical trouble inside a step is recovered locally and
//! reported through [`crate::logger::SolverLogger`] and
//! [`crate::solver::SolverStats`] instead.

use thiserror::Error;

/// Errors that can occur while building or configuring a cloth.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClothError {
    /// Grid must have at least two particles along each axis.
    #[error("Invalid grid dimensions: {width}x{height} (need at least 2x2)")]
    InvalidDimensions {
        /// Requested particle count along the width.
        width: usize,
        /// Requested particle count along the height.
        height: usize,
    },

    /// Physical extent must be positive and finite.
    #[error("Invalid cloth size: {0}")]
    InvalidSize(f32),

    /// Particle mass must be positive and finite.
    #[error("Invalid particle mass: {0}")]
    InvalidMass(f32),

    /// Any other configuration problem.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Collision sphere is unusable (non-finite centre, non-positive radius).
    #[error("Invalid collider: {0}")]
    InvalidCollider(String),

    /// A particle handle does not refer to a particle in the store.
    #[error("Particle index {index} out of bounds (count: {count})")]
    IndexOutOfBounds {
        /// Offending index.
        index: usize,
        /// Number of particles in the store.
        count: usize,
    },
}

impl ClothError {
    /// Create an invalid config error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invalid collider error.
    pub fn invalid_collider(msg: impl Into<String>) -> Self {
        Self::InvalidCollider(msg.into())
    }
}

/// Result type for cloth operations.
pub type Result<T> = std::result::Result<T, ClothError>;
