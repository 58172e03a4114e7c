//! Property-based tests for cloth constraints and the solver.
//!
//! Run with: cargo test -p sim-cloth -- proptest

#![allow(clippy::expect_used, clippy::float_cmp)]

use std::f32::consts::TAU;

use nalgebra::{Point3, Vector3};
use proptest::prelude::*;
use sim_cloth::constraints::dihedral;
use sim_cloth::{
    Cloth, ClothConfig, ConstraintSet, DistanceConstraint, LraConstraint, NoopLogger, Particle,
    ParticleId, ParticleStore, Projection, SolverConfig, SphereCollisionConstraint, XpbdSolver,
    project,
};

// =============================================================================
// Strategies
// =============================================================================

/// Generate a point in a bounded box.
fn arb_point(extent: f32) -> impl Strategy<Value = Point3<f32>> {
    prop::array::uniform3(-extent..extent).prop_map(|[x, y, z]| Point3::new(x, y, z))
}

/// Generate a unit direction.
fn arb_direction() -> impl Strategy<Value = Vector3<f32>> {
    prop::array::uniform3(-1.0f32..1.0)
        .prop_filter("non-degenerate direction", |v| {
            Vector3::new(v[0], v[1], v[2]).norm() > 0.1
        })
        .prop_map(|[x, y, z]| Vector3::new(x, y, z).normalize())
}

fn arb_mass() -> impl Strategy<Value = f32> {
    0.1f32..10.0
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn proptest_distance_converges_in_one_step(
        a in arb_point(5.0),
        b in arb_point(5.0),
        rest in 0.1f32..5.0,
        mass_a in arb_mass(),
        mass_b in arb_mass(),
    ) {
        prop_assume!((a - b).norm() > 0.01);

        let mut particles = ParticleStore::new(vec![
            Particle::new(a, mass_a),
            Particle::new(b, mass_b),
        ]);
        let mut constraints = ConstraintSet::new();
        let ids = (ParticleId(0), ParticleId(1));
        constraints.push_distance(DistanceConstraint::new(ids.0, ids.1, rest, 0.0));
        let config = SolverConfig::default().with_iterations(20, 4);
        let mut solver = XpbdSolver::with_logger(config, NoopLogger);

        solver.step(&mut particles, &mut constraints, 1.0 / 60.0);

        let distance = (particles[ids.0].position - particles[ids.1].position).norm();
        prop_assert!((distance - rest).abs() < 1e-4, "distance {} rest {}", distance, rest);
    }

    #[test]
    fn proptest_lra_is_one_sided(
        anchor in arb_point(3.0),
        direction in arb_direction(),
        ratio in 0.0f32..3.0,
        geodesic in 0.1f32..5.0,
        max_stretch in 0.0f32..0.5,
    ) {
        // Starts anywhere from on the anchor to three times the rest distance
        let position = anchor + direction * (geodesic * ratio);
        let mut particles = ParticleStore::new(vec![Particle::new(position, 1.0)]);
        let mut tether = LraConstraint::new(ParticleId(0), anchor, geodesic, max_stretch, 0.0);
        let before = (position - anchor).norm();

        let outcome = project(&mut tether, &mut particles, 1.0 / 240.0);
        let after = (particles[ParticleId(0)].position - anchor).norm();

        if before <= tether.limit() {
            prop_assert_eq!(outcome, Projection::Satisfied);
            prop_assert_eq!(particles[ParticleId(0)].position, position);
        } else {
            prop_assert!((after - tether.limit()).abs() < 1e-4);
        }
        // Never pulled closer than where it started or past the limit
        let floor = before.min(tether.limit());
        prop_assert!(after >= floor - 1e-4, "pulled to {} below {}", after, floor);
    }

    #[test]
    fn proptest_sphere_containment(
        center in arb_point(5.0),
        radius in 0.2f32..5.0,
        direction in arb_direction(),
        depth in 0.0f32..0.99,
    ) {
        let start = center + direction * (radius * depth);
        let mut particles = ParticleStore::new(vec![Particle::new(start, 1.0)]);
        let mut constraints = ConstraintSet::new();
        let sphere = SphereCollisionConstraint::new(ParticleId(0), center, radius, 0.0);
        constraints.push_collision(sphere);
        let mut solver = XpbdSolver::with_logger(SolverConfig::default(), NoopLogger);

        solver.step(&mut particles, &mut constraints, 1.0 / 60.0);

        let distance = (particles[ParticleId(0)].position - center).norm();
        prop_assert!(distance >= radius - 1e-4, "distance {} radius {}", distance, radius);
    }

    #[test]
    fn proptest_pinned_corners_never_move(
        width in 2usize..7,
        height in 2usize..7,
        dt in (1.0f32 / 240.0)..(1.0 / 30.0),
        steps in 1usize..20,
    ) {
        let config = ClothConfig::default().with_grid(width, height);
        let mut cloth = Cloth::with_logger(config, NoopLogger).expect("valid config");
        let anchors = cloth.anchors();
        let start = anchors.map(|id| cloth.positions()[id.index()]);

        for _ in 0..steps {
            cloth.step(dt);
        }

        for (id, position) in anchors.iter().zip(start) {
            prop_assert_eq!(cloth.positions()[id.index()], position);
        }
        prop_assert!(cloth.positions().iter().all(|p| p.iter().all(|c| c.is_finite())));
    }

    #[test]
    fn proptest_mass_invariant(mass in prop_oneof![
        -10.0f32..10.0,
        Just(0.0f32),
        Just(f32::NAN),
        Just(f32::INFINITY),
    ]) {
        let particle = Particle::new(Point3::origin(), mass);

        prop_assert_eq!(particle.is_static(), particle.inverse_mass == 0.0);
        if !particle.is_static() {
            prop_assert!((particle.mass * particle.inverse_mass - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn proptest_dihedral_angle_in_range(
        p0 in arb_point(2.0),
        p1 in arb_point(2.0),
        p2 in arb_point(2.0),
        p3 in arb_point(2.0),
    ) {
        if let Some(measured) = dihedral(&p0, &p1, &p2, &p3) {
            prop_assert!(measured.angle >= 0.0 && measured.angle < TAU);
            if let Some(gradients) = measured.gradients {
                prop_assert!(gradients.iter().all(|g| g.iter().all(|c| c.is_finite())));
            }
        }
    }
}
