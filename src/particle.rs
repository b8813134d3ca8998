// Particle data shared between the host, the compute program and the vertex stage
//
// Layout is #[repr(C)] and Pod so the host array can be uploaded byte-for-byte
// and the graphics pipeline can use field offsets as vertex attribute offsets.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::mem::{offset_of, size_of};

/// One simulated body.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: Vec2,
    pub velocity: Vec2,
    pub mass: f32,
    pub color: Vec3,
}

impl Particle {
    /// Size in bytes of one particle record on the GPU.
    pub const STRIDE: u32 = size_of::<Particle>() as u32;
    /// Byte offset of `position` (vertex location 0).
    pub const POSITION_OFFSET: u32 = offset_of!(Particle, position) as u32;
    /// Byte offset of `color` (vertex location 1).
    pub const COLOR_OFFSET: u32 = offset_of!(Particle, color) as u32;

    /// Byte size of a state buffer holding `count` particles.
    pub fn buffer_size(count: usize) -> u64 {
        (count * size_of::<Particle>()) as u64
    }
}

/// Contents of the per-slot uniform buffer (compute binding 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ComputeParams {
    pub delta_time: f32,
}

/// Gravitational constant used by the compute program.
pub const GRAVITY: f32 = 1.0e-4;
/// Added to squared distances so coincident particles do not blow up.
pub const SOFTENING: f32 = 1.0e-3;

/// CPU reference of one compute invocation (`particle.comp`).
///
/// Reads every particle from `previous`, writes only `current[id]`.
pub fn n_body_step(id: u32, params: &ComputeParams, previous: &[Particle], current: &mut [Particle]) {
    let i = id as usize;
    let me = previous[i];

    let mut acceleration = Vec2::ZERO;
    for other in previous {
        let offset = other.position - me.position;
        let dist_sq = offset.length_squared() + SOFTENING;
        acceleration += offset * (other.mass / (dist_sq * dist_sq.sqrt()));
    }

    let velocity = me.velocity + acceleration * GRAVITY * params.delta_time;
    current[i] = Particle {
        position: me.position + velocity * params.delta_time,
        velocity,
        ..me
    };
}

/// Generate the initial particle array.
///
/// Position, velocity and mass are drawn uniformly from `[0, 1)`; color is
/// white. The same `seed` always yields the same array.
pub fn seed_particles(count: usize, seed: u64) -> Vec<Particle> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| Particle {
            position: Vec2::new(rng.gen(), rng.gen()),
            velocity: Vec2::new(rng.gen(), rng.gen()),
            mass: rng.gen(),
            color: Vec3::ONE,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_vertex_contract() {
        assert_eq!(Particle::STRIDE, 32);
        assert_eq!(Particle::POSITION_OFFSET, 0);
        assert_eq!(Particle::COLOR_OFFSET, 20);
        assert_eq!(Particle::buffer_size(256), 256 * 32);
    }

    #[test]
    fn seeding_is_deterministic() {
        let a = seed_particles(512, 0);
        let b = seed_particles(512, 0);
        let c = seed_particles(512, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn step_reads_previous_and_writes_one_slot() {
        let previous = seed_particles(4, 3);
        let mut current = vec![Particle::zeroed(); 4];
        n_body_step(2, &ComputeParams { delta_time: 0.01 }, &previous, &mut current);

        assert_eq!(current[0], Particle::zeroed());
        assert_ne!(current[2].position, previous[2].position);
        assert_eq!(current[2].mass, previous[2].mass);
        assert_eq!(current[2].color, previous[2].color);
    }

    #[test]
    fn zero_time_step_is_identity() {
        let previous = seed_particles(8, 0);
        let mut current = previous.clone();
        for id in 0..8 {
            n_body_step(id, &ComputeParams { delta_time: 0.0 }, &previous, &mut current);
        }
        assert_eq!(current, previous);
    }

    #[test]
    fn seeded_values_are_in_unit_range() {
        for p in seed_particles(1024, 7) {
            for v in [p.position.x, p.position.y, p.velocity.x, p.velocity.y, p.mass] {
                assert!((0.0..1.0).contains(&v));
            }
            assert_eq!(p.color, Vec3::ONE);
        }
    }
}
