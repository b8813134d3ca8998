// =============================================================================
// PARTICLE FRAMES - GPU particle simulation with pipelined compute + graphics
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Application loop (winit)                                       │
// │    └── ParticleRenderer (owner of every GPU resource)           │
// │          ├── Frame Scheduler (fences, semaphores, submissions)  │
// │          ├── Descriptor Binder (prev/cur state per slot)        │
// │          ├── Particle State Store (one buffer per slot)         │
// │          └── Swapchain Lifecycle Manager                        │
// │                └── Gpu backend (Vulkan or headless emulator)    │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod particle;

pub use error::{FrameError, GpuError};
pub use frame::{FrameSlot, FrameStage, ParticleRenderer, RendererSettings, TickOutcome};
pub use particle::{ComputeParams, Particle};

/// Number of frames the CPU may record ahead of the GPU.
///
/// Every per-frame resource is stored in a `[T; MAX_FRAMES_IN_FLIGHT]` array.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

// Slot 0 reads the buffer written by the last slot; with a single slot the
// compute stage would read and write the same buffer.
const _: () = assert!(MAX_FRAMES_IN_FLIGHT >= 2, "at least two frames in flight are required");

/// Local workgroup size of the compute program (`local_size_x`).
pub const WORKGROUP_SIZE: u32 = 256;

/// Number of workgroups dispatched for `particle_count` particles.
///
/// Rounds down: when the count is not a multiple of [`WORKGROUP_SIZE`] the
/// trailing particles are never updated by the compute stage.
pub const fn workgroup_count(particle_count: u32) -> u32 {
    particle_count / WORKGROUP_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroup_count_drops_remainder() {
        assert_eq!(workgroup_count(256), 1);
        assert_eq!(workgroup_count(256 * 64), 64);
        assert_eq!(workgroup_count(300), 1);
        assert_eq!(workgroup_count(255), 0);
    }
}
