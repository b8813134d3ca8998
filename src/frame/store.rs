// Particle State Store
//
// One device-local state buffer per frame slot. All slots start from the same
// host array, uploaded once through a staging buffer.

use ash::vk;

use crate::backend::{Gpu, MemoryLocation};
use crate::error::GpuError;
use crate::frame::FrameSlot;
use crate::particle::Particle;
use crate::MAX_FRAMES_IN_FLIGHT;

pub struct ParticleStore {
    buffers: [vk::Buffer; MAX_FRAMES_IN_FLIGHT],
    particle_count: u32,
    size: vk::DeviceSize,
}

impl ParticleStore {
    /// Allocate one state buffer per slot and fill each with `particles`.
    pub fn new(gpu: &mut impl Gpu, particles: &[Particle]) -> Result<Self, GpuError> {
        if particles.is_empty() {
            return Err(GpuError::EmptyParticleSet);
        }

        let size = Particle::buffer_size(particles.len());
        let bytes: &[u8] = bytemuck::cast_slice(particles);

        // Staging buffer: host-visible source for the device-local copies
        let staging = gpu.create_buffer(
            "particle staging",
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;

        let result = Self::upload(gpu, staging, bytes, size);
        gpu.destroy_buffer(staging);
        let buffers = result?;

        log::info!(
            "Uploaded {} particles into {} state buffers ({} bytes each)",
            particles.len(),
            MAX_FRAMES_IN_FLIGHT,
            size
        );

        Ok(Self {
            buffers,
            particle_count: particles.len() as u32,
            size,
        })
    }

    fn upload(
        gpu: &mut impl Gpu,
        staging: vk::Buffer,
        bytes: &[u8],
        size: vk::DeviceSize,
    ) -> Result<[vk::Buffer; MAX_FRAMES_IN_FLIGHT], GpuError> {
        gpu.write_buffer(staging, bytes)?;

        let mut buffers = [vk::Buffer::null(); MAX_FRAMES_IN_FLIGHT];
        for slot in FrameSlot::all() {
            let created = gpu
                .create_buffer(
                    &format!("particle state {slot}"),
                    size,
                    vk::BufferUsageFlags::STORAGE_BUFFER
                        | vk::BufferUsageFlags::VERTEX_BUFFER
                        | vk::BufferUsageFlags::TRANSFER_DST,
                    MemoryLocation::GpuOnly,
                )
                .and_then(|buffer| {
                    buffers[slot.index()] = buffer;
                    gpu.copy_buffer(staging, buffer, size)
                });

            if let Err(e) = created {
                for &buffer in buffers.iter().filter(|b| **b != vk::Buffer::null()) {
                    gpu.destroy_buffer(buffer);
                }
                return Err(e);
            }
        }
        Ok(buffers)
    }

    /// State buffer written by `slot`'s compute dispatch.
    pub fn buffer(&self, slot: FrameSlot) -> vk::Buffer {
        self.buffers[slot.index()]
    }

    pub fn particle_count(&self) -> u32 {
        self.particle_count
    }

    /// Byte size of each state buffer.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn destroy(&self, gpu: &mut impl Gpu) {
        for &buffer in &self.buffers {
            gpu.destroy_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessGpu;
    use crate::particle::seed_particles;

    #[test]
    fn every_slot_holds_the_seed() {
        let mut gpu = HeadlessGpu::new();
        let probe = gpu.probe();
        let seed = seed_particles(256, 0);
        let store = ParticleStore::new(&mut gpu, &seed).unwrap();

        for slot in FrameSlot::all() {
            assert_eq!(probe.read_particles(store.buffer(slot)), seed);
        }
        assert_ne!(store.buffer(FrameSlot::new(0)), store.buffer(FrameSlot::new(1)));
        // Only the slot buffers survive; the staging buffer is gone
        assert_eq!(probe.live().buffers, MAX_FRAMES_IN_FLIGHT);

        store.destroy(&mut gpu);
        assert_eq!(probe.live().buffers, 0);
    }

    #[test]
    fn empty_particle_set_is_rejected() {
        let mut gpu = HeadlessGpu::new();
        assert!(matches!(
            ParticleStore::new(&mut gpu, &[]),
            Err(GpuError::EmptyParticleSet)
        ));
    }
}
