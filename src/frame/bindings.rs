// Descriptor Binder
//
// Per slot i: binding 0 = params uniform, binding 1 = state of slot i-1 (read),
// binding 2 = state of slot i (write). Written once; only the uniform contents
// change per tick.

use ash::vk;
use std::mem::size_of;

use crate::backend::{ComputeBindingSet, Gpu, MemoryLocation};
use crate::error::GpuError;
use crate::frame::{FrameSlot, ParticleStore};
use crate::particle::ComputeParams;
use crate::MAX_FRAMES_IN_FLIGHT;

pub struct ComputeBindings {
    uniform_buffers: [vk::Buffer; MAX_FRAMES_IN_FLIGHT],
    descriptor_sets: [vk::DescriptorSet; MAX_FRAMES_IN_FLIGHT],
}

impl ComputeBindings {
    pub fn new(gpu: &mut impl Gpu, store: &ParticleStore) -> Result<Self, GpuError> {
        let mut bindings = Self {
            uniform_buffers: [vk::Buffer::null(); MAX_FRAMES_IN_FLIGHT],
            descriptor_sets: [vk::DescriptorSet::null(); MAX_FRAMES_IN_FLIGHT],
        };

        for slot in FrameSlot::all() {
            if let Err(e) = bindings.bind_slot(gpu, store, slot) {
                bindings.destroy(gpu);
                return Err(e);
            }
            log::debug!(
                "Compute bindings for slot {}: read slot {}, write slot {}",
                slot,
                slot.previous(),
                slot
            );
        }

        Ok(bindings)
    }

    fn bind_slot(
        &mut self,
        gpu: &mut impl Gpu,
        store: &ParticleStore,
        slot: FrameSlot,
    ) -> Result<(), GpuError> {
        let params_range = size_of::<ComputeParams>() as vk::DeviceSize;
        let params = gpu.create_buffer(
            &format!("compute params {slot}"),
            params_range,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;
        self.uniform_buffers[slot.index()] = params;

        let set = ComputeBindingSet {
            params,
            params_range,
            previous_state: store.buffer(slot.previous()),
            current_state: store.buffer(slot),
            state_range: store.size(),
        };
        self.descriptor_sets[slot.index()] = gpu.create_compute_descriptor_set(&set)?;
        Ok(())
    }

    /// Overwrite `slot`'s uniform buffer. The slot's compute fence must have signaled.
    pub fn write_params(
        &self,
        gpu: &mut impl Gpu,
        slot: FrameSlot,
        params: &ComputeParams,
    ) -> Result<(), GpuError> {
        gpu.write_buffer(self.uniform_buffers[slot.index()], bytemuck::bytes_of(params))
    }

    pub fn descriptor_set(&self, slot: FrameSlot) -> vk::DescriptorSet {
        self.descriptor_sets[slot.index()]
    }

    pub fn uniform_buffer(&self, slot: FrameSlot) -> vk::Buffer {
        self.uniform_buffers[slot.index()]
    }

    /// Descriptor sets are returned with the backend's pool.
    pub fn destroy(&self, gpu: &mut impl Gpu) {
        for &buffer in &self.uniform_buffers {
            if buffer != vk::Buffer::null() {
                gpu.destroy_buffer(buffer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessGpu;
    use crate::particle::seed_particles;

    #[test]
    fn each_slot_reads_previous_and_writes_own_buffer() {
        let mut gpu = HeadlessGpu::new();
        let probe = gpu.probe();
        let store = ParticleStore::new(&mut gpu, &seed_particles(256, 0)).unwrap();
        let bindings = ComputeBindings::new(&mut gpu, &store).unwrap();

        for slot in FrameSlot::all() {
            let set = probe
                .descriptor_bindings(bindings.descriptor_set(slot))
                .expect("descriptor set was written");
            assert_eq!(set.params, bindings.uniform_buffer(slot));
            assert_eq!(set.previous_state, store.buffer(slot.previous()));
            assert_eq!(set.current_state, store.buffer(slot));
            assert_eq!(set.state_range, store.size());
        }

        bindings.destroy(&mut gpu);
        store.destroy(&mut gpu);
    }

    #[test]
    fn params_land_in_the_slot_uniform() {
        let mut gpu = HeadlessGpu::new();
        let probe = gpu.probe();
        let store = ParticleStore::new(&mut gpu, &seed_particles(256, 0)).unwrap();
        let bindings = ComputeBindings::new(&mut gpu, &store).unwrap();

        let slot = FrameSlot::new(1);
        bindings
            .write_params(&mut gpu, slot, &ComputeParams { delta_time: 0.25 })
            .unwrap();

        let bytes = probe.read_buffer(bindings.uniform_buffer(slot));
        let params: ComputeParams = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(params.delta_time, 0.25);
    }
}
