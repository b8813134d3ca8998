// Synchronization primitives
//
// Fences for GPU-CPU sync, semaphores for GPU-GPU ordering.
// Two fences per slot so compute and graphics retire independently.

use ash::vk;

use crate::backend::Gpu;
use crate::error::GpuError;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    /// Signaled by acquisition, waited by the graphics submission.
    pub image_available: vk::Semaphore,
    /// Signaled by the compute submission, waited at vertex input.
    pub compute_finished: vk::Semaphore,
    /// Signaled by the graphics submission, waited by present.
    pub render_finished: vk::Semaphore,
    /// Host wait for this slot's previous compute dispatch.
    pub compute_in_flight: vk::Fence,
    /// Host wait for this slot's previous draw.
    pub render_in_flight: vk::Fence,
}

impl FrameSync {
    pub fn new(gpu: &mut impl Gpu) -> Result<Self, GpuError> {
        let mut semaphores = Vec::with_capacity(3);
        let mut fences = Vec::with_capacity(2);
        let created = Self::create_into(gpu, &mut semaphores, &mut fences);

        if let Err(e) = created {
            for &semaphore in &semaphores {
                gpu.destroy_semaphore(semaphore);
            }
            for &fence in &fences {
                gpu.destroy_fence(fence);
            }
            return Err(e);
        }

        match (&semaphores[..], &fences[..]) {
            (
                &[image_available, compute_finished, render_finished],
                &[compute_in_flight, render_in_flight],
            ) => Ok(Self {
                image_available,
                compute_finished,
                render_finished,
                compute_in_flight,
                render_in_flight,
            }),
            _ => Err(GpuError::Protocol("frame sync object count mismatch".into())),
        }
    }

    fn create_into(
        gpu: &mut impl Gpu,
        semaphores: &mut Vec<vk::Semaphore>,
        fences: &mut Vec<vk::Fence>,
    ) -> Result<(), GpuError> {
        for _ in 0..3 {
            semaphores.push(gpu.create_semaphore()?);
        }
        // Fences start signaled so the first wait on each slot returns immediately
        for _ in 0..2 {
            fences.push(gpu.create_fence(true)?);
        }
        Ok(())
    }

    pub fn destroy(&self, gpu: &mut impl Gpu) {
        gpu.destroy_semaphore(self.image_available);
        gpu.destroy_semaphore(self.compute_finished);
        gpu.destroy_semaphore(self.render_finished);
        gpu.destroy_fence(self.compute_in_flight);
        gpu.destroy_fence(self.render_in_flight);
    }
}
