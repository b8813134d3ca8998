// Frame Scheduler
//
// Owns every per-slot resource and runs one tick per redraw. The two fence
// waits and the image acquisition happen before anything is submitted, so an
// out-of-date swapchain abandons the tick with no partial work on the queues.

use ash::vk;

use crate::backend::{ComputePass, DrawableSurface, Gpu, GraphicsPass, QueueKind, Submission};
use crate::error::{FrameError, GpuError};
use crate::frame::{
    ComputeBindings, FrameSlot, FrameStage, FrameSync, ParticleStore, RebuildOutcome,
    SimulationClock, SwapchainManager, TickOutcome,
};
use crate::particle::{ComputeParams, Particle};
use crate::{workgroup_count, MAX_FRAMES_IN_FLIGHT};

/// Per-renderer knobs that do not affect resource layout.
#[derive(Debug)]
pub struct RendererSettings {
    pub clock: SimulationClock,
    pub clear_color: [f32; 4],
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            clock: SimulationClock::fixed(0.001),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Command buffers recorded by one slot.
#[derive(Clone, Copy)]
struct SlotCommands {
    compute: vk::CommandBuffer,
    graphics: vk::CommandBuffer,
}

/// Everything one slot owns apart from its state buffer and bindings.
struct SlotResources {
    sync: FrameSync,
    commands: SlotCommands,
}

impl SlotResources {
    fn new(gpu: &mut impl Gpu) -> Result<Self, GpuError> {
        let sync = FrameSync::new(gpu)?;
        let compute = match gpu.allocate_command_buffer(QueueKind::Compute) {
            Ok(cmd) => cmd,
            Err(e) => {
                sync.destroy(gpu);
                return Err(e);
            }
        };
        let graphics = match gpu.allocate_command_buffer(QueueKind::Graphics) {
            Ok(cmd) => cmd,
            Err(e) => {
                gpu.free_command_buffer(compute);
                sync.destroy(gpu);
                return Err(e);
            }
        };

        Ok(Self {
            sync,
            commands: SlotCommands { compute, graphics },
        })
    }

    fn destroy(&self, gpu: &mut impl Gpu) {
        gpu.free_command_buffer(self.commands.graphics);
        gpu.free_command_buffer(self.commands.compute);
        self.sync.destroy(gpu);
    }
}

/// Owner of the simulation state, the per-slot sync objects and the swapchain.
///
/// Dropping the renderer drains the device and destroys everything in reverse
/// creation order before the backend itself is dropped.
pub struct ParticleRenderer<G: Gpu> {
    store: ParticleStore,
    bindings: ComputeBindings,
    slots: [SlotResources; MAX_FRAMES_IN_FLIGHT],
    swapchain: SwapchainManager,

    current_frame: FrameSlot,
    framebuffer_resized: bool,
    ticks_presented: u64,
    clock: SimulationClock,
    clear_color: [f32; 4],

    // Declared last so it outlives every handle above during drop
    gpu: G,
}

impl<G: Gpu> ParticleRenderer<G> {
    pub fn new(
        mut gpu: G,
        particles: &[Particle],
        settings: RendererSettings,
        drawable: &dyn DrawableSurface,
    ) -> Result<Self, GpuError> {
        let store = ParticleStore::new(&mut gpu, particles)?;
        let bindings = match ComputeBindings::new(&mut gpu, &store) {
            Ok(bindings) => bindings,
            Err(e) => {
                Self::release_partial(&mut gpu, &store, None, &[], &e);
                return Err(e);
            }
        };

        let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        let created = FrameSlot::all()
            .try_for_each(|_| {
                slots.push(SlotResources::new(&mut gpu)?);
                Ok::<(), GpuError>(())
            })
            .and_then(|()| SwapchainManager::new(&mut gpu, drawable));
        let mut swapchain = match created {
            Ok(swapchain) => swapchain,
            Err(e) => {
                Self::release_partial(&mut gpu, &store, Some(&bindings), &slots, &e);
                return Err(e);
            }
        };

        let slots: [SlotResources; MAX_FRAMES_IN_FLIGHT] = match slots.try_into() {
            Ok(slots) => slots,
            Err(slots) => {
                let e = GpuError::Protocol("frame slot count mismatch".into());
                swapchain.destroy(&mut gpu);
                Self::release_partial(&mut gpu, &store, Some(&bindings), &slots, &e);
                return Err(e);
            }
        };

        log::info!(
            "Frame scheduler ready: {} particles, {} frames in flight, {} workgroups per dispatch",
            store.particle_count(),
            MAX_FRAMES_IN_FLIGHT,
            workgroup_count(store.particle_count())
        );

        Ok(Self {
            store,
            bindings,
            slots,
            swapchain,
            current_frame: FrameSlot::default(),
            framebuffer_resized: false,
            ticks_presented: 0,
            clock: settings.clock,
            clear_color: settings.clear_color,
            gpu,
        })
    }

    /// Undo a setup that failed part way, newest objects first.
    fn release_partial(
        gpu: &mut G,
        store: &ParticleStore,
        bindings: Option<&ComputeBindings>,
        slots: &[SlotResources],
        cause: &GpuError,
    ) {
        log::warn!("Frame setup failed ({cause}), releasing what was built");
        for slot in slots.iter().rev() {
            slot.destroy(gpu);
        }
        if let Some(bindings) = bindings {
            bindings.destroy(gpu);
        }
        store.destroy(gpu);
    }

    // ─────────────────────────────────────────────────────────────────────
    // TICK
    // ─────────────────────────────────────────────────────────────────────

    /// Run one frame on the current slot.
    ///
    /// `Ok` covers presented, skipped (stale swapchain) and minimized ticks.
    /// `Err` is fatal: the renderer should be dropped.
    pub fn tick(&mut self, drawable: &dyn DrawableSurface) -> Result<TickOutcome, FrameError> {
        let slot = self.current_frame;
        let fail = move |stage: FrameStage| {
            move |source: GpuError| FrameError {
                stage,
                slot: slot.index(),
                source,
            }
        };

        if self.swapchain.needs_rebuild() {
            let outcome = self
                .swapchain
                .rebuild(&mut self.gpu, drawable)
                .map_err(fail(FrameStage::RebuildSwapchain))?;
            if outcome == RebuildOutcome::Deferred {
                return Ok(TickOutcome::Minimized);
            }
            // A rebuild already picked up any pending resize
            self.framebuffer_resized = false;
        }

        let (swapchain, extent) = match self.swapchain.current() {
            Some(current) => (current.handle(), current.extent()),
            None => return Ok(TickOutcome::Minimized),
        };
        let sync = &self.slots[slot.index()].sync;
        let commands = self.slots[slot.index()].commands;

        // 1. Previous compute on this slot has retired
        self.gpu
            .wait_for_fence(sync.compute_in_flight)
            .map_err(fail(FrameStage::AwaitCompute))?;

        // 2. Safe to overwrite the slot's uniform now. The clock only moves
        // once the tick is certain to be submitted.
        let step = self.clock.sample();
        let params = ComputeParams {
            delta_time: step.step,
        };
        self.bindings
            .write_params(&mut self.gpu, slot, &params)
            .map_err(fail(FrameStage::UpdateParams))?;

        // 5. Previous draw on this slot no longer reads its state buffer
        self.gpu
            .wait_for_fence(sync.render_in_flight)
            .map_err(fail(FrameStage::AwaitRender))?;

        // 6. Acquire before submitting anything
        let acquired = match self.gpu.acquire_next_image(swapchain, sync.image_available) {
            Ok(acquired) => acquired,
            Err(e) if e.is_out_of_date() => {
                log::debug!("Swapchain out of date at acquire, skipping frame slot {slot}");
                self.swapchain.invalidate();
                self.swapchain
                    .rebuild(&mut self.gpu, drawable)
                    .map_err(fail(FrameStage::RebuildSwapchain))?;
                return Ok(TickOutcome::Skipped);
            }
            Err(e) => return Err(fail(FrameStage::AcquireImage)(e)),
        };
        self.clock.commit(step);

        // 3. Record compute
        let group_count_x = workgroup_count(self.store.particle_count());
        self.gpu
            .reset_command_buffer(commands.compute)
            .and_then(|()| {
                self.gpu.record_compute(
                    commands.compute,
                    &ComputePass {
                        descriptor_set: self.bindings.descriptor_set(slot),
                        group_count_x,
                    },
                )
            })
            .map_err(fail(FrameStage::RecordCompute))?;

        // 4. Submit compute
        self.gpu
            .reset_fence(sync.compute_in_flight)
            .and_then(|()| {
                self.gpu.submit(
                    QueueKind::Compute,
                    &Submission {
                        command_buffer: commands.compute,
                        wait: &[],
                        signal: &[sync.compute_finished],
                        fence: sync.compute_in_flight,
                    },
                )
            })
            .map_err(fail(FrameStage::SubmitCompute))?;

        // 7. Record graphics
        let framebuffer = match self.swapchain.current() {
            Some(current) => current.framebuffer(acquired.index),
            None => {
                return Err(fail(FrameStage::RecordGraphics)(GpuError::Protocol(
                    "swapchain vanished mid-tick".into(),
                )))
            }
        };
        self.gpu
            .reset_command_buffer(commands.graphics)
            .and_then(|()| {
                self.gpu.record_graphics(
                    commands.graphics,
                    &GraphicsPass {
                        framebuffer,
                        extent,
                        vertex_buffer: self.store.buffer(slot),
                        vertex_count: self.store.particle_count(),
                        clear_color: self.clear_color,
                    },
                )
            })
            .map_err(fail(FrameStage::RecordGraphics))?;

        // 8. Submit graphics behind compute and acquisition
        let wait = [
            (sync.compute_finished, vk::PipelineStageFlags::VERTEX_INPUT),
            (
                sync.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ),
        ];
        self.gpu
            .reset_fence(sync.render_in_flight)
            .and_then(|()| {
                self.gpu.submit(
                    QueueKind::Graphics,
                    &Submission {
                        command_buffer: commands.graphics,
                        wait: &wait,
                        signal: &[sync.render_finished],
                        fence: sync.render_in_flight,
                    },
                )
            })
            .map_err(fail(FrameStage::SubmitGraphics))?;

        // 9. Present
        let stale = match self.gpu.present(swapchain, acquired.index, sync.render_finished) {
            Ok(suboptimal) => suboptimal || acquired.suboptimal,
            Err(e) if e.is_out_of_date() => true,
            Err(e) => return Err(fail(FrameStage::Present)(e)),
        };

        if stale || self.framebuffer_resized {
            log::debug!(
                "Rebuilding swapchain after present (stale: {}, resized: {})",
                stale,
                self.framebuffer_resized
            );
            self.framebuffer_resized = false;
            self.swapchain.invalidate();
            self.swapchain
                .rebuild(&mut self.gpu, drawable)
                .map_err(fail(FrameStage::RebuildSwapchain))?;
        }

        // 10. Advance
        self.current_frame = slot.next();
        self.ticks_presented += 1;
        log::trace!("Presented image {} from frame slot {}", acquired.index, slot);

        Ok(TickOutcome::Presented {
            slot,
            image_index: acquired.index,
        })
    }

    /// Signal from the window layer that the drawable area changed.
    pub fn request_resize(&mut self) {
        self.framebuffer_resized = true;
    }

    /// Slot the next tick will use.
    pub fn current_frame(&self) -> FrameSlot {
        self.current_frame
    }

    pub fn ticks_presented(&self) -> u64 {
        self.ticks_presented
    }

    pub fn particle_count(&self) -> u32 {
        self.store.particle_count()
    }

    pub fn store(&self) -> &ParticleStore {
        &self.store
    }

    pub fn bindings(&self) -> &ComputeBindings {
        &self.bindings
    }

    pub fn frame_sync(&self, slot: FrameSlot) -> &FrameSync {
        &self.slots[slot.index()].sync
    }

    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }
}

impl<G: Gpu> Drop for ParticleRenderer<G> {
    fn drop(&mut self) {
        log::info!("Cleaning up frame resources...");

        if let Err(e) = self.gpu.wait_idle() {
            log::error!("Device wait idle failed during shutdown: {e}");
        }

        // Reverse creation order
        self.swapchain.destroy(&mut self.gpu);
        for slot in self.slots.iter().rev() {
            slot.destroy(&mut self.gpu);
        }
        self.bindings.destroy(&mut self.gpu);
        self.store.destroy(&mut self.gpu);
    }
}
