// Frame protocol - per-slot resources and the tick state machine
//
// FRAME FLOW (one tick, slot i = current_frame):
// ┌──────────────────────────────────────────────────────────────────────────┐
// │ wait compute fence ─> write params ─> wait render fence ─> acquire image │
// │   ─> record+submit compute (signal compute_finished)                     │
// │   ─> record+submit graphics (wait compute_finished + image_available)    │
// │   ─> present (wait render_finished) ─> advance slot                      │
// └──────────────────────────────────────────────────────────────────────────┘

pub mod bindings;
pub mod clock;
pub mod scheduler;
pub mod store;
pub mod swapchain;
pub mod sync;

use std::fmt;

use crate::MAX_FRAMES_IN_FLIGHT;

pub use bindings::ComputeBindings;
pub use clock::{ClockSample, SimulationClock};
pub use scheduler::{ParticleRenderer, RendererSettings};
pub use store::ParticleStore;
pub use swapchain::{RebuildOutcome, Swapchain, SwapchainManager};
pub use sync::FrameSync;

/// Index of one of the `MAX_FRAMES_IN_FLIGHT` frame slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FrameSlot(usize);

impl FrameSlot {
    /// Slot `index mod MAX_FRAMES_IN_FLIGHT`.
    pub const fn new(index: usize) -> Self {
        Self(index % MAX_FRAMES_IN_FLIGHT)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    /// The slot used on the following tick.
    pub const fn next(self) -> Self {
        Self((self.0 + 1) % MAX_FRAMES_IN_FLIGHT)
    }

    /// The slot whose state this slot's compute stage reads.
    pub const fn previous(self) -> Self {
        Self((self.0 + MAX_FRAMES_IN_FLIGHT - 1) % MAX_FRAMES_IN_FLIGHT)
    }

    /// All slots in ascending order.
    pub fn all() -> impl Iterator<Item = FrameSlot> {
        (0..MAX_FRAMES_IN_FLIGHT).map(FrameSlot)
    }
}

impl fmt::Display for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stages of a tick, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStage {
    RebuildSwapchain,
    AwaitCompute,
    UpdateParams,
    AwaitRender,
    AcquireImage,
    RecordCompute,
    SubmitCompute,
    RecordGraphics,
    SubmitGraphics,
    Present,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStage::RebuildSwapchain => "swapchain rebuild",
            FrameStage::AwaitCompute => "compute fence wait",
            FrameStage::UpdateParams => "parameter update",
            FrameStage::AwaitRender => "render fence wait",
            FrameStage::AcquireImage => "image acquisition",
            FrameStage::RecordCompute => "compute recording",
            FrameStage::SubmitCompute => "compute submission",
            FrameStage::RecordGraphics => "graphics recording",
            FrameStage::SubmitGraphics => "graphics submission",
            FrameStage::Present => "present",
        };
        f.write_str(name)
    }
}

/// What a tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Compute and graphics were submitted and the image was queued for presentation.
    Presented { slot: FrameSlot, image_index: u32 },
    /// The swapchain was out of date at acquisition; nothing was submitted.
    Skipped,
    /// The drawable area is zero; nothing was submitted.
    Minimized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cycle_in_order() {
        let mut slot = FrameSlot::default();
        let seen: Vec<usize> = (0..6)
            .map(|_| {
                let i = slot.index();
                slot = slot.next();
                i
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn first_slot_reads_last_slot() {
        assert_eq!(FrameSlot::new(0).previous(), FrameSlot::new(MAX_FRAMES_IN_FLIGHT - 1));
        for slot in FrameSlot::all() {
            assert_eq!(slot.previous().next(), slot);
        }
    }

    #[test]
    fn new_wraps_tick_counter() {
        assert_eq!(FrameSlot::new(MAX_FRAMES_IN_FLIGHT), FrameSlot::new(0));
        assert_eq!(FrameSlot::all().count(), MAX_FRAMES_IN_FLIGHT);
    }
}
