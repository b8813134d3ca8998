// Backend module - GPU abstraction layer
//
// Design: the frame protocol talks to the GPU only through the `Gpu` trait.
// Handles are plain `ash::vk` handles so the Vulkan backend is a thin
// pass-through, while the headless backend mints its own handle values.

pub mod buffer;
pub mod device;
pub mod headless;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod vulkan;

use ash::vk;

use crate::error::GpuError;

pub use device::VulkanDevice;
pub use headless::{HeadlessGpu, HeadlessProbe};
pub use vulkan::VulkanGpu;

/// Logical submission stream. Both may map to the same hardware queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Compute,
    Graphics,
}

/// Where a buffer lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device-local, not host accessible.
    GpuOnly,
    /// Host-visible and coherent, persistently mapped.
    CpuToGpu,
}

/// Resources bound to the compute program for one frame slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComputeBindingSet {
    /// Binding 0: uniform buffer holding [`crate::ComputeParams`].
    pub params: vk::Buffer,
    pub params_range: vk::DeviceSize,
    /// Binding 1: state written by the previous slot (read-only).
    pub previous_state: vk::Buffer,
    /// Binding 2: state owned by this slot (read-write).
    pub current_state: vk::Buffer,
    pub state_range: vk::DeviceSize,
}

/// Arguments for recording a compute command buffer.
#[derive(Clone, Copy, Debug)]
pub struct ComputePass {
    pub descriptor_set: vk::DescriptorSet,
    pub group_count_x: u32,
}

/// Arguments for recording a graphics command buffer.
#[derive(Clone, Copy, Debug)]
pub struct GraphicsPass {
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub clear_color: [f32; 4],
}

/// One queue submission.
#[derive(Clone, Copy, Debug)]
pub struct Submission<'a> {
    pub command_buffer: vk::CommandBuffer,
    /// Semaphores to wait on and the stage that waits for each.
    pub wait: &'a [(vk::Semaphore, vk::PipelineStageFlags)],
    pub signal: &'a [vk::Semaphore],
    /// Signaled when the submission retires.
    pub fence: vk::Fence,
}

/// A freshly created swapchain before views and framebuffers exist.
#[derive(Clone, Debug)]
pub struct SwapchainImages {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Result of a successful image acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// Usable but no longer matches the surface; rebuild after present.
    pub suboptimal: bool,
}

/// The window's current drawable area, supplied by the windowing layer.
pub trait DrawableSurface {
    /// Size in physical pixels; zero in either dimension while minimized.
    fn drawable_extent(&self) -> vk::Extent2D;
}

/// Every GPU operation the frame protocol needs.
///
/// Destroy calls take handles by value and never fail; callers are
/// responsible for calling them in reverse-dependency order.
pub trait Gpu {
    // ─────────────────────────────────────────────────────────────────────
    // BUFFERS
    // ─────────────────────────────────────────────────────────────────────
    fn create_buffer(
        &mut self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<vk::Buffer, GpuError>;

    /// Write `bytes` at offset 0 of a [`MemoryLocation::CpuToGpu`] buffer.
    fn write_buffer(&mut self, buffer: vk::Buffer, bytes: &[u8]) -> Result<(), GpuError>;

    /// Copy `size` bytes and block until the copy has completed.
    fn copy_buffer(
        &mut self,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<(), GpuError>;

    fn destroy_buffer(&mut self, buffer: vk::Buffer);

    // ─────────────────────────────────────────────────────────────────────
    // DESCRIPTORS
    // ─────────────────────────────────────────────────────────────────────
    /// Allocate a descriptor set for the compute program and write all three bindings.
    fn create_compute_descriptor_set(
        &mut self,
        bindings: &ComputeBindingSet,
    ) -> Result<vk::DescriptorSet, GpuError>;

    // ─────────────────────────────────────────────────────────────────────
    // SYNCHRONIZATION
    // ─────────────────────────────────────────────────────────────────────
    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence, GpuError>;
    /// Block the host until `fence` is signaled.
    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<(), GpuError>;
    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), GpuError>;
    fn destroy_fence(&mut self, fence: vk::Fence);

    fn create_semaphore(&mut self) -> Result<vk::Semaphore, GpuError>;
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);

    /// Block the host until every queue is idle.
    fn wait_idle(&mut self) -> Result<(), GpuError>;

    // ─────────────────────────────────────────────────────────────────────
    // COMMANDS
    // ─────────────────────────────────────────────────────────────────────
    fn allocate_command_buffer(&mut self, queue: QueueKind) -> Result<vk::CommandBuffer, GpuError>;
    fn free_command_buffer(&mut self, cmd: vk::CommandBuffer);
    fn reset_command_buffer(&mut self, cmd: vk::CommandBuffer) -> Result<(), GpuError>;
    /// Bind the compute program and descriptor set, then dispatch.
    fn record_compute(&mut self, cmd: vk::CommandBuffer, pass: &ComputePass) -> Result<(), GpuError>;
    /// Begin the render pass, set viewport/scissor, bind vertices and draw points.
    fn record_graphics(&mut self, cmd: vk::CommandBuffer, pass: &GraphicsPass) -> Result<(), GpuError>;
    fn submit(&mut self, queue: QueueKind, submission: &Submission<'_>) -> Result<(), GpuError>;

    // ─────────────────────────────────────────────────────────────────────
    // PRESENTATION
    // ─────────────────────────────────────────────────────────────────────
    fn create_swapchain(&mut self, extent: vk::Extent2D) -> Result<SwapchainImages, GpuError>;
    fn create_image_view(&mut self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView, GpuError>;
    fn create_framebuffer(
        &mut self,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, GpuError>;
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);
    fn destroy_image_view(&mut self, view: vk::ImageView);
    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR);

    /// Returns [`GpuError::OutOfDate`] when the surface no longer matches.
    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquiredImage, GpuError>;

    /// Returns `Ok(true)` when suboptimal and [`GpuError::OutOfDate`] when stale.
    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, GpuError>;
}
