// Headless backend - a CPU emulator of the `Gpu` trait
//
// Submissions execute synchronously at submit time, so every fence is
// signaled by the time `submit` returns. What the emulator adds over a plain
// mock is rule checking: binary semaphores must alternate signal/wait, fences
// must be unsignaled when submitted, and objects must be destroyed after the
// objects that reference them. Breaking a rule records a violation and fails
// the call the way a validation layer would.
//
// State lives behind `Rc<RefCell<..>>` so a `HeadlessProbe` can inspect and
// script the device after the `HeadlessGpu` has been moved into a renderer.

use ash::vk::{self, Handle};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use super::{
    AcquiredImage, ComputeBindingSet, ComputePass, DrawableSurface, Gpu, GraphicsPass,
    MemoryLocation, QueueKind, Submission, SwapchainImages,
};
use crate::error::GpuError;
use crate::particle::{n_body_step, ComputeParams, Particle};
use crate::WORKGROUP_SIZE;

/// One compute invocation: `(global_id, params, previous_state, current_state)`.
pub type ComputeKernel = Box<dyn FnMut(u32, &ComputeParams, &[Particle], &mut [Particle])>;

/// Result injected into the next acquire or present call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scripted {
    OutOfDate,
    Suboptimal,
    Fail(vk::Result),
}

/// Counts of objects created and not yet destroyed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub buffers: usize,
    pub descriptor_sets: usize,
    pub fences: usize,
    pub semaphores: usize,
    pub command_buffers: usize,
    pub swapchains: usize,
    pub image_views: usize,
    pub framebuffers: usize,
}

/// Work captured in a command buffer.
#[derive(Clone, Copy, Debug)]
pub enum RecordedWork {
    Compute(ComputePass),
    Graphics(GraphicsPass),
}

/// A submission as the queue saw it.
#[derive(Clone, Debug)]
pub struct SubmissionRecord {
    pub queue: QueueKind,
    pub command_buffer: vk::CommandBuffer,
    pub work: RecordedWork,
    pub wait: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

struct BufferState {
    name: String,
    location: MemoryLocation,
    data: Vec<u8>,
}

struct SwapchainState {
    images: Vec<vk::Image>,
    next_image: usize,
}

struct CommandState {
    queue: QueueKind,
    recorded: Option<RecordedWork>,
}

struct DeviceState {
    next_handle: u64,
    image_count: usize,

    buffers: HashMap<vk::Buffer, BufferState>,
    descriptor_sets: HashMap<vk::DescriptorSet, ComputeBindingSet>,
    fences: HashMap<vk::Fence, bool>,
    semaphores: HashMap<vk::Semaphore, bool>,
    command_buffers: HashMap<vk::CommandBuffer, CommandState>,
    swapchains: HashMap<vk::SwapchainKHR, SwapchainState>,
    image_views: HashMap<vk::ImageView, vk::Image>,
    framebuffers: HashMap<vk::Framebuffer, vk::ImageView>,

    acquire_script: VecDeque<Scripted>,
    present_script: VecDeque<Scripted>,

    submissions: Vec<SubmissionRecord>,
    presented: Vec<u32>,
    violations: Vec<String>,
    wait_idle_count: usize,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            next_handle: 0x1000,
            image_count: 3,
            buffers: HashMap::new(),
            descriptor_sets: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            command_buffers: HashMap::new(),
            swapchains: HashMap::new(),
            image_views: HashMap::new(),
            framebuffers: HashMap::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            submissions: Vec::new(),
            presented: Vec::new(),
            violations: Vec::new(),
            wait_idle_count: 0,
        }
    }

    fn mint<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    /// Record a rule violation and turn it into the error returned to the caller.
    fn violation(&mut self, message: String) -> GpuError {
        log::error!("[headless] {message}");
        self.violations.push(message.clone());
        GpuError::Protocol(message)
    }

    fn live(&self) -> LiveObjects {
        LiveObjects {
            buffers: self.buffers.len(),
            descriptor_sets: self.descriptor_sets.len(),
            fences: self.fences.len(),
            semaphores: self.semaphores.len(),
            command_buffers: self.command_buffers.len(),
            swapchains: self.swapchains.len(),
            image_views: self.image_views.len(),
            framebuffers: self.framebuffers.len(),
        }
    }

    fn buffer(&mut self, buffer: vk::Buffer) -> Result<&mut BufferState, GpuError> {
        if !self.buffers.contains_key(&buffer) {
            return Err(self.violation(format!("use of unknown buffer {buffer:?}")));
        }
        self.buffers
            .get_mut(&buffer)
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN))
    }

    fn particles(&mut self, buffer: vk::Buffer) -> Result<Vec<Particle>, GpuError> {
        let state = self.buffer(buffer)?;
        Ok(bytemuck::pod_collect_to_vec(&state.data))
    }

    /// Consume a binary semaphore signal.
    fn wait_semaphore(&mut self, semaphore: vk::Semaphore, waiter: &str) -> Result<(), GpuError> {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if *signaled => {
                *signaled = false;
                Ok(())
            }
            Some(_) => Err(self.violation(format!(
                "{waiter} waits on semaphore {semaphore:?} with no pending signal"
            ))),
            None => Err(self.violation(format!("{waiter} waits on unknown semaphore {semaphore:?}"))),
        }
    }

    fn signal_semaphore(&mut self, semaphore: vk::Semaphore, signaler: &str) -> Result<(), GpuError> {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if !*signaled => {
                *signaled = true;
                Ok(())
            }
            Some(_) => Err(self.violation(format!(
                "{signaler} signals semaphore {semaphore:?} that is already signaled"
            ))),
            None => Err(self.violation(format!("{signaler} signals unknown semaphore {semaphore:?}"))),
        }
    }

    fn run_compute(&mut self, pass: &ComputePass, kernel: &mut ComputeKernel) -> Result<(), GpuError> {
        let Some(set) = self.descriptor_sets.get(&pass.descriptor_set).copied() else {
            return Err(self.violation(format!(
                "dispatch with unknown descriptor set {:?}",
                pass.descriptor_set
            )));
        };

        let params_bytes = self.buffer(set.params)?.data.clone();
        if params_bytes.len() < std::mem::size_of::<ComputeParams>() {
            return Err(self.violation("params buffer smaller than ComputeParams".into()));
        }
        let params: ComputeParams =
            bytemuck::pod_read_unaligned(&params_bytes[..std::mem::size_of::<ComputeParams>()]);

        let previous = self.particles(set.previous_state)?;
        let mut current = self.particles(set.current_state)?;

        // Invocations past the end of the array are masked, like a bounds check in the shader
        let invocations = (pass.group_count_x * WORKGROUP_SIZE).min(current.len() as u32);
        for id in 0..invocations {
            kernel(id, &params, &previous, &mut current);
        }

        self.buffer(set.current_state)?
            .data
            .copy_from_slice(bytemuck::cast_slice(&current));
        Ok(())
    }

    fn check_graphics(&mut self, pass: &GraphicsPass) -> Result<(), GpuError> {
        if !self.framebuffers.contains_key(&pass.framebuffer) {
            return Err(self.violation(format!(
                "draw into unknown framebuffer {:?}",
                pass.framebuffer
            )));
        }
        let needed = Particle::buffer_size(pass.vertex_count as usize) as usize;
        let available = self.buffer(pass.vertex_buffer)?.data.len();
        if needed > available {
            return Err(self.violation(format!(
                "draw of {} vertices reads past the end of a {available} byte buffer",
                pass.vertex_count
            )));
        }
        Ok(())
    }
}

/// CPU emulation of a device with a single combined graphics/compute queue.
pub struct HeadlessGpu {
    state: Rc<RefCell<DeviceState>>,
    kernel: ComputeKernel,
}

impl HeadlessGpu {
    /// Emulator running the n-body reference kernel on a three-image swapchain.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(DeviceState::new())),
            kernel: Box::new(n_body_step),
        }
    }

    /// Replace the compute program.
    pub fn with_kernel(
        mut self,
        kernel: impl FnMut(u32, &ComputeParams, &[Particle], &mut [Particle]) + 'static,
    ) -> Self {
        self.kernel = Box::new(kernel);
        self
    }

    /// Number of images in every swapchain created from now on.
    pub fn with_image_count(self, image_count: usize) -> Self {
        self.state.borrow_mut().image_count = image_count.max(1);
        self
    }

    /// Shared view of the device for assertions and scripting.
    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe {
            state: Rc::clone(&self.state),
        }
    }
}

impl Default for HeadlessGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HeadlessGpu {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        // Descriptor sets belong to the pool, which goes away with the device
        state.descriptor_sets.clear();
        let live = state.live();
        if live != LiveObjects::default() {
            log::warn!("[headless] device dropped with live objects: {live:?}");
        }
    }
}

impl Gpu for HeadlessGpu {
    fn create_buffer(
        &mut self,
        name: &str,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<vk::Buffer, GpuError> {
        let mut state = self.state.borrow_mut();
        if size == 0 {
            return Err(state.violation(format!("buffer '{name}' has zero size")));
        }
        let buffer = state.mint();
        state.buffers.insert(
            buffer,
            BufferState {
                name: name.to_owned(),
                location,
                data: vec![0; size as usize],
            },
        );
        Ok(buffer)
    }

    fn write_buffer(&mut self, buffer: vk::Buffer, bytes: &[u8]) -> Result<(), GpuError> {
        let mut state = self.state.borrow_mut();
        let target = state.buffer(buffer)?;
        if target.location != MemoryLocation::CpuToGpu {
            let name = target.name.clone();
            return Err(state.violation(format!("host write to device-local buffer '{name}'")));
        }
        if bytes.len() > target.data.len() {
            let name = target.name.clone();
            return Err(state.violation(format!("write of {} bytes overflows '{name}'", bytes.len())));
        }
        target.data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<(), GpuError> {
        let mut state = self.state.borrow_mut();
        let size = size as usize;
        let source = state.buffer(src)?.data.get(..size).map(<[u8]>::to_vec);
        let Some(source) = source else {
            return Err(state.violation(format!("copy of {size} bytes reads past the source")));
        };
        let target = state.buffer(dst)?;
        if target.data.len() < size {
            return Err(state.violation(format!("copy of {size} bytes overflows the destination")));
        }
        target.data[..size].copy_from_slice(&source);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        let mut state = self.state.borrow_mut();
        if state.buffers.remove(&buffer).is_none() {
            state.violation(format!("destroy of unknown buffer {buffer:?}"));
        }
    }

    fn create_compute_descriptor_set(
        &mut self,
        bindings: &ComputeBindingSet,
    ) -> Result<vk::DescriptorSet, GpuError> {
        let mut state = self.state.borrow_mut();
        for buffer in [bindings.params, bindings.previous_state, bindings.current_state] {
            state.buffer(buffer)?;
        }
        if bindings.previous_state == bindings.current_state {
            return Err(state.violation("compute reads and writes the same state buffer".into()));
        }
        let set = state.mint();
        state.descriptor_sets.insert(set, *bindings);
        Ok(set)
    }

    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence, GpuError> {
        let mut state = self.state.borrow_mut();
        let fence = state.mint();
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<(), GpuError> {
        let mut state = self.state.borrow_mut();
        match state.fences.get(&fence).copied() {
            Some(true) => Ok(()),
            // Nothing is pending that could ever signal it
            Some(false) => {
                state.violation(format!("wait on unsignaled fence {fence:?} would never return"));
                Err(GpuError::Vulkan(vk::Result::TIMEOUT))
            }
            None => Err(state.violation(format!("wait on unknown fence {fence:?}"))),
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), GpuError> {
        let mut state = self.state.borrow_mut();
        match state.fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(state.violation(format!("reset of unknown fence {fence:?}"))),
        }
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        if state.fences.remove(&fence).is_none() {
            state.violation(format!("destroy of unknown fence {fence:?}"));
        }
    }

    fn create_semaphore(&mut self) -> Result<vk::Semaphore, GpuError> {
        let mut state = self.state.borrow_mut();
        let semaphore = state.mint();
        state.semaphores.insert(semaphore, false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        let mut state = self.state.borrow_mut();
        if state.semaphores.remove(&semaphore).is_none() {
            state.violation(format!("destroy of unknown semaphore {semaphore:?}"));
        }
    }

    fn wait_idle(&mut self) -> Result<(), GpuError> {
        self.state.borrow_mut().wait_idle_count += 1;
        Ok(())
    }

    fn allocate_command_buffer(&mut self, queue: QueueKind) -> Result<vk::CommandBuffer, GpuError> {
        let mut state = self.state.borrow_mut();
        let cmd = state.mint();
        state.command_buffers.insert(
            cmd,
            CommandState {
                queue,
                recorded: None,
            },
        );
        Ok(cmd)
    }

    fn free_command_buffer(&mut self, cmd: vk::CommandBuffer) {
        let mut state = self.state.borrow_mut();
        if state.command_buffers.remove(&cmd).is_none() {
            state.violation(format!("free of unknown command buffer {cmd:?}"));
        }
    }

    fn reset_command_buffer(&mut self, cmd: vk::CommandBuffer) -> Result<(), GpuError> {
        let mut state = self.state.borrow_mut();
        match state.command_buffers.get_mut(&cmd) {
            Some(command) => {
                command.recorded = None;
                Ok(())
            }
            None => Err(state.violation(format!("reset of unknown command buffer {cmd:?}"))),
        }
    }

    fn record_compute(&mut self, cmd: vk::CommandBuffer, pass: &ComputePass) -> Result<(), GpuError> {
        let mut state = self.state.borrow_mut();
        if !state.descriptor_sets.contains_key(&pass.descriptor_set) {
            return Err(state.violation(format!(
                "compute recording binds unknown descriptor set {:?}",
                pass.descriptor_set
            )));
        }
        record(&mut state, cmd, QueueKind::Compute, RecordedWork::Compute(*pass))
    }

    fn record_graphics(&mut self, cmd: vk::CommandBuffer, pass: &GraphicsPass) -> Result<(), GpuError> {
        let mut state = self.state.borrow_mut();
        state.check_graphics(pass)?;
        record(&mut state, cmd, QueueKind::Graphics, RecordedWork::Graphics(*pass))
    }

    fn submit(&mut self, queue: QueueKind, submission: &Submission<'_>) -> Result<(), GpuError> {
        let mut state = self.state.borrow_mut();

        let work = match state.command_buffers.get(&submission.command_buffer) {
            Some(CommandState {
                recorded: Some(work),
                ..
            }) => *work,
            Some(_) => {
                return Err(state.violation(format!(
                    "submit of empty command buffer {:?}",
                    submission.command_buffer
                )))
            }
            None => {
                return Err(state.violation(format!(
                    "submit of unknown command buffer {:?}",
                    submission.command_buffer
                )))
            }
        };

        match state.fences.get(&submission.fence).copied() {
            Some(false) => {}
            Some(true) => {
                return Err(state.violation(format!(
                    "{queue:?} submission with fence {:?} still signaled",
                    submission.fence
                )))
            }
            None => {
                return Err(state.violation(format!(
                    "{queue:?} submission with unknown fence {:?}",
                    submission.fence
                )))
            }
        }

        let waiter = format!("{queue:?} submission");
        for &(semaphore, _) in submission.wait {
            state.wait_semaphore(semaphore, &waiter)?;
        }

        match &work {
            RecordedWork::Compute(pass) => state.run_compute(pass, &mut self.kernel)?,
            RecordedWork::Graphics(pass) => state.check_graphics(pass)?,
        }

        for &semaphore in submission.signal {
            state.signal_semaphore(semaphore, &waiter)?;
        }
        state.fences.insert(submission.fence, true);

        state.submissions.push(SubmissionRecord {
            queue,
            command_buffer: submission.command_buffer,
            work,
            wait: submission.wait.to_vec(),
            signal: submission.signal.to_vec(),
            fence: submission.fence,
        });
        Ok(())
    }

    fn create_swapchain(&mut self, extent: vk::Extent2D) -> Result<SwapchainImages, GpuError> {
        let mut state = self.state.borrow_mut();
        if !state.swapchains.is_empty() {
            return Err(state.violation("surface already owns a swapchain".into()));
        }
        if extent.width == 0 || extent.height == 0 {
            return Err(state.violation("swapchain created with a zero extent".into()));
        }

        let swapchain = state.mint();
        let images: Vec<vk::Image> = (0..state.image_count).map(|_| state.mint()).collect();
        state.swapchains.insert(
            swapchain,
            SwapchainState {
                images: images.clone(),
                next_image: 0,
            },
        );

        Ok(SwapchainImages {
            swapchain,
            images,
            format: vk::Format::B8G8R8A8_SRGB,
            extent,
        })
    }

    fn create_image_view(&mut self, image: vk::Image, _format: vk::Format) -> Result<vk::ImageView, GpuError> {
        let mut state = self.state.borrow_mut();
        let owned = state
            .swapchains
            .values()
            .any(|swapchain| swapchain.images.contains(&image));
        if !owned {
            return Err(state.violation(format!("view of image {image:?} outside any swapchain")));
        }
        let view = state.mint();
        state.image_views.insert(view, image);
        Ok(view)
    }

    fn create_framebuffer(
        &mut self,
        view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, GpuError> {
        let mut state = self.state.borrow_mut();
        if !state.image_views.contains_key(&view) {
            return Err(state.violation(format!("framebuffer over unknown view {view:?}")));
        }
        let framebuffer = state.mint();
        state.framebuffers.insert(framebuffer, view);
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        let mut state = self.state.borrow_mut();
        if state.framebuffers.remove(&framebuffer).is_none() {
            state.violation(format!("destroy of unknown framebuffer {framebuffer:?}"));
        }
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        let mut state = self.state.borrow_mut();
        if state.framebuffers.values().any(|v| *v == view) {
            state.violation(format!("view {view:?} destroyed while a framebuffer uses it"));
        }
        if state.image_views.remove(&view).is_none() {
            state.violation(format!("destroy of unknown image view {view:?}"));
        }
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.borrow_mut();
        let Some(removed) = state.swapchains.remove(&swapchain) else {
            state.violation(format!("destroy of unknown swapchain {swapchain:?}"));
            return;
        };
        if state.image_views.values().any(|image| removed.images.contains(image)) {
            state.violation(format!("swapchain {swapchain:?} destroyed before its image views"));
        }
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquiredImage, GpuError> {
        let mut state = self.state.borrow_mut();
        if !state.swapchains.contains_key(&swapchain) {
            return Err(state.violation(format!("acquire from unknown swapchain {swapchain:?}")));
        }

        let suboptimal = match state.acquire_script.pop_front() {
            None => false,
            Some(Scripted::Suboptimal) => true,
            Some(Scripted::OutOfDate) => return Err(GpuError::OutOfDate),
            Some(Scripted::Fail(code)) => return Err(GpuError::Vulkan(code)),
        };

        state.signal_semaphore(signal, "image acquisition")?;

        let Some(chain) = state.swapchains.get_mut(&swapchain) else {
            return Err(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR));
        };
        let index = chain.next_image;
        chain.next_image = (chain.next_image + 1) % chain.images.len();

        Ok(AcquiredImage {
            index: index as u32,
            suboptimal,
        })
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, GpuError> {
        let mut state = self.state.borrow_mut();
        let image_count = match state.swapchains.get(&swapchain) {
            Some(chain) => chain.images.len(),
            None => return Err(state.violation(format!("present to unknown swapchain {swapchain:?}"))),
        };
        if image_index as usize >= image_count {
            return Err(state.violation(format!("present of image {image_index} out of range")));
        }

        state.wait_semaphore(wait, "present")?;

        match state.present_script.pop_front() {
            None => {
                state.presented.push(image_index);
                Ok(false)
            }
            Some(Scripted::Suboptimal) => {
                state.presented.push(image_index);
                Ok(true)
            }
            // The raw code, as a real queue_present would report it
            Some(Scripted::OutOfDate) => Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            Some(Scripted::Fail(code)) => Err(GpuError::Vulkan(code)),
        }
    }
}

fn record(
    state: &mut DeviceState,
    cmd: vk::CommandBuffer,
    expected: QueueKind,
    work: RecordedWork,
) -> Result<(), GpuError> {
    match state.command_buffers.get_mut(&cmd) {
        Some(command) if command.queue != expected => {
            let queue = command.queue;
            Err(state.violation(format!(
                "{expected:?} work recorded into a {queue:?} command buffer"
            )))
        }
        Some(command) if command.recorded.is_some() => {
            Err(state.violation(format!("command buffer {cmd:?} recorded without a reset")))
        }
        Some(command) => {
            command.recorded = Some(work);
            Ok(())
        }
        None => Err(state.violation(format!("record into unknown command buffer {cmd:?}"))),
    }
}

/// Read/script access to a [`HeadlessGpu`] that may be owned elsewhere.
#[derive(Clone)]
pub struct HeadlessProbe {
    state: Rc<RefCell<DeviceState>>,
}

impl HeadlessProbe {
    pub fn live(&self) -> LiveObjects {
        self.state.borrow().live()
    }

    /// Every rule broken so far, oldest first.
    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn read_buffer(&self, buffer: vk::Buffer) -> Vec<u8> {
        self.state
            .borrow()
            .buffers
            .get(&buffer)
            .map(|b| b.data.clone())
            .unwrap_or_default()
    }

    pub fn read_particles(&self, buffer: vk::Buffer) -> Vec<Particle> {
        bytemuck::pod_collect_to_vec(&self.read_buffer(buffer))
    }

    pub fn descriptor_bindings(&self, set: vk::DescriptorSet) -> Option<ComputeBindingSet> {
        self.state.borrow().descriptor_sets.get(&set).copied()
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.borrow().submissions.clone()
    }

    pub fn submission_count(&self, queue: QueueKind) -> usize {
        self.state
            .borrow()
            .submissions
            .iter()
            .filter(|s| s.queue == queue)
            .count()
    }

    /// Image indices accepted by present, in order.
    pub fn presented(&self) -> Vec<u32> {
        self.state.borrow().presented.clone()
    }

    pub fn wait_idle_count(&self) -> usize {
        self.state.borrow().wait_idle_count
    }

    /// Images per swapchain.
    pub fn swapchain_image_count(&self) -> usize {
        self.state.borrow().image_count
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> Option<bool> {
        self.state.borrow().fences.get(&fence).copied()
    }

    /// Make the next acquisition return `result`.
    pub fn script_acquire(&self, result: Scripted) {
        self.state.borrow_mut().acquire_script.push_back(result);
    }

    /// Make the next present return `result`.
    pub fn script_present(&self, result: Scripted) {
        self.state.borrow_mut().present_script.push_back(result);
    }
}

/// A drawable area the test can resize between ticks.
pub struct FixedDrawable {
    extent: Cell<vk::Extent2D>,
}

impl FixedDrawable {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: Cell::new(vk::Extent2D { width, height }),
        }
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.extent.set(vk::Extent2D { width, height });
    }
}

impl DrawableSurface for FixedDrawable {
    fn drawable_extent(&self) -> vk::Extent2D {
        self.extent.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_signal_is_a_violation() {
        let mut gpu = HeadlessGpu::new();
        let probe = gpu.probe();
        let drawable = FixedDrawable::new(64, 64);
        let chain = gpu.create_swapchain(drawable.drawable_extent()).unwrap();
        let semaphore = gpu.create_semaphore().unwrap();

        gpu.acquire_next_image(chain.swapchain, semaphore).unwrap();
        assert!(matches!(
            gpu.acquire_next_image(chain.swapchain, semaphore),
            Err(GpuError::Protocol(_))
        ));
        assert_eq!(probe.violations().len(), 1);
    }

    #[test]
    fn waiting_an_unsignaled_fence_times_out() {
        let mut gpu = HeadlessGpu::new();
        let fence = gpu.create_fence(false).unwrap();
        assert!(matches!(
            gpu.wait_for_fence(fence),
            Err(GpuError::Vulkan(vk::Result::TIMEOUT))
        ));
    }

    #[test]
    fn swapchain_destroyed_before_views_is_flagged() {
        let mut gpu = HeadlessGpu::new();
        let probe = gpu.probe();
        let chain = gpu
            .create_swapchain(vk::Extent2D { width: 8, height: 8 })
            .unwrap();
        let view = gpu.create_image_view(chain.images[0], chain.format).unwrap();

        gpu.destroy_swapchain(chain.swapchain);
        assert_eq!(probe.violations().len(), 1);
        gpu.destroy_image_view(view);
    }

    #[test]
    fn host_writes_to_device_local_memory_fail() {
        let mut gpu = HeadlessGpu::new();
        let buffer = gpu
            .create_buffer("state", 32, vk::BufferUsageFlags::STORAGE_BUFFER, MemoryLocation::GpuOnly)
            .unwrap();
        assert!(gpu.write_buffer(buffer, &[0; 32]).is_err());
        gpu.destroy_buffer(buffer);
    }

    #[test]
    fn scripted_results_are_consumed_in_order() {
        let mut gpu = HeadlessGpu::new().with_image_count(2);
        let probe = gpu.probe();
        let chain = gpu
            .create_swapchain(vk::Extent2D { width: 8, height: 8 })
            .unwrap();
        let semaphore = gpu.create_semaphore().unwrap();

        probe.script_acquire(Scripted::OutOfDate);
        probe.script_acquire(Scripted::Suboptimal);
        assert!(gpu
            .acquire_next_image(chain.swapchain, semaphore)
            .unwrap_err()
            .is_out_of_date());
        let acquired = gpu.acquire_next_image(chain.swapchain, semaphore).unwrap();
        assert_eq!(acquired, AcquiredImage { index: 0, suboptimal: true });

        assert_eq!(gpu.present(chain.swapchain, 0, semaphore).unwrap(), false);
        assert_eq!(probe.presented(), vec![0]);
        assert!(probe.violations().is_empty());
    }
}
