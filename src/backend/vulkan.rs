// Vulkan backend - `Gpu` on top of a real device
//
// Owns everything that is not per frame slot: render pass, both pipelines,
// the descriptor pool and the command pool. Compute and graphics work share
// one queue, so `QueueKind` only selects what the command buffer records.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::HashMap;
use std::path::PathBuf;

use super::buffer::{self, GpuBuffer};
use super::{
    pipeline, shader, swapchain, AcquiredImage, ComputeBindingSet, ComputePass, Gpu, GraphicsPass,
    MemoryLocation, QueueKind, Submission, SwapchainImages, VulkanDevice,
};
use crate::config::Config;
use crate::error::GpuError;

/// SPIR-V binaries for the compute, vertex and fragment stages.
#[derive(Clone, Debug)]
pub struct ShaderPaths {
    pub compute: PathBuf,
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

pub struct VulkanGpu {
    swapchain_loader: khr::Swapchain,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,

    render_pass: vk::RenderPass,
    graphics_pipeline: vk::Pipeline,
    graphics_layout: vk::PipelineLayout,
    compute_pipeline: vk::Pipeline,
    compute_layout: vk::PipelineLayout,
    compute_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    command_pool: vk::CommandPool,

    buffers: HashMap<vk::Buffer, GpuBuffer>,

    // Dropped last
    device: VulkanDevice,
}

impl VulkanGpu {
    /// Bring up the device for `window` and build every pipeline object.
    pub fn new<W>(window: &W, config: &Config) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Device, surface and queue
        // ─────────────────────────────────────────────────────────────────────
        let device = VulkanDevice::new(window, &config.window.title, config.debug.validation_layers)?;
        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);

        let formats = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_formats(device.physical_device, device.surface)
        }?;
        let surface_format =
            swapchain::choose_surface_format(&formats).context("Surface reports no formats")?;
        log::info!("Surface format: {:?}", surface_format.format);

        // Handles start null so Drop can run on a half-built value; destroying null is a no-op
        let mut gpu = Self {
            swapchain_loader,
            surface_format,
            present_mode: config.present_mode(),
            render_pass: vk::RenderPass::null(),
            graphics_pipeline: vk::Pipeline::null(),
            graphics_layout: vk::PipelineLayout::null(),
            compute_pipeline: vk::Pipeline::null(),
            compute_layout: vk::PipelineLayout::null(),
            compute_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            command_pool: vk::CommandPool::null(),
            buffers: HashMap::new(),
            device,
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Render pass and pipelines
        // ─────────────────────────────────────────────────────────────────────
        gpu.render_pass = pipeline::create_render_pass(&gpu.device, surface_format.format)
            .context("Failed to create render pass")?;
        gpu.compute_set_layout = pipeline::create_compute_descriptor_set_layout(&gpu.device)
            .context("Failed to create compute descriptor set layout")?;
        gpu.descriptor_pool = pipeline::create_descriptor_pool(&gpu.device)
            .context("Failed to create descriptor pool")?;

        let shaders = config.shader_paths();
        let mut modules = Vec::with_capacity(3);
        let built = gpu.build_pipelines(&shaders, &mut modules);
        for module in modules {
            unsafe { gpu.device.device.destroy_shader_module(module, None) };
        }
        built?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Command pool (per-buffer reset for re-recording every tick)
        // ─────────────────────────────────────────────────────────────────────
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(gpu.device.queue_family);
        gpu.command_pool = unsafe { gpu.device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        log::info!("Vulkan initialized successfully!");
        Ok(gpu)
    }

    fn build_pipelines(
        &mut self,
        shaders: &ShaderPaths,
        modules: &mut Vec<vk::ShaderModule>,
    ) -> Result<(), GpuError> {
        let compute = shader::load_shader_module(&self.device, &shaders.compute)?;
        modules.push(compute);
        let vertex = shader::load_shader_module(&self.device, &shaders.vertex)?;
        modules.push(vertex);
        let fragment = shader::load_shader_module(&self.device, &shaders.fragment)?;
        modules.push(fragment);

        (self.compute_pipeline, self.compute_layout) =
            pipeline::create_compute_pipeline(&self.device, self.compute_set_layout, compute)?;
        (self.graphics_pipeline, self.graphics_layout) =
            pipeline::create_graphics_pipeline(&self.device, self.render_pass, vertex, fragment)?;
        Ok(())
    }

    pub fn device(&self) -> &VulkanDevice {
        &self.device
    }

    fn buffer_mut(&mut self, buffer: vk::Buffer) -> Result<&mut GpuBuffer, GpuError> {
        self.buffers
            .get_mut(&buffer)
            .ok_or_else(|| GpuError::Protocol(format!("unknown buffer {buffer:?}")))
    }

    fn begin(&self, cmd: vk::CommandBuffer) -> Result<(), GpuError> {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { self.device.device.begin_command_buffer(cmd, &begin_info)? };
        Ok(())
    }
}

impl Gpu for VulkanGpu {
    fn create_buffer(
        &mut self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<vk::Buffer, GpuError> {
        let created = buffer::create_buffer(&self.device, name, size, usage, location)?;
        let handle = created.buffer;
        self.buffers.insert(handle, created);
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: vk::Buffer, bytes: &[u8]) -> Result<(), GpuError> {
        self.buffer_mut(buffer)?.write(bytes)
    }

    fn copy_buffer(
        &mut self,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<(), GpuError> {
        buffer::copy_buffer(&self.device, self.command_pool, src, dst, size)
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        match self.buffers.remove(&buffer) {
            Some(owned) => owned.destroy(&self.device),
            None => log::warn!("Destroy of unknown buffer {buffer:?}"),
        }
    }

    fn create_compute_descriptor_set(
        &mut self,
        bindings: &ComputeBindingSet,
    ) -> Result<vk::DescriptorSet, GpuError> {
        let set_layouts = [self.compute_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts);
        let set = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info)? }[0];

        let params = [vk::DescriptorBufferInfo {
            buffer: bindings.params,
            offset: 0,
            range: bindings.params_range,
        }];
        let previous = [vk::DescriptorBufferInfo {
            buffer: bindings.previous_state,
            offset: 0,
            range: bindings.state_range,
        }];
        let current = [vk::DescriptorBufferInfo {
            buffer: bindings.current_state,
            offset: 0,
            range: bindings.state_range,
        }];

        let write = |binding: u32, ty: vk::DescriptorType, info: &[vk::DescriptorBufferInfo]| {
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(binding)
                .dst_array_element(0)
                .descriptor_type(ty)
                .buffer_info(info)
                .build()
        };
        let writes = [
            write(0, vk::DescriptorType::UNIFORM_BUFFER, &params),
            write(1, vk::DescriptorType::STORAGE_BUFFER, &previous),
            write(2, vk::DescriptorType::STORAGE_BUFFER, &current),
        ];

        unsafe { self.device.device.update_descriptor_sets(&writes, &[]) };
        Ok(set)
    }

    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence, GpuError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::builder().flags(flags);
        Ok(unsafe { self.device.device.create_fence(&fence_info, None)? })
    }

    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<(), GpuError> {
        unsafe { self.device.device.wait_for_fences(&[fence], true, u64::MAX)? };
        Ok(())
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), GpuError> {
        unsafe { self.device.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.device.device.destroy_fence(fence, None) };
    }

    fn create_semaphore(&mut self) -> Result<vk::Semaphore, GpuError> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        Ok(unsafe { self.device.device.create_semaphore(&semaphore_info, None)? })
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.device.device.destroy_semaphore(semaphore, None) };
    }

    fn wait_idle(&mut self) -> Result<(), GpuError> {
        self.device.wait_idle()?;
        Ok(())
    }

    fn allocate_command_buffer(&mut self, _queue: QueueKind) -> Result<vk::CommandBuffer, GpuError> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        Ok(unsafe { self.device.device.allocate_command_buffers(&alloc_info)? }[0])
    }

    fn free_command_buffer(&mut self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .device
                .free_command_buffers(self.command_pool, &[cmd])
        };
    }

    fn reset_command_buffer(&mut self, cmd: vk::CommandBuffer) -> Result<(), GpuError> {
        unsafe {
            self.device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    fn record_compute(&mut self, cmd: vk::CommandBuffer, pass: &ComputePass) -> Result<(), GpuError> {
        let device = &self.device.device;
        self.begin(cmd)?;

        unsafe {
            // Same-queue submissions are not ordered for memory: make the previous
            // dispatch's writes visible and keep the last draw's vertex reads ahead
            let barrier = vk::MemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE)
                .build();
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::VERTEX_INPUT,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.compute_pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.compute_layout,
                0,
                &[pass.descriptor_set],
                &[],
            );
            device.cmd_dispatch(cmd, pass.group_count_x, 1, 1);
            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn record_graphics(&mut self, cmd: vk::CommandBuffer, pass: &GraphicsPass) -> Result<(), GpuError> {
        let device = &self.device.device;
        self.begin(cmd)?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: pass.clear_color,
            },
        }];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: pass.extent,
        };
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(pass.framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: pass.extent.width as f32,
            height: pass.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.graphics_pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
            device.cmd_bind_vertex_buffers(cmd, 0, &[pass.vertex_buffer], &[0]);
            device.cmd_draw(cmd, pass.vertex_count, 1, 0, 0);
            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn submit(&mut self, queue: QueueKind, submission: &Submission<'_>) -> Result<(), GpuError> {
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = submission.wait.iter().copied().unzip();
        let command_buffers = [submission.command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(submission.signal)
            .build();

        unsafe {
            self.device
                .device
                .queue_submit(self.device.queue, &[submit_info], submission.fence)
        }
        .map_err(|e| {
            log::error!("{queue:?} submission failed: {e}");
            GpuError::from(e)
        })
    }

    fn create_swapchain(&mut self, extent: vk::Extent2D) -> Result<SwapchainImages, GpuError> {
        swapchain::create_swapchain(
            &self.device,
            &self.swapchain_loader,
            self.surface_format,
            self.present_mode,
            extent,
        )
    }

    fn create_image_view(&mut self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView, GpuError> {
        swapchain::create_image_view(&self.device, image, format)
    }

    fn create_framebuffer(
        &mut self,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, GpuError> {
        pipeline::create_framebuffer(&self.device, self.render_pass, view, extent)
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.device.destroy_framebuffer(framebuffer, None) };
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        unsafe { self.device.device.destroy_image_view(view, None) };
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquiredImage, GpuError> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquiredImage { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, GpuError> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.device.queue, &present_info)
        };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for VulkanGpu {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan pipelines...");

        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait idle failed: {e}");
        }

        if !self.buffers.is_empty() {
            log::warn!("{} buffers still alive at shutdown", self.buffers.len());
        }
        for (_, owned) in self.buffers.drain() {
            owned.destroy(&self.device);
        }

        let device = &self.device.device;
        unsafe {
            // Frees every command buffer and descriptor set allocated from them
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);

            device.destroy_pipeline(self.graphics_pipeline, None);
            device.destroy_pipeline_layout(self.graphics_layout, None);
            device.destroy_pipeline(self.compute_pipeline, None);
            device.destroy_pipeline_layout(self.compute_layout, None);
            device.destroy_descriptor_set_layout(self.compute_set_layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}
