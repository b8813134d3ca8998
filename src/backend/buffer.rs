// Buffer utilities for particle state, staging and uniform buffers
//
// Memory comes from gpu-allocator; host-visible buffers stay persistently mapped.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};

use super::{MemoryLocation, VulkanDevice};
use crate::error::GpuError;

/// A buffer and the allocation backing it.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Allocation,
}

impl From<MemoryLocation> for gpu_allocator::MemoryLocation {
    fn from(location: MemoryLocation) -> Self {
        match location {
            MemoryLocation::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
            MemoryLocation::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
        }
    }
}

/// Create a buffer and bind freshly allocated memory to it.
pub fn create_buffer(
    device: &VulkanDevice,
    name: &str,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
) -> Result<GpuBuffer, GpuError> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.device.create_buffer(&buffer_info, None)? };
    let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

    let allocation = device.allocator().allocate(&AllocationCreateDesc {
        name,
        requirements,
        location: location.into(),
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    });

    let allocation = match allocation {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }
    };

    if let Err(e) =
        unsafe { device.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
    {
        unsafe { device.device.destroy_buffer(buffer, None) };
        if let Err(free) = device.allocator().free(allocation) {
            log::error!("Failed to free allocation for '{name}': {free}");
        }
        return Err(e.into());
    }

    log::debug!("Created buffer '{}' ({} bytes, {:?})", name, size, location);

    Ok(GpuBuffer {
        buffer,
        size,
        allocation,
    })
}

impl GpuBuffer {
    /// Copy `bytes` into the start of a host-visible buffer.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), GpuError> {
        let mapped = self.allocation.mapped_slice_mut().ok_or_else(|| {
            GpuError::Protocol("host write to a buffer that is not host visible".into())
        })?;
        if bytes.len() > mapped.len() {
            return Err(GpuError::Protocol(format!(
                "write of {} bytes overflows a {} byte buffer",
                bytes.len(),
                mapped.len()
            )));
        }
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn destroy(self, device: &VulkanDevice) {
        unsafe { device.device.destroy_buffer(self.buffer, None) };
        if let Err(e) = device.allocator().free(self.allocation) {
            log::error!("Failed to free buffer allocation: {e}");
        }
    }
}

/// Record, submit and wait for a one-shot buffer-to-buffer copy.
pub fn copy_buffer(
    device: &VulkanDevice,
    command_pool: vk::CommandPool,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<(), GpuError> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let cmd = unsafe { device.device.allocate_command_buffers(&alloc_info)? }[0];

    let result = unsafe {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();

        device
            .device
            .begin_command_buffer(cmd, &begin_info)
            .and_then(|()| {
                device.device.cmd_copy_buffer(cmd, src, dst, &[region]);
                device.device.end_command_buffer(cmd)
            })
            .and_then(|()| device.device.queue_submit(device.queue, &[submit], vk::Fence::null()))
            .and_then(|()| device.device.queue_wait_idle(device.queue))
    };

    unsafe { device.device.free_command_buffers(command_pool, &[cmd]) };
    result.map_err(GpuError::from)
}
