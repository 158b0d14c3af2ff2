// GPU buffers backed by the device allocator
//
// Memory comes from gpu-allocator sub-allocations instead of one
// vkAllocateMemory per buffer.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

pub struct GpuBuffer {
    pub raw: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        // From here on Drop cleans up whatever exists
        let mut buffer = Self {
            raw,
            size,
            allocation: None,
            device,
        };

        let requirements = unsafe { buffer.device.device.get_buffer_memory_requirements(raw) };

        let allocation = buffer
            .device
            .allocator()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| {
                format!(
                    "Out of GPU memory for '{}' ({:.2} MB)",
                    name,
                    requirements.size as f64 / (1024.0 * 1024.0)
                )
            })?;

        let bind = unsafe {
            buffer
                .device
                .device
                .bind_buffer_memory(raw, allocation.memory(), allocation.offset())
        };
        buffer.allocation = Some(allocation);
        bind.with_context(|| format!("Failed to bind memory for '{}'", name))?;

        log::debug!("Allocated buffer '{}' ({} bytes)", name, size);
        Ok(buffer)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.raw, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::warn!("Failed to free buffer memory: {}", e);
            }
        }
    }
}
