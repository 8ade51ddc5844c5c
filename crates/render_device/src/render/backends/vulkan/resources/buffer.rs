//! Host-visible GPU buffers
//!
//! The scene vertex and index buffers, staging buffers for texture uploads
//! and the hit readback buffer all live in host-visible, coherent memory and
//! stay mapped for their whole lifetime.

use ash::{vk, Device};
use bytemuck::Pod;

use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Persistently mapped buffer with automatic memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    mapped: *mut u8,
}

impl Buffer {
    /// Create a host-visible buffer of `size` bytes
    pub fn new(context: &VulkanContext, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        let device = context.raw_device().clone();
        let size = size.max(4);

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_info, None) }.map_err(VulkanError::Api)?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type = match context.find_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let mapped = unsafe {
            device
                .bind_buffer_memory(buffer, memory, 0)
                .and_then(|()| device.map_memory(memory, 0, size, vk::MemoryMapFlags::empty()))
        };
        match mapped {
            Ok(ptr) => Ok(Self {
                device,
                buffer,
                memory,
                size,
                mapped: ptr.cast(),
            }),
            Err(e) => {
                unsafe {
                    device.destroy_buffer(buffer, None);
                    device.free_memory(memory, None);
                }
                Err(VulkanError::Api(e))
            }
        }
    }

    /// Staging buffer holding `data`
    pub fn staging(context: &VulkanContext, data: &[u8]) -> VulkanResult<Self> {
        let buffer = Self::new(context, data.len() as vk::DeviceSize, vk::BufferUsageFlags::TRANSFER_SRC)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Copy `data` into the buffer at byte `offset`
    pub fn write<T: Pod>(&self, offset: vk::DeviceSize, data: &[T]) -> VulkanResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let end = offset + bytes.len() as vk::DeviceSize;
        if end > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes at {offset} overflows buffer of {}", bytes.len(), self.size),
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.add(offset as usize), bytes.len());
        }
        Ok(())
    }

    /// Copy `count` values of `T` out of the start of the buffer
    pub fn read<T: Pod>(&self, count: usize) -> VulkanResult<Vec<T>> {
        let len = count * std::mem::size_of::<T>();
        if len as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("read of {len} bytes overflows buffer of {}", self.size),
            });
        }
        let bytes = unsafe { std::slice::from_raw_parts(self.mapped, len) };
        Ok(bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Get the buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.unmap_memory(self.memory);
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}
