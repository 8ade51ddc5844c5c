//! Fences and command submission
//!
//! Scene draws are submitted without waiting; each submission keeps its
//! command buffer and fence until [`CommandContext::wait_all`] retires it.
//! Uploads and readbacks go through [`CommandContext::submit_and_wait`].

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { device.create_fence(&create_info, None) }.map_err(VulkanError::Api)?;
        Ok(Self { device, fence })
    }

    /// Wait for fence
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe { self.device.wait_for_fences(&[self.fence], true, timeout) }.map_err(VulkanError::Api)
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

struct InFlight {
    command_buffer: vk::CommandBuffer,
    fence: Fence,
}

/// Command pool plus the submissions the GPU may still be executing
pub struct CommandContext {
    device: Device,
    queue: vk::Queue,
    pool: vk::CommandPool,
    in_flight: Vec<InFlight>,
}

impl CommandContext {
    /// Create a resettable command pool on `queue_family`
    pub fn new(device: Device, queue: vk::Queue, queue_family: u32) -> VulkanResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self {
            device,
            queue,
            pool,
            in_flight: Vec::new(),
        })
    }

    /// Submissions not yet retired
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    fn record(&self, record: impl FnOnce(vk::CommandBuffer)) -> VulkanResult<vk::CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.pool)
            .command_buffer_count(1);
        let command_buffer = unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .map_err(VulkanError::Api)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "no command buffer allocated".to_string(),
            })?;

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let recorded = unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }
            .map_err(VulkanError::Api)
            .and_then(|()| {
                record(command_buffer);
                unsafe { self.device.end_command_buffer(command_buffer) }.map_err(VulkanError::Api)
            });

        match recorded {
            Ok(()) => Ok(command_buffer),
            Err(e) => {
                unsafe { self.device.free_command_buffers(self.pool, &[command_buffer]) };
                Err(e)
            }
        }
    }

    /// Record and submit without waiting
    pub fn submit(&mut self, record: impl FnOnce(vk::CommandBuffer)) -> VulkanResult<()> {
        let command_buffer = self.record(record)?;
        let fence = match Fence::new(self.device.clone(), false) {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { self.device.free_command_buffers(self.pool, &[command_buffer]) };
                return Err(e);
            }
        };

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        if let Err(e) = unsafe { self.device.queue_submit(self.queue, &[submit_info.build()], fence.handle()) } {
            unsafe { self.device.free_command_buffers(self.pool, &command_buffers) };
            return Err(VulkanError::Api(e));
        }

        self.in_flight.push(InFlight {
            command_buffer,
            fence,
        });
        Ok(())
    }

    /// Record, submit and block until the GPU has executed everything
    pub fn submit_and_wait(&mut self, record: impl FnOnce(vk::CommandBuffer)) -> VulkanResult<()> {
        self.submit(record)?;
        self.wait_all()
    }

    /// Wait for every submission and free its command buffer
    pub fn wait_all(&mut self) -> VulkanResult<()> {
        let mut result = Ok(());
        for submission in self.in_flight.drain(..) {
            if let Err(e) = submission.fence.wait(u64::MAX) {
                log::error!("[SYNC] Fence wait failed: {e}");
                result = Err(e);
            }
            unsafe {
                self.device.free_command_buffers(self.pool, &[submission.command_buffer]);
            }
        }
        result
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        if let Err(e) = self.wait_all() {
            log::warn!("[SYNC] Dropping command context with failed submissions: {e}");
        }
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}
