//! Sampled scene textures
//!
//! RGBA8 images with a full mip chain, uploaded through a staging buffer and
//! left in `SHADER_READ_ONLY_OPTIMAL` between uploads.

use ash::{vk, Device};

use crate::render::api::TextureRect;
use crate::render::backends::vulkan::resources::buffer::Buffer;
use crate::render::backends::vulkan::state::sync::CommandContext;
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};
use crate::render::resources::TextureUpload;

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Layout transition for every mip of a color image
pub(crate) struct ImageTransition {
    /// Layout before the barrier
    pub old_layout: vk::ImageLayout,
    /// Layout after the barrier
    pub new_layout: vk::ImageLayout,
    /// Accesses that must complete first
    pub src_access: vk::AccessFlags,
    /// Accesses that wait
    pub dst_access: vk::AccessFlags,
    /// Stages that must complete first
    pub src_stage: vk::PipelineStageFlags,
    /// Stages that wait
    pub dst_stage: vk::PipelineStageFlags,
}

impl ImageTransition {
    fn to_transfer_dst(old_layout: vk::ImageLayout) -> Self {
        Self {
            old_layout,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_access: if old_layout == vk::ImageLayout::UNDEFINED {
                vk::AccessFlags::empty()
            } else {
                vk::AccessFlags::SHADER_READ
            },
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: if old_layout == vk::ImageLayout::UNDEFINED {
                vk::PipelineStageFlags::TOP_OF_PIPE
            } else {
                vk::PipelineStageFlags::FRAGMENT_SHADER
            },
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }
    }

    fn to_shader_read() -> Self {
        Self {
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }
    }

    /// Record the barrier
    pub fn record(&self, device: &Device, command_buffer: vk::CommandBuffer, image: vk::Image, mip_levels: u32) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access);

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                self.src_stage,
                self.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier.build()],
            );
        }
    }
}

/// Image, memory and view of one cached texture
pub struct VulkanTexture {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    width: u32,
    height: u32,
    mip_levels: u32,
}

impl VulkanTexture {
    /// Create the image and upload every mip
    pub fn new(context: &VulkanContext, commands: &mut CommandContext, upload: &TextureUpload) -> VulkanResult<Self> {
        let mip_levels = upload.mips.len() as u32;
        if mip_levels == 0 || upload.width == 0 || upload.height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "texture upload without texels".to_string(),
            });
        }

        let texture = Self::allocate(context, upload.width, upload.height, mip_levels)?;
        texture.upload_mips(context, commands, upload, vk::ImageLayout::UNDEFINED)?;
        Ok(texture)
    }

    fn allocate(context: &VulkanContext, width: u32, height: u32, mip_levels: u32) -> VulkanResult<Self> {
        let device = context.raw_device().clone();

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .format(TEXTURE_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let image = unsafe { device.create_image(&image_info, None) }.map_err(VulkanError::Api)?;

        let memory = match allocate_image_memory(context, image, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            device,
            image,
            memory,
            view,
            width,
            height,
            mip_levels,
        })
    }

    /// Upload can go into this image without reallocating
    pub fn matches(&self, upload: &TextureUpload) -> bool {
        self.width == upload.width && self.height == upload.height && self.mip_levels == upload.mips.len() as u32
    }

    /// Re-upload every mip of an image created from a matching upload
    pub fn reupload(
        &self,
        context: &VulkanContext,
        commands: &mut CommandContext,
        upload: &TextureUpload,
    ) -> VulkanResult<()> {
        if !self.matches(upload) {
            return Err(VulkanError::InvalidOperation {
                reason: "re-upload changes texture dimensions".to_string(),
            });
        }
        self.upload_mips(context, commands, upload, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }

    fn upload_mips(
        &self,
        context: &VulkanContext,
        commands: &mut CommandContext,
        upload: &TextureUpload,
        old_layout: vk::ImageLayout,
    ) -> VulkanResult<()> {
        let data: Vec<u8> = upload.mips.iter().flat_map(|mip| mip.data.iter().copied()).collect();
        let staging = Buffer::staging(context, &data)?;

        let mut offset = 0;
        let regions: Vec<vk::BufferImageCopy> = upload
            .mips
            .iter()
            .enumerate()
            .map(|(level, mip)| {
                let region = vk::BufferImageCopy::builder()
                    .buffer_offset(offset)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: level as u32,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D {
                        width: mip.width.max(1),
                        height: mip.height.max(1),
                        depth: 1,
                    })
                    .build();
                offset += mip.data.len() as vk::DeviceSize;
                region
            })
            .collect();

        let device = &self.device;
        commands.submit_and_wait(|cb| {
            ImageTransition::to_transfer_dst(old_layout).record(device, cb, self.image, self.mip_levels);
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cb,
                    staging.handle(),
                    self.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &regions,
                );
            }
            ImageTransition::to_shader_read().record(device, cb, self.image, self.mip_levels);
        })
    }

    /// Upload a rectangle of the top mip; `upload` holds only its texels
    pub fn update_rect(
        &self,
        context: &VulkanContext,
        commands: &mut CommandContext,
        upload: &TextureUpload,
        rect: TextureRect,
    ) -> VulkanResult<()> {
        let Some(top) = upload.mips.first() else {
            return Err(VulkanError::InvalidOperation {
                reason: "rectangle upload without texels".to_string(),
            });
        };
        if !rect.fits_within(self.width, self.height) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("rectangle {rect:?} outside {}x{} texture", self.width, self.height),
            });
        }

        let staging = Buffer::staging(context, &top.data)?;
        let region = vk::BufferImageCopy::builder()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D {
                x: rect.x as i32,
                y: rect.y as i32,
                z: 0,
            })
            .image_extent(vk::Extent3D {
                width: rect.width,
                height: rect.height,
                depth: 1,
            })
            .build();

        let device = &self.device;
        commands.submit_and_wait(|cb| {
            let layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            ImageTransition::to_transfer_dst(layout).record(device, cb, self.image, self.mip_levels);
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cb,
                    staging.handle(),
                    self.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            ImageTransition::to_shader_read().record(device, cb, self.image, self.mip_levels);
        })
    }

    /// Get the image view for descriptor set binding
    pub fn image_view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Allocate and bind memory for an image
pub(crate) fn allocate_image_memory(
    context: &VulkanContext,
    image: vk::Image,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<vk::DeviceMemory> {
    let device = context.raw_device();
    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory_type = context.find_memory_type(requirements.memory_type_bits, properties)?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);
    let memory = unsafe { device.allocate_memory(&alloc_info, None) }.map_err(VulkanError::Api)?;

    if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
        unsafe { device.free_memory(memory, None) };
        return Err(VulkanError::Api(e));
    }
    Ok(memory)
}
