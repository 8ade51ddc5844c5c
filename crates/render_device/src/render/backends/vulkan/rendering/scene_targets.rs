//! Offscreen scene targets and render passes
//!
//! The scene renders into three attachments sharing one framebuffer:
//!
//! ```text
//! 0  color  R8G8B8A8_UNORM   blended scene output
//! 1  hit    R32_UINT         hit-test index of the last writer
//! 2  depth  D32_SFLOAT
//! ```
//!
//! Two render passes are compatible with the framebuffer: the clear pass
//! starts a frame, the load pass is used for every draw submission.

use ash::{vk, Device};

use crate::render::api::HitRegion;
use crate::render::backends::vulkan::resources::texture::allocate_image_memory;
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Scene color format
pub const COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
/// Hit target format
pub const HIT_FORMAT: vk::Format = vk::Format::R32_UINT;
/// Depth format
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// One attachment image with its memory and view
struct AttachmentImage {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

impl AttachmentImage {
    fn new(
        context: &VulkanContext,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        let device = context.raw_device().clone();

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
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
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => Ok(Self {
                device,
                image,
                memory,
                view,
            }),
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                Err(VulkanError::Api(e))
            }
        }
    }
}

impl Drop for AttachmentImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Render pass wrapper with RAII cleanup
pub struct RenderPass {
    device: Device,
    render_pass: vk::RenderPass,
}

impl RenderPass {
    /// Scene pass that either clears or loads every attachment
    pub fn scene(device: &Device, clear: bool) -> VulkanResult<Self> {
        let (load_op, initial_color, initial_depth) = if clear {
            (vk::AttachmentLoadOp::CLEAR, vk::ImageLayout::UNDEFINED, vk::ImageLayout::UNDEFINED)
        } else {
            (
                vk::AttachmentLoadOp::LOAD,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )
        };

        let color_attachment = |format: vk::Format| {
            vk::AttachmentDescription::builder()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(initial_color)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .build()
        };
        let attachments = [
            color_attachment(COLOR_FORMAT),
            color_attachment(HIT_FORMAT),
            vk::AttachmentDescription::builder()
                .format(DEPTH_FORMAT)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(initial_depth)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        ];

        let color_refs = [
            vk::AttachmentReference {
                attachment: 0,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
            vk::AttachmentReference {
                attachment: 1,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
        ];
        let depth_ref = vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        // Orders each submission after the previous one's attachment writes and hit readbacks
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::TRANSFER,
            )
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            )
            .src_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                    | vk::AccessFlags::TRANSFER_READ,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build()];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.create_render_pass(&render_pass_info, None) }.map_err(VulkanError::Api)?;
        Ok(Self {
            device: device.clone(),
            render_pass,
        })
    }

    /// Get the render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Color, hit and depth targets with their framebuffer
pub struct SceneTargets {
    device: Device,
    framebuffer: vk::Framebuffer,
    hit: AttachmentImage,
    color: AttachmentImage,
    _depth: AttachmentImage,
    width: u32,
    height: u32,
}

impl SceneTargets {
    /// Create targets of the given size, compatible with `render_pass`
    pub fn new(context: &VulkanContext, render_pass: &RenderPass, width: u32, height: u32) -> VulkanResult<Self> {
        let attachment_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC;
        let color = AttachmentImage::new(
            context,
            width,
            height,
            COLOR_FORMAT,
            attachment_usage,
            vk::ImageAspectFlags::COLOR,
        )?;
        let hit = AttachmentImage::new(
            context,
            width,
            height,
            HIT_FORMAT,
            attachment_usage,
            vk::ImageAspectFlags::COLOR,
        )?;
        let depth = AttachmentImage::new(
            context,
            width,
            height,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;

        let device = context.raw_device().clone();
        let attachments = [color.view, hit.view, depth.view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(&attachments)
            .width(width)
            .height(height)
            .layers(1);
        let framebuffer = unsafe { device.create_framebuffer(&framebuffer_info, None) }.map_err(VulkanError::Api)?;

        log::info!("[TARGETS] Created {width}x{height} scene targets");
        Ok(Self {
            device,
            framebuffer,
            hit,
            color,
            _depth: depth,
            width,
            height,
        })
    }

    /// Get the framebuffer handle
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Full target area
    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: self.width,
                height: self.height,
            },
        }
    }

    /// Clip `region` to the target; `None` when nothing remains
    pub fn clip(&self, region: HitRegion) -> Option<HitRegion> {
        clip_region(region, self.width, self.height)
    }

    /// Record a copy of `region` of the hit target into `buffer`
    pub fn record_hit_copy(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, region: HitRegion) {
        self.record_copy(command_buffer, self.hit.image, buffer, region);
    }

    /// Record a copy of `region` of the RGBA8 color target into `buffer`
    pub fn record_color_copy(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, region: HitRegion) {
        self.record_copy(command_buffer, self.color.image, buffer, region);
    }

    /// The image returns to `COLOR_ATTACHMENT_OPTIMAL` afterwards.
    fn record_copy(&self, command_buffer: vk::CommandBuffer, image: vk::Image, buffer: vk::Buffer, region: HitRegion) {
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let to_transfer = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .build();
        let to_attachment = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .src_access_mask(vk::AccessFlags::TRANSFER_READ)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let copy = vk::BufferImageCopy::builder()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D {
                x: region.x as i32,
                y: region.y as i32,
                z: 0,
            })
            .image_extent(vk::Extent3D {
                width: region.width,
                height: region.height,
                depth: 1,
            })
            .build();

        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            self.device.cmd_copy_image_to_buffer(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer,
                &[copy],
            );
            self.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_attachment],
            );
        }
    }
}

/// Clip `region` to a `width` x `height` target
pub fn clip_region(region: HitRegion, width: u32, height: u32) -> Option<HitRegion> {
    let right = region.x.saturating_add(region.width).min(width);
    let bottom = region.y.saturating_add(region.height).min(height);
    (region.x < right && region.y < bottom).then(|| HitRegion {
        x: region.x,
        y: region.y,
        width: right - region.x,
        height: bottom - region.y,
    })
}

impl Drop for SceneTargets {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}
