//! Vulkan implementation of [`GraphicsBackend`]
//!
//! Every `draw` call becomes one submission that loads the scene targets,
//! binds the shared vertex and index buffers and replays the batch list.
//! Submissions are not waited on individually; the backend blocks only when
//! the device finishes a buffer generation, ends a frame, reads back the hit
//! target or destroys something the GPU may still reference.

use std::collections::HashMap;
use std::mem::size_of;

use ash::vk;

use crate::config::VulkanBackendConfig;
use crate::render::api::{
    BackendCapabilities, BackendResult, DescriptorPoolHandle, DescriptorSetHandle, DrawCommand,
    GraphicsBackend, HitRegion, PipelineHandle, SamplerHandle, ScenePushConstants, TextureBinding,
    TextureHandle, TextureRect, Viewport,
};
use crate::render::backends::vulkan::resources::descriptor_set::{write_bindless_element, write_per_draw_set};
use crate::render::backends::vulkan::{
    Buffer, CommandContext, DescriptorPool, DescriptorSetLayout, GraphicsPipeline, PipelineLayout,
    RenderPass, SampledImage, SceneShaders, SceneTargets, VulkanContext, VulkanSampler, VulkanTexture,
};
use crate::render::pipeline::PipelineDesc;
use crate::render::resources::sampler::SamplerDesc;
use crate::render::resources::scene_buffers::{best_sample_count, SceneVertex};
use crate::render::resources::texture_cache::TextureUpload;
use crate::render::RenderError;

/// Scene targets are single-sampled
const MAX_SAMPLES: u32 = 1;

struct SceneBuffers {
    vertices: Buffer,
    indices: Buffer,
}

struct BindlessArray {
    id: u64,
    capacity: u32,
    set: vk::DescriptorSet,
    slots: HashMap<u32, TextureBinding>,
    pipeline_layout: PipelineLayout,
    _pool: DescriptorPool,
    _layout: DescriptorSetLayout,
}

struct PerDrawSet {
    pool: u64,
    set: vk::DescriptorSet,
    bindings: [TextureBinding; 4],
}

/// Offscreen Vulkan backend
///
/// Field order is drop order: everything created from the device is
/// declared before `context`.
pub struct VulkanBackend {
    commands: CommandContext,
    pipelines: HashMap<u64, GraphicsPipeline>,
    sets: HashMap<u64, PerDrawSet>,
    pools: HashMap<u64, DescriptorPool>,
    bindless: Option<BindlessArray>,
    textures: HashMap<u64, VulkanTexture>,
    samplers: HashMap<u64, VulkanSampler>,
    scene_buffers: Option<SceneBuffers>,
    readback: Option<Buffer>,
    targets: Option<SceneTargets>,
    clear_pass: RenderPass,
    load_pass: RenderPass,
    per_draw_pipeline_layout: PipelineLayout,
    per_draw_set_layout: DescriptorSetLayout,
    shaders: SceneShaders,
    capabilities: BackendCapabilities,
    viewport: Viewport,
    next_id: u64,
    context: VulkanContext,
}

impl VulkanBackend {
    /// Create the device, load the scene shaders and build the render passes
    pub fn new(config: &VulkanBackendConfig) -> Result<Self, RenderError> {
        config.validate().map_err(RenderError::InitializationFailed)?;

        let context = VulkanContext::new(&config.application_name, config.enable_validation)?;
        let features = context.features();
        let device = context.raw_device().clone();

        let shaders = SceneShaders::load(&device, config, features.descriptor_indexing)?;
        let per_draw_set_layout = DescriptorSetLayout::per_draw(&device)?;
        let per_draw_pipeline_layout = PipelineLayout::new(&device, per_draw_set_layout.handle())?;
        let clear_pass = RenderPass::scene(&device, true)?;
        let load_pass = RenderPass::scene(&device, false)?;
        let commands = CommandContext::new(device, context.graphics_queue(), context.device.graphics_family)?;

        let capabilities = BackendCapabilities {
            descriptor_indexing: features.descriptor_indexing && shaders.bindless.is_some(),
            depth_clamp: features.depth_clamp,
            max_samples: MAX_SAMPLES,
        };
        log::info!(
            "[VULKAN] Backend ready on {} (bindless: {}, depth clamp: {})",
            context.physical_device.name(),
            capabilities.descriptor_indexing,
            capabilities.depth_clamp
        );

        Ok(Self {
            commands,
            pipelines: HashMap::new(),
            sets: HashMap::new(),
            pools: HashMap::new(),
            bindless: None,
            textures: HashMap::new(),
            samplers: HashMap::new(),
            scene_buffers: None,
            readback: None,
            targets: None,
            clear_pass,
            load_pass,
            per_draw_pipeline_layout,
            per_draw_set_layout,
            shaders,
            capabilities,
            viewport: Viewport {
                x: 0.0,
                y: 0.0,
                width: 0.0,
                height: 0.0,
            },
            next_id: 1,
            context,
        })
    }

    /// The Vulkan context
    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Retire every submission; used before destroying anything the GPU may read
    fn settle(&mut self) {
        if let Err(e) = self.commands.wait_all() {
            log::error!("[VULKAN] Waiting for submissions failed: {e}");
        }
    }

    fn sampled_image(&self, binding: TextureBinding) -> BackendResult<SampledImage> {
        let texture = self.textures.get(&binding.texture.0).ok_or(RenderError::InvalidHandle {
            kind: "texture",
            id: binding.texture.0,
        })?;
        let sampler = self.samplers.get(&binding.sampler.0).ok_or(RenderError::InvalidHandle {
            kind: "sampler",
            id: binding.sampler.0,
        })?;
        Ok(SampledImage {
            view: texture.image_view(),
            sampler: sampler.handle(),
        })
    }

    fn descriptor_set(&self, set: DescriptorSetHandle) -> BackendResult<vk::DescriptorSet> {
        if let Some(bindless) = self.bindless.as_ref().filter(|b| b.id == set.0) {
            return Ok(bindless.set);
        }
        self.sets
            .get(&set.0)
            .map(|entry| entry.set)
            .ok_or(RenderError::InvalidHandle {
                kind: "descriptor set",
                id: set.0,
            })
    }

    /// Point every descriptor that reads `texture` at its current view
    fn rebind_texture(&self, texture: TextureHandle) -> BackendResult<()> {
        let device = self.context.raw_device();
        for entry in self.sets.values() {
            if entry.bindings.iter().any(|b| b.texture == texture) {
                let images = [
                    self.sampled_image(entry.bindings[0])?,
                    self.sampled_image(entry.bindings[1])?,
                    self.sampled_image(entry.bindings[2])?,
                    self.sampled_image(entry.bindings[3])?,
                ];
                write_per_draw_set(device, entry.set, &images);
            }
        }
        if let Some(bindless) = &self.bindless {
            for (&slot, &binding) in bindless.slots.iter().filter(|(_, b)| b.texture == texture) {
                write_bindless_element(device, bindless.set, slot, self.sampled_image(binding)?);
            }
        }
        Ok(())
    }

    fn clear_values(clear_color: [f32; 4]) -> [vk::ClearValue; 3] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: clear_color },
            },
            vk::ClearValue {
                color: vk::ClearColorValue { uint32: [0; 4] },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ]
    }

    /// Submit an empty clear pass over the current targets
    fn submit_clear(&mut self, clear_color: [f32; 4]) -> BackendResult<()> {
        let targets = self.targets.as_ref().ok_or(RenderError::NotInitialized)?;
        let device = self.context.raw_device();
        let clear_values = Self::clear_values(clear_color);
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.clear_pass.handle())
            .framebuffer(targets.framebuffer())
            .render_area(targets.render_area())
            .clear_values(&clear_values);

        self.commands.submit(|cb| unsafe {
            device.cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_end_render_pass(cb);
        })?;
        Ok(())
    }

    fn scissor(&self, targets: &SceneTargets) -> vk::Rect2D {
        let area = targets.render_area().extent;
        let x0 = self.viewport.x.max(0.0) as u32;
        let y0 = self.viewport.y.max(0.0) as u32;
        let x1 = ((self.viewport.x + self.viewport.width).max(0.0) as u32).min(area.width);
        let y1 = ((self.viewport.y + self.viewport.height).max(0.0) as u32).min(area.height);
        vk::Rect2D {
            offset: vk::Offset2D {
                x: x0.min(x1) as i32,
                y: y0.min(y1) as i32,
            },
            extent: vk::Extent2D {
                width: x1.saturating_sub(x0),
                height: y1.saturating_sub(y0),
            },
        }
    }
}

impl GraphicsBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn resize_scene_targets(&mut self, width: u32, height: u32, multisample: u32) -> BackendResult<u32> {
        if width == 0 || height == 0 {
            return Err(RenderError::BackendError(format!("invalid scene target size {width}x{height}")));
        }
        self.settle();

        // The old targets stay in place until both replacements exist
        let targets = SceneTargets::new(&self.context, &self.clear_pass, width, height)?;
        let readback = Buffer::new(
            &self.context,
            u64::from(width) * u64::from(height) * size_of::<u32>() as u64,
            vk::BufferUsageFlags::TRANSFER_DST,
        )?;
        self.targets = Some(targets);
        self.readback = Some(readback);
        self.viewport = Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        };

        // Moves the new attachments out of UNDEFINED before any load pass
        self.submit_clear([0.0, 0.0, 0.0, 0.0])?;
        Ok(best_sample_count(multisample, MAX_SAMPLES))
    }

    fn release_scene_targets(&mut self) {
        self.settle();
        self.targets = None;
        self.readback = None;
    }

    fn create_scene_buffers(&mut self, vertex_capacity: u32, index_capacity: u32) -> BackendResult<()> {
        self.settle();

        let vertices = Buffer::new(
            &self.context,
            u64::from(vertex_capacity) * size_of::<SceneVertex>() as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let indices = Buffer::new(
            &self.context,
            u64::from(index_capacity) * size_of::<u32>() as u64,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        log::debug!("[VULKAN] Scene buffers: {vertex_capacity} vertices, {index_capacity} indices");
        self.scene_buffers = Some(SceneBuffers { vertices, indices });
        Ok(())
    }

    fn release_scene_buffers(&mut self) {
        self.settle();
        self.scene_buffers = None;
    }

    fn write_scene_geometry(
        &mut self,
        first_vertex: u32,
        vertices: &[SceneVertex],
        first_index: u32,
        indices: &[u32],
    ) -> BackendResult<()> {
        let buffers = self
            .scene_buffers
            .as_ref()
            .ok_or_else(|| RenderError::BackendError("scene buffers not created".to_string()))?;
        buffers
            .vertices
            .write(u64::from(first_vertex) * size_of::<SceneVertex>() as u64, vertices)?;
        buffers
            .indices
            .write(u64::from(first_index) * size_of::<u32>() as u64, indices)?;
        Ok(())
    }

    fn finish_generation(&mut self) -> BackendResult<()> {
        self.commands.wait_all()?;
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> BackendResult<PipelineHandle> {
        let layout = if desc.bindless {
            &self
                .bindless
                .as_ref()
                .ok_or_else(|| RenderError::BackendError("bindless array not created".to_string()))?
                .pipeline_layout
        } else {
            &self.per_draw_pipeline_layout
        };
        let pipeline = GraphicsPipeline::scene(
            self.context.raw_device(),
            self.load_pass.handle(),
            &self.shaders,
            layout,
            desc,
            self.capabilities.depth_clamp,
        )?;

        let id = self.allocate_id();
        self.pipelines.insert(id, pipeline);
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.settle();
        self.pipelines.remove(&pipeline.0);
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> BackendResult<SamplerHandle> {
        let sampler = VulkanSampler::new(&self.context, desc)?;
        let id = self.allocate_id();
        self.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.settle();
        self.samplers.remove(&sampler.0);
    }

    fn create_texture(&mut self, upload: &TextureUpload) -> BackendResult<TextureHandle> {
        let texture = VulkanTexture::new(&self.context, &mut self.commands, upload)?;
        let id = self.allocate_id();
        self.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn update_texture(&mut self, texture: TextureHandle, upload: &TextureUpload) -> BackendResult<()> {
        let existing = self.textures.get(&texture.0).ok_or(RenderError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })?;

        if existing.matches(upload) {
            existing.reupload(&self.context, &mut self.commands, upload)?;
            return Ok(());
        }

        // New dimensions need a new image; creating it retires every submission
        let replacement = VulkanTexture::new(&self.context, &mut self.commands, upload)?;
        self.textures.insert(texture.0, replacement);
        self.rebind_texture(texture)
    }

    fn update_texture_rect(
        &mut self,
        texture: TextureHandle,
        upload: &TextureUpload,
        rect: TextureRect,
    ) -> BackendResult<()> {
        let existing = self.textures.get(&texture.0).ok_or(RenderError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })?;
        existing.update_rect(&self.context, &mut self.commands, upload, rect)?;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.settle();
        self.textures.remove(&texture.0);
    }

    fn create_descriptor_pool(&mut self, max_sets: u32) -> BackendResult<DescriptorPoolHandle> {
        let pool = DescriptorPool::per_draw(self.context.raw_device().clone(), max_sets)?;
        let id = self.allocate_id();
        self.pools.insert(id, pool);
        Ok(DescriptorPoolHandle(id))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        self.settle();
        self.sets.retain(|_, entry| entry.pool != pool.0);
        self.pools.remove(&pool.0);
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        bindings: &[TextureBinding; 4],
    ) -> BackendResult<DescriptorSetHandle> {
        let images = [
            self.sampled_image(bindings[0])?,
            self.sampled_image(bindings[1])?,
            self.sampled_image(bindings[2])?,
            self.sampled_image(bindings[3])?,
        ];

        let owner = self.pools.get_mut(&pool.0).ok_or(RenderError::InvalidHandle {
            kind: "descriptor pool",
            id: pool.0,
        })?;
        let set = owner.allocate(&self.per_draw_set_layout)?;
        write_per_draw_set(self.context.raw_device(), set, &images);

        let id = self.allocate_id();
        self.sets.insert(
            id,
            PerDrawSet {
                pool: pool.0,
                set,
                bindings: *bindings,
            },
        );
        Ok(DescriptorSetHandle(id))
    }

    fn create_bindless_set(&mut self, capacity: u32) -> BackendResult<DescriptorSetHandle> {
        if !self.capabilities.descriptor_indexing {
            return Err(RenderError::BackendError("descriptor indexing unsupported".to_string()));
        }
        if self.bindless.is_some() {
            return Err(RenderError::BackendError("bindless array already exists".to_string()));
        }

        let device = self.context.raw_device().clone();
        let layout = DescriptorSetLayout::bindless(&device, capacity)?;
        let pipeline_layout = PipelineLayout::new(&device, layout.handle())?;
        let mut pool = DescriptorPool::bindless(device, capacity)?;
        let set = pool.allocate(&layout)?;

        let id = self.allocate_id();
        self.bindless = Some(BindlessArray {
            id,
            capacity,
            set,
            slots: HashMap::new(),
            pipeline_layout,
            _pool: pool,
            _layout: layout,
        });
        log::debug!("[VULKAN] Bindless array with {capacity} slots");
        Ok(DescriptorSetHandle(id))
    }

    fn write_bindless_slot(
        &mut self,
        set: DescriptorSetHandle,
        slot: u32,
        binding: TextureBinding,
    ) -> BackendResult<()> {
        let image = self.sampled_image(binding)?;
        let bindless = self
            .bindless
            .as_mut()
            .filter(|b| b.id == set.0)
            .ok_or(RenderError::InvalidHandle {
                kind: "bindless set",
                id: set.0,
            })?;
        if slot >= bindless.capacity {
            return Err(RenderError::BackendError(format!(
                "bindless slot {slot} outside array of {}",
                bindless.capacity
            )));
        }
        write_bindless_element(self.context.raw_device(), bindless.set, slot, image);
        bindless.slots.insert(slot, binding);
        Ok(())
    }

    fn destroy_bindless_set(&mut self, set: DescriptorSetHandle) {
        if self.bindless.as_ref().is_some_and(|b| b.id == set.0) {
            self.settle();
            self.bindless = None;
        }
    }

    fn begin_frame(&mut self, clear_color: [f32; 4]) -> BackendResult<()> {
        self.commands.wait_all()?;
        self.submit_clear(clear_color)
    }

    fn set_viewport(&mut self, viewport: Viewport) -> BackendResult<()> {
        self.viewport = viewport;
        Ok(())
    }

    fn clear_depth(&mut self) -> BackendResult<()> {
        let targets = self.targets.as_ref().ok_or(RenderError::NotInitialized)?;
        let device = self.context.raw_device();
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.load_pass.handle())
            .framebuffer(targets.framebuffer())
            .render_area(targets.render_area());
        let attachment = vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::DEPTH,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        };
        let rect = vk::ClearRect {
            rect: targets.render_area(),
            base_array_layer: 0,
            layer_count: 1,
        };

        self.commands.submit(|cb| unsafe {
            device.cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_clear_attachments(cb, &[attachment], &[rect]);
            device.cmd_end_render_pass(cb);
        })?;
        Ok(())
    }

    fn draw(&mut self, constants: &ScenePushConstants, draws: &[DrawCommand]) -> BackendResult<()> {
        let targets = self.targets.as_ref().ok_or(RenderError::NotInitialized)?;
        let buffers = self
            .scene_buffers
            .as_ref()
            .ok_or_else(|| RenderError::BackendError("scene buffers not created".to_string()))?;

        let mut resolved = Vec::with_capacity(draws.len());
        for command in draws.iter().filter(|c| c.index_count > 0) {
            let pipeline = self.pipelines.get(&command.pipeline.0).ok_or(RenderError::InvalidHandle {
                kind: "pipeline",
                id: command.pipeline.0,
            })?;
            let set = self.descriptor_set(command.descriptor_set)?;
            resolved.push((pipeline.handle(), pipeline.layout(), set, command));
        }
        let Some(&(_, first_layout, _, _)) = resolved.first() else {
            return Ok(());
        };

        let device = self.context.raw_device();
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.load_pass.handle())
            .framebuffer(targets.framebuffer())
            .render_area(targets.render_area());
        let viewport = vk::Viewport {
            x: self.viewport.x,
            y: self.viewport.y,
            width: self.viewport.width,
            height: self.viewport.height,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = self.scissor(targets);
        let push_constants = bytemuck::bytes_of(constants);

        self.commands.submit(|cb| unsafe {
            device.cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cb, 0, &[viewport]);
            device.cmd_set_scissor(cb, 0, &[scissor]);
            device.cmd_bind_vertex_buffers(cb, 0, &[buffers.vertices.handle()], &[0]);
            device.cmd_bind_index_buffer(cb, buffers.indices.handle(), 0, vk::IndexType::UINT32);
            device.cmd_push_constants(
                cb,
                first_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                push_constants,
            );

            let mut bound_pipeline = vk::Pipeline::null();
            let mut bound_set = vk::DescriptorSet::null();
            for &(pipeline, layout, set, command) in &resolved {
                if pipeline != bound_pipeline {
                    device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline);
                    bound_pipeline = pipeline;
                }
                if set != bound_set {
                    device.cmd_bind_descriptor_sets(cb, vk::PipelineBindPoint::GRAPHICS, layout, 0, &[set], &[]);
                    bound_set = set;
                }
                device.cmd_draw_indexed(cb, command.index_count, 1, command.first_index, 0, 0);
            }

            device.cmd_end_render_pass(cb);
        })?;
        Ok(())
    }

    fn end_frame(&mut self, present: bool, vsync: bool) -> BackendResult<()> {
        self.commands.wait_all()?;
        if present {
            log::trace!("[VULKAN] Frame complete (vsync {vsync})");
        }
        Ok(())
    }

    fn read_hit_region(&mut self, region: HitRegion) -> BackendResult<Vec<u32>> {
        let targets = self.targets.as_ref().ok_or(RenderError::NotInitialized)?;
        let readback = self.readback.as_ref().ok_or(RenderError::NotInitialized)?;
        let Some(region) = targets.clip(region) else {
            return Ok(Vec::new());
        };

        self.commands
            .submit_and_wait(|cb| targets.record_hit_copy(cb, readback.handle(), region))?;
        Ok(readback.read::<u32>(region.width as usize * region.height as usize)?)
    }

    fn read_pixels(&mut self) -> BackendResult<Vec<u8>> {
        let targets = self.targets.as_ref().ok_or(RenderError::NotInitialized)?;
        let readback = self.readback.as_ref().ok_or(RenderError::NotInitialized)?;
        let area = targets.render_area().extent;
        let region = HitRegion {
            x: 0,
            y: 0,
            width: area.width,
            height: area.height,
        };

        self.commands
            .submit_and_wait(|cb| targets.record_color_copy(cb, readback.handle(), region))?;
        Ok(readback.read::<u8>(area.width as usize * area.height as usize * 4)?)
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        self.commands.wait_all()?;
        unsafe { self.context.raw_device().device_wait_idle() }
            .map_err(|e| RenderError::BackendError(format!("device wait failed: {e:?}")))
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::warn!("[VULKAN] Dropping backend with work in flight: {e}");
        }
    }
}
