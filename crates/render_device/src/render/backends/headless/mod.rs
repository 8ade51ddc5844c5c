//! Headless backend
//!
//! A [`GraphicsBackend`] with no GPU behind it. Every resource is tracked in
//! plain maps so tests can inspect what the device created, every draw is
//! recorded, and triangle and line batches are rasterized into a CPU hit
//! target so picking works end to end. No color is shaded: pixel readback
//! returns the last clear color over the whole target.
//!
//! Creation calls can be made to fail on demand through
//! [`FailureInjection`].

pub mod raster;

use std::collections::HashMap;

use crate::render::api::{
    BackendCapabilities, BackendResult, DescriptorPoolHandle, DescriptorSetHandle, DrawCommand,
    GraphicsBackend, HitRegion, PipelineHandle, SamplerHandle, ScenePushConstants, TextureBinding,
    TextureHandle, TextureRect, Viewport,
};
use crate::render::pipeline::{PipelineDesc, PrimitiveTopology};
use crate::render::resources::sampler::SamplerDesc;
use crate::render::resources::scene_buffers::{best_sample_count, SceneVertex};
use crate::render::resources::texture_cache::TextureUpload;
use crate::render::scene::MipLevel;
use crate::render::RenderError;

pub use raster::HitTarget;

/// Creation calls to fail
#[derive(Debug, Clone, Default)]
pub struct FailureInjection {
    /// Fail pipeline creation after this many successes
    pub pipelines_before_failure: Option<usize>,
    /// Fail every sampler creation
    pub sampler_creation: bool,
    /// Fail every texture creation
    pub texture_creation: bool,
    /// Fail every descriptor pool creation
    pub descriptor_pool_creation: bool,
    /// Fail scene target creation
    pub scene_targets: bool,
}

/// A draw as the backend received it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedDraw {
    /// The draw
    pub command: DrawCommand,
    /// Constants active for the draw
    pub constants: ScenePushConstants,
    /// Viewport active for the draw
    pub viewport: Viewport,
}

#[derive(Debug)]
struct HeadlessTexture {
    mips: Vec<MipLevel>,
}

#[derive(Debug)]
struct HeadlessPool {
    max_sets: u32,
    allocated: u32,
}

/// Recording backend without a GPU
#[derive(Debug)]
pub struct HeadlessBackend {
    capabilities: BackendCapabilities,
    failures: FailureInjection,
    next_id: u64,
    pipelines_created: usize,
    pipelines: HashMap<u64, PipelineDesc>,
    samplers: HashMap<u64, SamplerDesc>,
    textures: HashMap<u64, HeadlessTexture>,
    pools: HashMap<u64, HeadlessPool>,
    sets: HashMap<u64, (u64, [TextureBinding; 4])>,
    bindless_sets: HashMap<u64, HashMap<u32, TextureBinding>>,
    allocated_sets: usize,
    buffer_capacity: Option<(u32, u32)>,
    vertices: Vec<SceneVertex>,
    indices: Vec<u32>,
    target: HitTarget,
    clear_color: [u8; 4],
    samples: u32,
    viewport: Viewport,
    draws: Vec<RecordedDraw>,
    frames_begun: u32,
    frames_presented: u32,
    depth_clears: u32,
    generations_finished: u32,
    texture_updates: u32,
    last_vsync: Option<bool>,
}

impl HeadlessBackend {
    /// Backend with scene targets of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            capabilities: BackendCapabilities {
                descriptor_indexing: true,
                depth_clamp: true,
                max_samples: 8,
            },
            failures: FailureInjection::default(),
            next_id: 1,
            pipelines_created: 0,
            pipelines: HashMap::new(),
            samplers: HashMap::new(),
            textures: HashMap::new(),
            pools: HashMap::new(),
            sets: HashMap::new(),
            bindless_sets: HashMap::new(),
            allocated_sets: 0,
            buffer_capacity: None,
            vertices: Vec::new(),
            indices: Vec::new(),
            target: HitTarget::new(width, height),
            clear_color: [0, 0, 0, 0],
            samples: 1,
            viewport: Viewport {
                x: 0.0,
                y: 0.0,
                width: width as f32,
                height: height as f32,
            },
            draws: Vec::new(),
            frames_begun: 0,
            frames_presented: 0,
            depth_clears: 0,
            generations_finished: 0,
            texture_updates: 0,
            last_vsync: None,
        }
    }

    /// Override the reported capabilities
    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make later creation calls fail
    pub fn inject_failures(&mut self, failures: FailureInjection) {
        self.pipelines_created = 0;
        self.failures = failures;
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn injected(what: &str) -> RenderError {
        RenderError::BackendError(format!("injected {what} failure"))
    }

    /// Description a pipeline was created from
    pub fn pipeline_desc(&self, pipeline: PipelineHandle) -> Option<&PipelineDesc> {
        self.pipelines.get(&pipeline.0)
    }

    /// Live pipelines
    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    /// Live samplers
    pub fn live_samplers(&self) -> usize {
        self.samplers.len()
    }

    /// Description a sampler was created from
    pub fn sampler_desc(&self, sampler: SamplerHandle) -> Option<&SamplerDesc> {
        self.samplers.get(&sampler.0)
    }

    /// Live textures
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// RGBA8 texels of a texture's top mip
    pub fn texture_data(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures
            .get(&texture.0)
            .and_then(|t| t.mips.first())
            .map(|mip| mip.data.as_slice())
    }

    /// Live descriptor pools
    pub fn live_descriptor_pools(&self) -> usize {
        self.pools.len()
    }

    /// Descriptor sets allocated over the backend's lifetime
    pub fn allocated_descriptor_sets(&self) -> usize {
        self.allocated_sets
    }

    /// Bindings of a live descriptor set
    pub fn descriptor_set_bindings(&self, set: DescriptorSetHandle) -> Option<[TextureBinding; 4]> {
        self.sets.get(&set.0).map(|(_, bindings)| *bindings)
    }

    /// Binding written into a bindless array slot
    pub fn bindless_slot(&self, set: DescriptorSetHandle, slot: u32) -> Option<TextureBinding> {
        self.bindless_sets.get(&set.0).and_then(|slots| slots.get(&slot)).copied()
    }

    /// Every draw received so far
    pub fn recorded_draws(&self) -> &[RecordedDraw] {
        &self.draws
    }

    /// Forget recorded draws
    pub fn clear_recorded_draws(&mut self) {
        self.draws.clear();
    }

    /// Vertices referenced by a recorded draw, in index order
    pub fn draw_vertices(&self, draw: &DrawCommand) -> Vec<SceneVertex> {
        let start = draw.first_index as usize;
        let end = start + draw.index_count as usize;
        self.indices
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .filter_map(|&i| self.vertices.get(i as usize).copied())
            .collect()
    }

    /// Hit target value at a pixel
    pub fn hit_value(&self, x: u32, y: u32) -> Option<u32> {
        self.target.value(x, y)
    }

    /// Sample count of the scene targets
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Size of the scene targets
    pub fn target_size(&self) -> (u32, u32) {
        (self.target.width(), self.target.height())
    }

    /// Current viewport
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Frames started
    pub fn frames_begun(&self) -> u32 {
        self.frames_begun
    }

    /// Frames presented
    pub fn frames_presented(&self) -> u32 {
        self.frames_presented
    }

    /// Vsync flag of the last `end_frame`
    pub fn last_vsync(&self) -> Option<bool> {
        self.last_vsync
    }

    /// Depth clears outside `begin_frame`
    pub fn depth_clears(&self) -> u32 {
        self.depth_clears
    }

    /// Completed buffer generations
    pub fn generations_finished(&self) -> u32 {
        self.generations_finished
    }

    /// In-place texture re-uploads (full and rectangle)
    pub fn texture_updates(&self) -> u32 {
        self.texture_updates
    }

    /// Scene buffer capacities, once created
    pub fn scene_buffer_capacity(&self) -> Option<(u32, u32)> {
        self.buffer_capacity
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn resize_scene_targets(&mut self, width: u32, height: u32, multisample: u32) -> BackendResult<u32> {
        if self.failures.scene_targets {
            return Err(Self::injected("scene target"));
        }
        self.target = HitTarget::new(width, height);
        self.samples = best_sample_count(multisample, self.capabilities.max_samples);
        Ok(self.samples)
    }

    fn release_scene_targets(&mut self) {
        self.target = HitTarget::new(0, 0);
    }

    fn create_scene_buffers(&mut self, vertex_capacity: u32, index_capacity: u32) -> BackendResult<()> {
        self.buffer_capacity = Some((vertex_capacity, index_capacity));
        self.vertices.clear();
        self.indices.clear();
        Ok(())
    }

    fn release_scene_buffers(&mut self) {
        self.buffer_capacity = None;
        self.vertices.clear();
        self.indices.clear();
    }

    fn write_scene_geometry(
        &mut self,
        first_vertex: u32,
        vertices: &[SceneVertex],
        first_index: u32,
        indices: &[u32],
    ) -> BackendResult<()> {
        let (vertex_capacity, index_capacity) = self
            .buffer_capacity
            .ok_or_else(|| RenderError::BackendError("scene buffers not created".to_string()))?;

        let vertex_end = first_vertex as usize + vertices.len();
        let index_end = first_index as usize + indices.len();
        if vertex_end > vertex_capacity as usize || index_end > index_capacity as usize {
            return Err(RenderError::BackendError(format!(
                "geometry write past buffer end ({vertex_end} vertices, {index_end} indices)"
            )));
        }

        if self.vertices.len() < vertex_end {
            self.vertices.resize(vertex_end, SceneVertex::default());
        }
        self.vertices[first_vertex as usize..vertex_end].copy_from_slice(vertices);
        if self.indices.len() < index_end {
            self.indices.resize(index_end, 0);
        }
        self.indices[first_index as usize..index_end].copy_from_slice(indices);
        Ok(())
    }

    fn finish_generation(&mut self) -> BackendResult<()> {
        self.generations_finished += 1;
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> BackendResult<PipelineHandle> {
        if let Some(limit) = self.failures.pipelines_before_failure {
            if self.pipelines_created >= limit {
                return Err(Self::injected("pipeline"));
            }
        }
        self.pipelines_created += 1;
        let id = self.allocate_id();
        self.pipelines.insert(id, *desc);
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline.0);
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> BackendResult<SamplerHandle> {
        if self.failures.sampler_creation {
            return Err(Self::injected("sampler"));
        }
        let id = self.allocate_id();
        self.samplers.insert(id, *desc);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }

    fn create_texture(&mut self, upload: &TextureUpload) -> BackendResult<TextureHandle> {
        if self.failures.texture_creation {
            return Err(Self::injected("texture"));
        }
        let id = self.allocate_id();
        self.textures.insert(
            id,
            HeadlessTexture {
                mips: upload.mips.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn update_texture(&mut self, texture: TextureHandle, upload: &TextureUpload) -> BackendResult<()> {
        let entry = self.textures.get_mut(&texture.0).ok_or(RenderError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })?;
        entry.mips = upload.mips.clone();
        self.texture_updates += 1;
        Ok(())
    }

    fn update_texture_rect(
        &mut self,
        texture: TextureHandle,
        upload: &TextureUpload,
        rect: TextureRect,
    ) -> BackendResult<()> {
        let entry = self.textures.get_mut(&texture.0).ok_or(RenderError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })?;
        let (Some(top), Some(src)) = (entry.mips.first_mut(), upload.mips.first()) else {
            return Err(RenderError::BackendError("texture has no mips".to_string()));
        };

        let dst_pitch = top.width as usize * 4;
        let src_pitch = rect.width as usize * 4;
        for row in 0..rect.height as usize {
            let dst = (rect.y as usize + row) * dst_pitch + rect.x as usize * 4;
            let src_row = src.data.get(row * src_pitch..(row + 1) * src_pitch);
            let dst_row = top.data.get_mut(dst..dst + src_pitch);
            if let (Some(src_row), Some(dst_row)) = (src_row, dst_row) {
                dst_row.copy_from_slice(src_row);
            }
        }
        self.texture_updates += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn create_descriptor_pool(&mut self, max_sets: u32) -> BackendResult<DescriptorPoolHandle> {
        if self.failures.descriptor_pool_creation {
            return Err(Self::injected("descriptor pool"));
        }
        let id = self.allocate_id();
        self.pools.insert(id, HeadlessPool { max_sets, allocated: 0 });
        Ok(DescriptorPoolHandle(id))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        self.pools.remove(&pool.0);
        self.sets.retain(|_, (owner, _)| *owner != pool.0);
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        bindings: &[TextureBinding; 4],
    ) -> BackendResult<DescriptorSetHandle> {
        let entry = self.pools.get_mut(&pool.0).ok_or(RenderError::InvalidHandle {
            kind: "descriptor pool",
            id: pool.0,
        })?;
        if entry.allocated >= entry.max_sets {
            return Err(RenderError::BackendError("descriptor pool exhausted".to_string()));
        }
        entry.allocated += 1;

        let id = self.allocate_id();
        self.sets.insert(id, (pool.0, *bindings));
        self.allocated_sets += 1;
        Ok(DescriptorSetHandle(id))
    }

    fn create_bindless_set(&mut self, _capacity: u32) -> BackendResult<DescriptorSetHandle> {
        if !self.capabilities.descriptor_indexing {
            return Err(RenderError::BackendError("descriptor indexing unsupported".to_string()));
        }
        let id = self.allocate_id();
        self.bindless_sets.insert(id, HashMap::new());
        Ok(DescriptorSetHandle(id))
    }

    fn write_bindless_slot(
        &mut self,
        set: DescriptorSetHandle,
        slot: u32,
        binding: TextureBinding,
    ) -> BackendResult<()> {
        self.bindless_sets
            .get_mut(&set.0)
            .ok_or(RenderError::InvalidHandle {
                kind: "bindless set",
                id: set.0,
            })?
            .insert(slot, binding);
        Ok(())
    }

    fn destroy_bindless_set(&mut self, set: DescriptorSetHandle) {
        self.bindless_sets.remove(&set.0);
    }

    fn begin_frame(&mut self, clear_color: [f32; 4]) -> BackendResult<()> {
        self.target.clear();
        self.clear_color = clear_color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        self.frames_begun += 1;
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> BackendResult<()> {
        self.viewport = viewport;
        Ok(())
    }

    fn clear_depth(&mut self) -> BackendResult<()> {
        self.target.clear_depth();
        self.depth_clears += 1;
        Ok(())
    }

    fn draw(&mut self, constants: &ScenePushConstants, draws: &[DrawCommand]) -> BackendResult<()> {
        for command in draws {
            let desc = *self.pipelines.get(&command.pipeline.0).ok_or(RenderError::InvalidHandle {
                kind: "pipeline",
                id: command.pipeline.0,
            })?;
            let start = command.first_index as usize;
            let end = start + command.index_count as usize;
            let indices = self.indices.get(start..end).ok_or_else(|| {
                RenderError::BackendError(format!("draw reads indices {start}..{end} never written"))
            })?;

            match desc.topology {
                PrimitiveTopology::TriangleList => raster::draw_triangles(
                    &mut self.target,
                    &self.viewport,
                    constants,
                    &desc,
                    &self.vertices,
                    indices,
                ),
                PrimitiveTopology::LineList => raster::draw_lines(
                    &mut self.target,
                    &self.viewport,
                    constants,
                    &desc,
                    &self.vertices,
                    indices,
                ),
            }

            self.draws.push(RecordedDraw {
                command: *command,
                constants: *constants,
                viewport: self.viewport,
            });
        }
        Ok(())
    }

    fn end_frame(&mut self, present: bool, vsync: bool) -> BackendResult<()> {
        if present {
            self.frames_presented += 1;
            self.last_vsync = Some(vsync);
        }
        Ok(())
    }

    fn read_hit_region(&mut self, region: HitRegion) -> BackendResult<Vec<u32>> {
        Ok(self.target.read(region))
    }

    fn read_pixels(&mut self) -> BackendResult<Vec<u8>> {
        let pixels = self.target.width() as usize * self.target.height() as usize;
        Ok(self.clear_color.repeat(pixels))
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::poly_flags::PipelineKey;

    #[test]
    fn test_geometry_writes_are_bounded() {
        let mut backend = HeadlessBackend::new(4, 4);
        assert!(backend.write_scene_geometry(0, &[], 0, &[]).is_err());

        backend.create_scene_buffers(2, 2).unwrap();
        let v = SceneVertex::default();
        assert!(backend.write_scene_geometry(0, &[v, v], 0, &[0, 1]).is_ok());
        assert!(backend.write_scene_geometry(1, &[v, v], 0, &[]).is_err());
    }

    #[test]
    fn test_sample_count_is_clamped() {
        let mut backend = HeadlessBackend::new(4, 4).with_capabilities(BackendCapabilities {
            descriptor_indexing: false,
            depth_clamp: false,
            max_samples: 2,
        });
        assert_eq!(backend.resize_scene_targets(8, 8, 4).unwrap(), 2);
        assert_eq!(backend.target_size(), (8, 8));
        assert!(backend.create_bindless_set(16).is_err());
    }

    #[test]
    fn test_read_pixels_fills_target_with_clear_color() {
        let mut backend = HeadlessBackend::new(3, 2);
        assert_eq!(backend.read_pixels().unwrap(), vec![0; 24]);

        backend.begin_frame([1.0, 0.5, 0.0, 1.0]).unwrap();
        let pixels = backend.read_pixels().unwrap();
        assert_eq!(pixels.len(), 3 * 2 * 4);
        assert_eq!(&pixels[..4], &[255, 128, 0, 255]);
        assert_eq!(&pixels[20..], &[255, 128, 0, 255]);
    }

    #[test]
    fn test_pool_capacity_is_enforced() {
        let mut backend = HeadlessBackend::new(4, 4);
        let texture = backend.create_texture(&TextureUpload::null_texture()).unwrap();
        let sampler = backend
            .create_sampler(&SamplerDesc::for_mode(0, 0.0))
            .unwrap();
        let binding = TextureBinding { texture, sampler };
        let pool = backend.create_descriptor_pool(1).unwrap();

        assert!(backend.allocate_descriptor_set(pool, &[binding; 4]).is_ok());
        assert!(backend.allocate_descriptor_set(pool, &[binding; 4]).is_err());

        backend.destroy_descriptor_pool(pool);
        assert_eq!(backend.live_descriptor_pools(), 0);
    }

    #[test]
    fn test_draw_with_unknown_pipeline_fails() {
        let mut backend = HeadlessBackend::new(4, 4);
        backend.create_scene_buffers(4, 4).unwrap();
        let draw = DrawCommand {
            pipeline: PipelineHandle(999),
            descriptor_set: DescriptorSetHandle(1),
            first_index: 0,
            index_count: 0,
        };
        assert!(backend.draw(&ScenePushConstants::identity(), &[draw]).is_err());

        let pipeline = backend
            .create_pipeline(&PipelineDesc::for_key(PipelineKey::Point, 1))
            .unwrap();
        let draw = DrawCommand { pipeline, ..draw };
        assert!(backend.draw(&ScenePushConstants::identity(), &[draw]).is_ok());
        assert_eq!(backend.recorded_draws().len(), 1);
    }
}
