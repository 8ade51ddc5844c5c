//! # Render Device
//!
//! The façade the host engine drives. It owns a [`GraphicsBackend`] and every
//! cache built on top of it, and turns the engine's immediate-mode calls into
//! batched draws.
//!
//! ## Frame
//!
//! ```text
//! lock -> set_scene_node -> draw_* / push_hit / pop_hit ... -> end_flash -> unlock
//! ```
//!
//! Lifecycle calls (`init`, `set_res`) report failure as `false` after
//! logging the cause. Per-frame calls never fail: problems are logged and
//! the affected primitive is dropped.

mod primitives;
#[cfg(test)]
mod tests;

use crate::config::{BindingMode, RenderDeviceConfig};
use crate::foundation::math::{frustum_lh_zo, Mat4, Vec4};
use crate::render::api::{GraphicsBackend, ScenePushConstants, TextureRect, Viewport};
use crate::render::batching::DrawBatchAccumulator;
use crate::render::hit_test::HitTestQueryStack;
use crate::render::pipeline::PipelineStateTable;
use crate::render::poly_flags::{PipelineKey, PolyFlags};
use crate::render::resources::{
    DescriptorSetCache, DescriptorSetKey, SceneSamplers, TextureId, TextureResourceCache,
    MAX_BINDLESS_TEXTURES,
};
use crate::render::scene::{
    LockParams, SceneNode, TextureFormat, TextureInfo, SCENE_FAR_PLANE, SCENE_NEAR_PLANE,
};
use crate::render::RenderError;

pub use primitives::{VertexFlags, ORTHO_LOW_DETAIL};

/// Frame counters reported by [`RenderDevice::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStats {
    /// Draw calls issued
    pub draw_calls: u32,
    /// Batches closed; one draw call is issued per batch
    pub batches: u32,
    /// Complex (BSP) surfaces drawn
    pub complex_surfaces: u32,
    /// Gouraud polygons and triangle lists drawn
    pub gouraud_polygons: u32,
    /// Tiles drawn
    pub tiles: u32,
    /// Full texture uploads
    pub uploads: u32,
    /// Texture rectangle uploads
    pub rect_uploads: u32,
    /// Scene buffer generations used
    pub buffers_used: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct PrimitiveCounters {
    complex_surfaces: u32,
    gouraud_polygons: u32,
    tiles: u32,
}

/// Screen to camera space factors derived from the current scene node
#[derive(Debug, Clone, Copy, PartialEq)]
struct Projection {
    rproj_z: f32,
    aspect: f32,
    rfx2: f32,
    rfy2: f32,
}

impl Projection {
    fn for_frame(frame: &SceneNode) -> Self {
        let rproj_z = (frame.fov_angle.to_radians() * 0.5).tan();
        let aspect = frame.fy / frame.fx;
        Self {
            rproj_z,
            aspect,
            rfx2: 2.0 * rproj_z / frame.fx,
            rfy2: 2.0 * rproj_z * aspect / frame.fy,
        }
    }

    fn matrix(&self) -> Mat4 {
        frustum_lh_zo(
            -self.rproj_z,
            self.rproj_z,
            -self.aspect * self.rproj_z,
            self.aspect * self.rproj_z,
            SCENE_NEAR_PLANE,
            SCENE_FAR_PLANE,
        )
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            rproj_z: 1.0,
            aspect: 1.0,
            rfx2: 0.0,
            rfy2: 0.0,
        }
    }
}

/// Everything created by `init` and released by `exit`
#[derive(Debug)]
struct DeviceResources {
    pipelines: PipelineStateTable,
    samplers: SceneSamplers,
    textures: TextureResourceCache,
    descriptors: DescriptorSetCache,
    batches: DrawBatchAccumulator,
}

impl DeviceResources {
    fn release<B: GraphicsBackend>(mut self, backend: &mut B) {
        self.descriptors.release(backend, &mut self.textures);
        self.textures.release(backend);
        self.pipelines.release(backend);
        self.samplers.release(backend);
    }
}

/// Resources created so far during `init`
#[derive(Debug, Default)]
struct PartialResources {
    samplers: Option<SceneSamplers>,
    textures: TextureResourceCache,
    descriptors: Option<DescriptorSetCache>,
    pipelines: Option<PipelineStateTable>,
}

impl PartialResources {
    fn release<B: GraphicsBackend>(mut self, backend: &mut B) {
        if let Some(mut descriptors) = self.descriptors.take() {
            descriptors.release(backend, &mut self.textures);
        }
        self.textures.release(backend);
        if let Some(pipelines) = self.pipelines.take() {
            pipelines.release(backend);
        }
        if let Some(samplers) = self.samplers.take() {
            samplers.release(backend);
        }
    }
}

/// Render device driving one graphics backend
#[derive(Debug)]
pub struct RenderDevice<B: GraphicsBackend> {
    backend: B,
    config: RenderDeviceConfig,
    resources: Option<DeviceResources>,
    hits: HitTestQueryStack,
    constants: ScenePushConstants,
    projection: Projection,
    current_frame: Option<SceneNode>,
    lock_params: LockParams,
    is_locked: bool,
    precache_on_flip: bool,
    width: u32,
    height: u32,
    multisample: u32,
    samples: u32,
    counters: PrimitiveCounters,
}

impl<B: GraphicsBackend> RenderDevice<B> {
    /// Wrap a backend; no GPU resources exist until [`init`](Self::init)
    pub fn new(backend: B, config: RenderDeviceConfig) -> Self {
        Self {
            backend,
            config,
            resources: None,
            hits: HitTestQueryStack::new(),
            constants: ScenePushConstants::identity(),
            projection: Projection::default(),
            current_frame: None,
            lock_params: LockParams::default(),
            is_locked: false,
            precache_on_flip: false,
            width: 0,
            height: 0,
            multisample: 0,
            samples: 1,
            counters: PrimitiveCounters::default(),
        }
    }

    /// The backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend access
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Current settings
    pub fn config(&self) -> &RenderDeviceConfig {
        &self.config
    }

    /// Settings can change at runtime; sample count changes apply at the
    /// next `lock`, LOD bias changes at the next presented frame
    pub fn config_mut(&mut self) -> &mut RenderDeviceConfig {
        &mut self.config
    }

    /// `init` succeeded and `exit` has not been called since
    pub fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    /// Between `lock` and `unlock`
    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    /// A flush asked the engine to precache textures at the next frame
    pub fn precache_requested(&self) -> bool {
        self.precache_on_flip
    }

    /// Sample count of the scene targets
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Scene target size
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Texture binding strategy in effect
    pub fn binding_mode(&self) -> BindingMode {
        match self.resources.as_ref().and_then(|r| r.descriptors.bindless_set()) {
            Some(_) => BindingMode::Bindless,
            None => BindingMode::PerDrawSets,
        }
    }

    /// Create every GPU resource for a `width` x `height` scene
    ///
    /// Any earlier state is released first. On failure everything created
    /// so far is released again and `false` is returned.
    pub fn init(&mut self, width: u32, height: u32) -> bool {
        self.exit();

        let mut partial = PartialResources::default();
        match self.create_resources(&mut partial, width, height) {
            Ok(resources) => {
                self.resources = Some(resources);
                log::info!(
                    "[DEVICE] Initialized {} backend at {width}x{height} ({} samples, {:?})",
                    self.backend.name(),
                    self.samples,
                    self.binding_mode()
                );
                true
            }
            Err(e) => {
                log::error!("[DEVICE] Initialization failed: {e}");
                partial.release(&mut self.backend);
                self.backend.release_scene_buffers();
                self.backend.release_scene_targets();
                false
            }
        }
    }

    fn create_resources(
        &mut self,
        partial: &mut PartialResources,
        width: u32,
        height: u32,
    ) -> Result<DeviceResources, RenderError> {
        self.config.validate().map_err(RenderError::InitializationFailed)?;

        let multisample = self.config.antialias_mode.multisample();
        let samples = self.backend.resize_scene_targets(width, height, multisample)?;
        self.backend.create_scene_buffers(
            self.config.scene_vertex_buffer_size,
            self.config.scene_index_buffer_size,
        )?;

        let samplers = partial
            .samplers
            .insert(SceneSamplers::create(&mut self.backend, self.config.lod_bias)?);
        partial.textures.create_null_texture(&mut self.backend)?;

        let descriptors = partial
            .descriptors
            .insert(DescriptorSetCache::new(self.config.descriptor_pool_size));
        let mut bindless = false;
        if self.config.binding_mode == BindingMode::Bindless {
            if self.backend.capabilities().descriptor_indexing {
                descriptors.enable_bindless(
                    &mut self.backend,
                    &partial.textures,
                    samplers,
                    MAX_BINDLESS_TEXTURES,
                )?;
                bindless = true;
            } else {
                log::warn!("[DEVICE] Bindless textures unsupported, using per-draw descriptor sets");
            }
        }

        partial.pipelines = Some(PipelineStateTable::build(&mut self.backend, samples, bindless)?);

        let (Some(pipelines), Some(samplers), Some(descriptors)) = (
            partial.pipelines.take(),
            partial.samplers.take(),
            partial.descriptors.take(),
        ) else {
            return Err(RenderError::InitializationFailed("incomplete resources".to_string()));
        };

        self.width = width;
        self.height = height;
        self.multisample = multisample;
        self.samples = samples;

        Ok(DeviceResources {
            pipelines,
            samplers,
            textures: std::mem::take(&mut partial.textures),
            descriptors,
            batches: DrawBatchAccumulator::new(
                self.config.scene_vertex_buffer_size,
                self.config.scene_index_buffer_size,
            ),
        })
    }

    /// Resize the scene targets, rebuilding pipelines when the sample count
    /// changes
    pub fn set_res(&mut self, width: u32, height: u32) -> bool {
        if self.resources.is_none() {
            log::warn!("[DEVICE] set_res called before init");
            return false;
        }
        self.flush_batches(false);

        match self.resize(width, height) {
            Ok(()) => {
                log::info!("[DEVICE] Resolution set to {width}x{height} ({} samples)", self.samples);
                true
            }
            Err(e) => {
                log::error!("[DEVICE] Could not set resolution {width}x{height}: {e}");
                false
            }
        }
    }

    /// Targets and pipelines change together: when the pipeline rebuild
    /// fails the targets go back to the previous size and sample count.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        let multisample = self.config.antialias_mode.multisample();
        let previous = (self.width, self.height, self.multisample);
        let Self {
            backend, resources, ..
        } = self;
        let resources = resources.as_mut().ok_or(RenderError::NotInitialized)?;

        if let Err(e) = backend.wait_idle() {
            log::warn!("[DEVICE] Wait before resize failed: {e}");
        }
        let samples = backend.resize_scene_targets(width, height, multisample)?;
        if samples != resources.pipelines.samples() {
            let bindless = resources.pipelines.is_bindless();
            let table = match PipelineStateTable::build(backend, samples, bindless) {
                Ok(table) => table,
                Err(e) => {
                    let (old_width, old_height, old_multisample) = previous;
                    let restored = backend.resize_scene_targets(old_width, old_height, old_multisample);
                    if let Err(restore) = restored {
                        log::error!(
                            "[DEVICE] Could not restore {old_width}x{old_height} scene targets: {restore}"
                        );
                    }
                    return Err(e);
                }
            };
            std::mem::replace(&mut resources.pipelines, table).release(backend);
            resources.batches.reset_frame();
        }

        self.width = width;
        self.height = height;
        self.multisample = multisample;
        self.samples = samples;
        Ok(())
    }

    /// Release every GPU resource; safe to call repeatedly
    pub fn exit(&mut self) {
        let Some(resources) = self.resources.take() else {
            return;
        };
        if let Err(e) = self.backend.wait_idle() {
            log::warn!("[DEVICE] Wait before shutdown failed: {e}");
        }
        resources.release(&mut self.backend);
        self.backend.release_scene_buffers();
        self.backend.release_scene_targets();

        self.hits.clear();
        self.current_frame = None;
        self.is_locked = false;
        self.precache_on_flip = false;
        log::info!("[DEVICE] Shut down");
    }

    /// Start a frame
    ///
    /// Clears the scene targets and resets the per-frame hit state. A pending
    /// antialiasing change is applied first.
    pub fn lock(&mut self, params: LockParams) {
        if self.resources.is_none() {
            return;
        }

        if self.config.antialias_mode.multisample() != self.multisample {
            let (width, height) = (self.width, self.height);
            self.set_res(width, height);
        }

        let clear = params.screen_clear;
        if let Err(e) = self.backend.begin_frame([clear.x, clear.y, clear.z, clear.w]) {
            log::warn!("[DEVICE] Could not begin frame: {e}");
        }

        self.hits.begin_frame();
        self.constants.hit_index = 0;
        self.lock_params = params;
        self.precache_on_flip = false;
        self.is_locked = true;
    }

    /// Finish a frame
    ///
    /// With `blit` the frame is presented. When the frame was locked with a
    /// hit region, the payload of the topmost query drawn inside it is
    /// returned.
    pub fn unlock(&mut self, blit: bool) -> Option<Vec<u8>> {
        let region = self.lock_params.hit_region.take();

        if blit || region.is_some() {
            self.flush_batches(false);
        }

        if blit {
            if let Err(e) = self.backend.end_frame(true, self.config.use_vsync) {
                log::warn!("[DEVICE] Present failed: {e}");
            }
            if let Some(resources) = self.resources.as_mut() {
                resources.batches.reset_frame();
            }
            self.update_lod_bias();
        }

        let result = region.and_then(|region| match self.backend.read_hit_region(region) {
            Ok(values) => {
                let max = values.iter().copied().max().unwrap_or(0);
                self.hits.resolve(max)
            }
            Err(e) => {
                log::warn!("[HIT] Hit readback failed: {e}");
                None
            }
        });

        self.hits.clear();
        self.is_locked = false;
        result
    }

    /// Read the scene color target as RGBA8, top row first
    ///
    /// Pending batches are drawn first and the call waits for the GPU.
    /// `None` before `init` or when the readback fails.
    pub fn read_pixels(&mut self) -> Option<Vec<u8>> {
        if self.resources.is_none() {
            return None;
        }
        self.flush_batches(false);
        match self.backend.read_pixels() {
            Ok(pixels) => Some(pixels),
            Err(e) => {
                log::warn!("[DEVICE] Pixel readback failed: {e}");
                None
            }
        }
    }

    fn update_lod_bias(&mut self) {
        let lod_bias = self.config.lod_bias;
        let Self {
            backend, resources, ..
        } = self;
        let Some(res) = resources.as_mut() else {
            return;
        };
        match res.samplers.update_lod_bias(backend, lod_bias) {
            Ok(true) => {
                if let Err(e) = res.descriptors.reset_samplers(backend, &mut res.textures, &res.samplers) {
                    log::warn!("[DEVICE] Could not rebind samplers: {e}");
                }
            }
            Ok(false) => {}
            Err(e) => log::warn!("[DEVICE] Could not rebuild samplers: {e}"),
        }
    }

    /// Open a nested pick region
    ///
    /// Geometry already submitted is flushed so it keeps the enclosing tag.
    pub fn push_hit(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.flush_batches(false);
        self.hits.push(data);
        self.constants.hit_index = self.hits.hit_index();
    }

    /// Close `count` bytes of pick regions
    pub fn pop_hit(&mut self, count: usize, force: bool) {
        self.hits.pop(count, force);
    }

    /// Draw everything pending and drop all cached textures
    pub fn flush(&mut self, allow_precache: bool) {
        self.clear_texture_cache();
        if allow_precache && self.config.use_precache && !self.config.editor_mode {
            self.precache_on_flip = true;
        }
    }

    /// Drop all cached textures together with their descriptor sets
    pub fn clear_texture_cache(&mut self) {
        self.flush_batches(false);
        let Self {
            backend, resources, ..
        } = self;
        let Some(res) = resources.as_mut() else {
            return;
        };
        if let Err(e) = backend.wait_idle() {
            log::warn!("[DEVICE] Wait before texture cache clear failed: {e}");
        }
        res.descriptors.clear(backend, &mut res.textures);
        res.textures.clear(backend);
    }

    /// Upload a texture ahead of its first use
    pub fn precache_texture(&mut self, info: &mut TextureInfo, poly_flags: PolyFlags) {
        self.resolve_texture(Some(info), poly_flags.contains(PolyFlags::MASKED));
    }

    /// Re-upload a rectangle of a cached texture
    pub fn update_texture_rect(&mut self, info: &TextureInfo, u: u32, v: u32, ul: u32, vl: u32) {
        let Self {
            backend, resources, ..
        } = self;
        let Some(res) = resources.as_mut() else {
            return;
        };
        let rect = TextureRect {
            x: u,
            y: v,
            width: ul,
            height: vl,
        };
        if let Err(e) = res.textures.update_rect(backend, info, rect) {
            log::warn!("[TEXTURE] Rectangle upload for {} failed: {e}", info.cache_id);
        }
    }

    /// Reset the depth target
    pub fn clear_z(&mut self, _frame: &SceneNode) {
        self.flush_batches(false);
        if let Err(e) = self.backend.clear_depth() {
            log::warn!("[DEVICE] Depth clear failed: {e}");
        }
    }

    /// Make `frame` the current viewport and projection
    pub fn set_scene_node(&mut self, frame: &SceneNode) {
        self.flush_batches(false);

        self.projection = Projection::for_frame(frame);
        let viewport = Viewport {
            x: frame.x_base as f32,
            y: frame.y_base as f32,
            width: frame.width as f32,
            height: frame.height as f32,
        };
        if let Err(e) = self.backend.set_viewport(viewport) {
            log::warn!("[DEVICE] Could not set viewport: {e}");
        }

        self.constants.set_projection(&self.projection.matrix());
        self.constants.set_near_clip(frame.near_clip);
        self.current_frame = Some(frame.clone());
    }

    /// Blend the screen flash over the frame
    pub fn end_flash(&mut self) {
        if !self.lock_params.has_flash() {
            return;
        }
        self.flush_batches(false);

        self.constants.set_projection(&Mat4::identity());
        self.constants.set_near_clip(Vec4::new(0.0, 0.0, 0.0, 1.0));

        let fog = self.lock_params.flash_fog;
        let scale = self.lock_params.flash_scale;
        let color = Vec4::new(fog.x, fog.y, fog.z, 1.0 - (scale.x * 2.0).min(1.0));
        self.draw_flash_quad(color);

        match self.current_frame.clone() {
            Some(frame) => self.set_scene_node(&frame),
            None => self.flush_batches(false),
        }
    }

    /// Counters since the last [`draw_stats`](Self::draw_stats)
    pub fn stats(&self) -> DeviceStats {
        let mut stats = DeviceStats {
            complex_surfaces: self.counters.complex_surfaces,
            gouraud_polygons: self.counters.gouraud_polygons,
            tiles: self.counters.tiles,
            buffers_used: 1,
            ..DeviceStats::default()
        };
        if let Some(res) = self.resources.as_ref() {
            let batch = res.batches.stats();
            stats.draw_calls = batch.draw_calls;
            stats.batches = batch.batches;
            stats.buffers_used = batch.buffers_used;
            stats.uploads = res.textures.uploads();
            stats.rect_uploads = res.textures.rect_uploads();
        }
        stats
    }

    /// One-line summary of the counters, which are then reset
    pub fn draw_stats(&mut self) -> String {
        let s = self.stats();
        let line = format!(
            "DrawCalls: {}, Batches: {}, ComplexSurfaces: {}, GouraudPolygons: {}, Tiles: {}, Uploads: {}, RectUploads: {}, BuffersUsed: {}",
            s.draw_calls,
            s.batches,
            s.complex_surfaces,
            s.gouraud_polygons,
            s.tiles,
            s.uploads,
            s.rect_uploads,
            s.buffers_used
        );

        self.counters = PrimitiveCounters::default();
        if let Some(res) = self.resources.as_mut() {
            res.batches.reset_stats();
            res.textures.reset_counters();
        }
        line
    }

    /// Texture formats accepted by the texture cache
    pub fn supports_texture_format(&self, format: &TextureFormat) -> bool {
        match format {
            TextureFormat::P8 { palette } => !palette.is_empty(),
            TextureFormat::Rgba8 | TextureFormat::Bgra8 => true,
        }
    }

    fn flush_batches(&mut self, next_generation: bool) {
        let Self {
            backend,
            resources,
            constants,
            ..
        } = self;
        let Some(res) = resources.as_mut() else {
            return;
        };
        if let Err(e) = res.batches.flush(backend, constants, next_generation) {
            log::warn!("[BATCH] Flush failed: {e}");
        }
    }

    fn resolve_texture(&mut self, info: Option<&mut TextureInfo>, masked: bool) -> Option<TextureId> {
        let Self {
            backend, resources, ..
        } = self;
        let res = resources.as_mut()?;
        let cache_id = info.as_ref().map(|i| i.cache_id);
        match res.textures.get(backend, info, masked) {
            Ok(id) => id,
            Err(e) => {
                log::warn!("[TEXTURE] Could not upload texture {cache_id:?}: {e}");
                None
            }
        }
    }

    /// Bind pipeline and textures for the next primitive
    ///
    /// Returns the bindless slots to store in each vertex (all zero in
    /// per-draw mode), or `None` when the textures could not be bound.
    fn apply_state(
        &mut self,
        key: PipelineKey,
        flags: PolyFlags,
        slots: [Option<TextureId>; 4],
        clamp: bool,
    ) -> Option<[u32; 4]> {
        let Self {
            backend, resources, ..
        } = self;
        let res = resources.as_mut()?;

        res.batches.set_pipeline(res.pipelines.get(key));

        if let Some(set) = res.descriptors.bindless_set() {
            res.batches.set_descriptor_set(set);
            let mut binds = [0; 4];
            for (i, (bind, slot)) in binds.iter_mut().zip(slots).enumerate() {
                let mode = if i == 0 { flags.sampler_mode(clamp) } else { 0 };
                *bind = res.descriptors.texture_array_index(
                    backend,
                    &mut res.textures,
                    &res.samplers,
                    slot,
                    mode,
                );
            }
            return Some(binds);
        }

        let key = DescriptorSetKey::new(flags, slots, clamp);
        match res.descriptors.get(backend, &res.textures, &res.samplers, key) {
            Ok(set) => {
                res.batches.set_descriptor_set(set);
                Some([0; 4])
            }
            Err(e) => {
                log::warn!("[DESCRIPTOR] Could not create descriptor set: {e}");
                None
            }
        }
    }

    /// Make room for a primitive, starting a new buffer generation if needed
    fn reserve(&mut self, vertex_count: u32, index_count: u32) -> bool {
        let Self {
            backend,
            resources,
            constants,
            ..
        } = self;
        match resources.as_mut() {
            Some(res) => res.batches.reserve(backend, constants, vertex_count, index_count),
            None => false,
        }
    }

    fn batches(&mut self) -> Option<&mut DrawBatchAccumulator> {
        self.resources.as_mut().map(|res| &mut res.batches)
    }

    fn editor_mode(&self) -> bool {
        self.config.editor_mode
    }
}

impl<B: GraphicsBackend> Drop for RenderDevice<B> {
    fn drop(&mut self) {
        self.exit();
    }
}
