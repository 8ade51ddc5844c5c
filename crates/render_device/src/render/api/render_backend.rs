//! Backend abstraction traits for the rendering system
//!
//! This module defines the trait that rendering backends must implement
//! to provide a consistent interface for the render device. Handles are
//! opaque `u64` newtypes; a backend maps them to its native objects.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Mat4, Vec4};
use crate::render::pipeline::PipelineDesc;
use crate::render::resources::sampler::SamplerDesc;
use crate::render::resources::scene_buffers::SceneVertex;
use crate::render::resources::texture_cache::TextureUpload;
use crate::render::RenderError;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, RenderError>;

/// Handle to a compiled pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(pub u64);

/// Handle to a sampler object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerHandle(pub u64);

/// Handle to a GPU texture (image plus view)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// Handle to a descriptor pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorPoolHandle(pub u64);

/// Handle to a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorSetHandle(pub u64);

/// A texture paired with the sampler it is read through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    /// Texture to bind
    pub texture: TextureHandle,
    /// Sampler to read it with
    pub sampler: SamplerHandle,
}

/// Sub-rectangle of a texture's top mip level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRect {
    /// Left texel
    pub x: u32,
    /// Top texel
    pub y: u32,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
}

impl TextureRect {
    /// The rectangle lies inside a `width` x `height` image
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let inside = |start: u32, len: u32, limit: u32| {
            start.checked_add(len).is_some_and(|end| end <= limit)
        };
        inside(self.x, self.width, width) && inside(self.y, self.height, height)
    }
}

/// Scene viewport in render target pixels (top-left origin)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

/// Pixel region of the hit target to resolve (top-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitRegion {
    /// Left pixel
    pub x: u32,
    /// Top pixel
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Per-flush shader constants
///
/// Layout matches the scene vertex shader's push constant block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ScenePushConstants {
    /// Camera space to clip space
    pub object_to_projection: [[f32; 4]; 4],
    /// User clip plane
    pub near_clip: [f32; 4],
    /// Value written into the hit target
    pub hit_index: u32,
    /// Keeps the block a multiple of 16 bytes
    pub padding: [u32; 3],
}

impl ScenePushConstants {
    /// Constants with an identity projection and no clip plane
    pub fn identity() -> Self {
        Self {
            object_to_projection: Mat4::identity().into(),
            near_clip: [0.0, 0.0, 0.0, 1.0],
            hit_index: 0,
            padding: [0; 3],
        }
    }

    /// Replace the projection matrix
    pub fn set_projection(&mut self, projection: &Mat4) {
        self.object_to_projection = (*projection).into();
    }

    /// Replace the near clip plane
    pub fn set_near_clip(&mut self, plane: Vec4) {
        self.near_clip = plane.into();
    }

    /// Projection as a matrix
    pub fn projection(&self) -> Mat4 {
        Mat4::from(self.object_to_projection)
    }
}

impl Default for ScenePushConstants {
    fn default() -> Self {
        Self::identity()
    }
}

/// One indexed draw of a closed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCommand {
    /// Pipeline to bind
    pub pipeline: PipelineHandle,
    /// Descriptor set to bind
    pub descriptor_set: DescriptorSetHandle,
    /// First index in the scene index buffer
    pub first_index: u32,
    /// Number of indices
    pub index_count: u32,
}

/// Optional features a backend reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCapabilities {
    /// Bindless texture arrays are available
    pub descriptor_indexing: bool,
    /// Depth clamping is available
    pub depth_clamp: bool,
    /// Highest usable multisample count
    pub max_samples: u32,
}

/// Main rendering backend trait
///
/// Creation calls return errors; the device converts them into boolean
/// results at its lifecycle entry points. Destroy calls never fail.
pub trait GraphicsBackend {
    /// Short backend name for logging
    fn name(&self) -> &'static str;

    /// Optional features of this backend
    fn capabilities(&self) -> BackendCapabilities;

    /// (Re)create the color, hit and depth targets
    ///
    /// Returns the sample count actually used.
    fn resize_scene_targets(&mut self, width: u32, height: u32, multisample: u32) -> BackendResult<u32>;

    /// Release the scene targets
    fn release_scene_targets(&mut self);

    /// Allocate the shared scene vertex and index buffers
    fn create_scene_buffers(&mut self, vertex_capacity: u32, index_capacity: u32) -> BackendResult<()>;

    /// Release the shared scene buffers
    fn release_scene_buffers(&mut self);

    /// Copy newly written geometry into the scene buffers
    fn write_scene_geometry(
        &mut self,
        first_vertex: u32,
        vertices: &[SceneVertex],
        first_index: u32,
        indices: &[u32],
    ) -> BackendResult<()>;

    /// Block until the GPU no longer reads the current buffer generation
    fn finish_generation(&mut self) -> BackendResult<()>;

    /// Build a pipeline
    fn create_pipeline(&mut self, desc: &PipelineDesc) -> BackendResult<PipelineHandle>;

    /// Destroy a pipeline
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDesc) -> BackendResult<SamplerHandle>;

    /// Destroy a sampler
    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    /// Create and upload a texture
    fn create_texture(&mut self, upload: &TextureUpload) -> BackendResult<TextureHandle>;

    /// Re-upload every mip of an existing texture, keeping its handle
    fn update_texture(&mut self, texture: TextureHandle, upload: &TextureUpload) -> BackendResult<()>;

    /// Re-upload a rectangle of the top mip
    ///
    /// `upload` holds only the rectangle's texels as its single mip.
    fn update_texture_rect(
        &mut self,
        texture: TextureHandle,
        upload: &TextureUpload,
        rect: TextureRect,
    ) -> BackendResult<()>;

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Create a pool for `max_sets` four-texture descriptor sets
    fn create_descriptor_pool(&mut self, max_sets: u32) -> BackendResult<DescriptorPoolHandle>;

    /// Destroy a pool and every set allocated from it
    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle);

    /// Allocate a set from `pool` and write its four bindings
    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        bindings: &[TextureBinding; 4],
    ) -> BackendResult<DescriptorSetHandle>;

    /// Create the global bindless texture array
    fn create_bindless_set(&mut self, capacity: u32) -> BackendResult<DescriptorSetHandle>;

    /// Write one slot of the bindless texture array
    fn write_bindless_slot(
        &mut self,
        set: DescriptorSetHandle,
        slot: u32,
        binding: TextureBinding,
    ) -> BackendResult<()>;

    /// Destroy the bindless texture array
    fn destroy_bindless_set(&mut self, set: DescriptorSetHandle);

    /// Start a frame by clearing color, hit and depth targets
    fn begin_frame(&mut self, clear_color: [f32; 4]) -> BackendResult<()>;

    /// Set the viewport for subsequent draws
    fn set_viewport(&mut self, viewport: Viewport) -> BackendResult<()>;

    /// Reset the depth target to the far plane
    fn clear_depth(&mut self) -> BackendResult<()>;

    /// Issue draws in order with the given constants
    fn draw(&mut self, constants: &ScenePushConstants, draws: &[DrawCommand]) -> BackendResult<()>;

    /// Finish the frame, optionally presenting it
    fn end_frame(&mut self, present: bool, vsync: bool) -> BackendResult<()>;

    /// Read back hit target values inside `region`, row by row
    fn read_hit_region(&mut self, region: HitRegion) -> BackendResult<Vec<u32>>;

    /// Read back the whole color target as RGBA8, top row first
    ///
    /// Waits for every submitted draw.
    fn read_pixels(&mut self) -> BackendResult<Vec<u8>>;

    /// Wait for the device to be idle
    fn wait_idle(&mut self) -> BackendResult<()>;
}
