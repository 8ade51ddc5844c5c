//! Render device and Vulkan backend settings

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};

/// Default number of vertices in the shared scene vertex buffer
pub const DEFAULT_SCENE_VERTEX_BUFFER_SIZE: u32 = 1_000_000;

/// Default number of indices in the shared scene index buffer
pub const DEFAULT_SCENE_INDEX_BUFFER_SIZE: u32 = DEFAULT_SCENE_VERTEX_BUFFER_SIZE * 3;

/// Default number of descriptor sets per descriptor pool
pub const DEFAULT_DESCRIPTOR_POOL_SIZE: u32 = 1000;

/// Multisample antialiasing setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AntialiasMode {
    /// No multisampling
    #[default]
    Off,
    /// Two samples per pixel
    Msaa2x,
    /// Four samples per pixel
    Msaa4x,
}

impl AntialiasMode {
    /// Requested sample count (0 means multisampling is disabled)
    pub fn multisample(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::Msaa2x => 2,
            Self::Msaa4x => 4,
        }
    }
}

/// How lighting is combined in the scene shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LightMode {
    /// Standard 2x lightmap blending
    #[default]
    Normal,
    /// Lightmaps blended at 1x
    OneXBlending,
    /// Opaque Gouraud meshes are brightened
    BrighterActors,
}

/// Texture binding strategy used by the descriptor set cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BindingMode {
    /// One descriptor set per texture combination, bound per batch
    #[default]
    PerDrawSets,
    /// One global texture array; per-vertex indices select the textures
    Bindless,
}

/// # Render Device Configuration
///
/// User-facing settings of the render device. Every field has a default so a
/// partial TOML or RON file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDeviceConfig {
    /// Present with vertical sync
    pub use_vsync: bool,
    /// Request a texture precache pass after a flush
    pub use_precache: bool,
    /// Depth test lines against scene geometry
    pub occlude_lines: bool,
    /// Mip LOD bias applied to every scene sampler
    pub lod_bias: f32,
    /// Multisample antialiasing
    pub antialias_mode: AntialiasMode,
    /// Lighting combine mode
    pub light_mode: LightMode,
    /// Draw detail textures on complex surfaces
    pub detail_textures: bool,
    /// Host engine is running its editor
    pub editor_mode: bool,
    /// Texture binding strategy
    pub binding_mode: BindingMode,
    /// Capacity of the scene vertex buffer, in vertices
    pub scene_vertex_buffer_size: u32,
    /// Capacity of the scene index buffer, in indices
    pub scene_index_buffer_size: u32,
    /// Descriptor sets per descriptor pool
    pub descriptor_pool_size: u32,
}

impl RenderDeviceConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self {
            use_vsync: true,
            use_precache: true,
            occlude_lines: false,
            lod_bias: -0.5,
            antialias_mode: AntialiasMode::Off,
            light_mode: LightMode::Normal,
            detail_textures: true,
            editor_mode: false,
            binding_mode: BindingMode::PerDrawSets,
            scene_vertex_buffer_size: DEFAULT_SCENE_VERTEX_BUFFER_SIZE,
            scene_index_buffer_size: DEFAULT_SCENE_INDEX_BUFFER_SIZE,
            descriptor_pool_size: DEFAULT_DESCRIPTOR_POOL_SIZE,
        }
    }

    /// Enable or disable vertical sync
    pub fn with_vsync(mut self, enabled: bool) -> Self {
        self.use_vsync = enabled;
        self
    }

    /// Enable or disable precaching after flushes
    pub fn with_precache(mut self, enabled: bool) -> Self {
        self.use_precache = enabled;
        self
    }

    /// Enable or disable depth testing of lines
    pub fn with_occlude_lines(mut self, enabled: bool) -> Self {
        self.occlude_lines = enabled;
        self
    }

    /// Set the sampler LOD bias
    pub fn with_lod_bias(mut self, bias: f32) -> Self {
        self.lod_bias = bias;
        self
    }

    /// Set the antialiasing mode
    pub fn with_antialias_mode(mut self, mode: AntialiasMode) -> Self {
        self.antialias_mode = mode;
        self
    }

    /// Set the light mode
    pub fn with_light_mode(mut self, mode: LightMode) -> Self {
        self.light_mode = mode;
        self
    }

    /// Enable or disable detail textures
    pub fn with_detail_textures(mut self, enabled: bool) -> Self {
        self.detail_textures = enabled;
        self
    }

    /// Mark the host engine as running its editor
    pub fn with_editor_mode(mut self, enabled: bool) -> Self {
        self.editor_mode = enabled;
        self
    }

    /// Select the texture binding strategy
    pub fn with_binding_mode(mut self, mode: BindingMode) -> Self {
        self.binding_mode = mode;
        self
    }

    /// Set scene buffer capacities
    pub fn with_scene_buffer_sizes(mut self, vertices: u32, indices: u32) -> Self {
        self.scene_vertex_buffer_size = vertices;
        self.scene_index_buffer_size = indices;
        self
    }

    /// Set the number of descriptor sets per pool
    pub fn with_descriptor_pool_size(mut self, sets: u32) -> Self {
        self.descriptor_pool_size = sets;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.scene_vertex_buffer_size < 4 {
            return Err("Scene vertex buffer must hold at least 4 vertices".to_string());
        }

        if self.scene_index_buffer_size < 6 {
            return Err("Scene index buffer must hold at least 6 indices".to_string());
        }

        if self.descriptor_pool_size == 0 {
            return Err("Descriptor pool size must be at least 1".to_string());
        }

        if !self.lod_bias.is_finite() {
            return Err("LOD bias must be a finite number".to_string());
        }

        Ok(())
    }

    /// Load a configuration file and validate it
    pub fn load_validated(path: &str) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}

impl Default for RenderDeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Config for RenderDeviceConfig {}

/// # Vulkan Backend Configuration
///
/// Instance metadata and the SPIR-V files for the scene pass. Compiling the
/// shaders is left to the build tooling; this only names the outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulkanBackendConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Whether to enable Vulkan validation layers
    pub enable_validation: bool,
    /// Scene vertex shader SPIR-V path
    pub scene_vertex_shader: String,
    /// Scene fragment shader SPIR-V path
    pub scene_fragment_shader: String,
    /// Alpha-tested scene fragment shader SPIR-V path
    pub scene_alpha_test_shader: String,
    /// Bindless scene fragment shader SPIR-V path
    pub scene_bindless_fragment_shader: String,
    /// Bindless alpha-tested scene fragment shader SPIR-V path
    pub scene_bindless_alpha_test_shader: String,
}

impl VulkanBackendConfig {
    /// Create a new backend configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            enable_validation: cfg!(debug_assertions),
            scene_vertex_shader: "shaders/scene.vert.spv".to_string(),
            scene_fragment_shader: "shaders/scene.frag.spv".to_string(),
            scene_alpha_test_shader: "shaders/scene_alphatest.frag.spv".to_string(),
            scene_bindless_fragment_shader: "shaders/scene_bindless.frag.spv".to_string(),
            scene_bindless_alpha_test_shader: "shaders/scene_bindless_alphatest.frag.spv".to_string(),
        }
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = enabled;
        self
    }

    /// Set the shader directory; file names keep their defaults
    pub fn with_shader_dir(mut self, dir: &str) -> Self {
        let dir = dir.trim_end_matches('/');
        self.scene_vertex_shader = format!("{dir}/scene.vert.spv");
        self.scene_fragment_shader = format!("{dir}/scene.frag.spv");
        self.scene_alpha_test_shader = format!("{dir}/scene_alphatest.frag.spv");
        self.scene_bindless_fragment_shader = format!("{dir}/scene_bindless.frag.spv");
        self.scene_bindless_alpha_test_shader = format!("{dir}/scene_bindless_alphatest.frag.spv");
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }
        for path in [
            &self.scene_vertex_shader,
            &self.scene_fragment_shader,
            &self.scene_alpha_test_shader,
        ] {
            if !std::path::Path::new(path).exists() {
                return Err(format!("Shader not found: {path}"));
            }
        }
        Ok(())
    }
}

impl Default for VulkanBackendConfig {
    fn default() -> Self {
        Self::new("Render Device")
    }
}

impl Config for VulkanBackendConfig {}
