//! GPU resource caches and the shared scene buffers

pub mod descriptor_cache;
pub mod sampler;
pub mod scene_buffers;
pub mod texture_cache;

pub use descriptor_cache::{DescriptorSetCache, DescriptorSetKey, MAX_BINDLESS_TEXTURES};
pub use sampler::{SamplerDesc, SceneSamplers};
pub use scene_buffers::{SceneVertex, SceneVertexIndexBuffer};
pub use texture_cache::{TextureId, TextureResourceCache, TextureUpload};
