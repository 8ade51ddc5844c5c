//! Vulkan resource management: buffers, textures, samplers and descriptors

pub mod buffer;
pub mod descriptor_set;
pub mod sampler;
pub mod texture;

pub use buffer::Buffer;
pub use descriptor_set::{DescriptorPool, DescriptorSetLayout, SampledImage};
pub use sampler::VulkanSampler;
pub use texture::VulkanTexture;
