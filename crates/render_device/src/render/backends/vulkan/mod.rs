//! Vulkan backend implementation
//!
//! Offscreen `ash` backend for the render device. It renders the scene pass
//! into color, hit and depth targets without a window; presentation belongs
//! to the host.

/// Vulkan instance and device setup
pub mod initialization;

/// Vulkan resource management (buffers, textures, samplers, descriptors)
pub mod resources;

/// Scene pass rendering (targets, render passes, shaders, pipelines)
pub mod rendering;

/// Submission and synchronization state
pub mod state;

/// The [`GraphicsBackend`](crate::render::api::GraphicsBackend) implementation
pub mod backend;

pub use backend::VulkanBackend;

pub use initialization::context::{DeviceFeatures, PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanResult};

pub use resources::buffer::Buffer;
pub use resources::descriptor_set::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, SampledImage};
pub use resources::sampler::VulkanSampler;
pub use resources::texture::VulkanTexture;

pub use rendering::scene_targets::{RenderPass, SceneTargets};
pub use rendering::shader::{GraphicsPipeline, PipelineLayout, SceneShaders, ShaderModule};
pub use rendering::vertex_layout::SceneVertexLayout;

pub use state::sync::{CommandContext, Fence};
