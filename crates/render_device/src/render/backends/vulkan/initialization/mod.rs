//! Vulkan instance and device setup

pub mod context;

pub use context::{DeviceFeatures, VulkanContext, VulkanError, VulkanResult};
