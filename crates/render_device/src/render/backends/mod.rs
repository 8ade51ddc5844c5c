//! Graphics backend implementations

pub mod headless;
pub mod vulkan;

pub use headless::HeadlessBackend;
pub use vulkan::VulkanBackend;
