//! Backend abstraction layer
//!
//! The render device drives every graphics API through the
//! [`GraphicsBackend`] trait. Classification, caching and batching live above
//! this line and are written once; each backend only translates the
//! resulting resource and draw requests.

pub mod render_backend;

pub use render_backend::{
    BackendCapabilities, BackendResult, DescriptorPoolHandle, DescriptorSetHandle, DrawCommand,
    GraphicsBackend, HitRegion, PipelineHandle, SamplerHandle, ScenePushConstants, TextureBinding,
    TextureHandle, TextureRect, Viewport,
};
