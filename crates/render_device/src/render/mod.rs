//! # Rendering System
//!
//! Render-state classification and draw batching for an immediate-mode
//! engine renderer.
//!
//! ## Architecture
//!
//! - **poly_flags**: maps a primitive's [`PolyFlags`] onto one of a fixed
//!   set of pipelines
//! - **pipeline**: backend-neutral pipeline descriptions and the prebuilt
//!   pipeline table
//! - **resources**: texture, sampler and descriptor set caches plus the
//!   shared scene vertex/index buffers
//! - **batching**: coalesces consecutive primitives with equal state into
//!   one indexed draw
//! - **hit_test**: nested hit queries resolved from the hit target
//! - **device**: the [`RenderDevice`] façade the engine calls
//! - **backends**: [`GraphicsBackend`] implementations (Vulkan, headless)

pub mod api;
pub mod backends;
pub mod batching;
pub mod device;
pub mod error;
pub mod hit_test;
pub mod pipeline;
pub mod poly_flags;
pub mod resources;
pub mod scene;

pub use api::{BackendCapabilities, GraphicsBackend};
pub use device::{DeviceStats, RenderDevice};
pub use error::RenderError;
pub use poly_flags::{PipelineIndex, PipelineKey, PolyFlags};
