//! # Render Device
//!
//! A render device for a 1990s-era engine: immediate-mode surface, polygon,
//! tile, line and point calls plus a legacy `PolyFlags` bitmask go in,
//! batched GPU draws come out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_device::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     render_device::foundation::logging::init();
//!
//!     let backend = VulkanBackend::new(&VulkanBackendConfig::new("viewer"))?;
//!     let mut device = RenderDevice::new(backend, RenderDeviceConfig::default());
//!     if !device.init(800, 600) {
//!         return Err("render device initialization failed".into());
//!     }
//!
//!     // lock, set_scene_node, draw_*, unlock ...
//!
//!     device.exit();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for render device users
pub mod prelude {
    pub use crate::{
        config::{AntialiasMode, BindingMode, Config, LightMode, RenderDeviceConfig, VulkanBackendConfig},
        foundation::math::{Mat4, Vec2, Vec3, Vec4},
        render::{
            api::GraphicsBackend,
            backends::{HeadlessBackend, VulkanBackend},
            device::{DeviceStats, RenderDevice},
            poly_flags::PolyFlags,
            scene::{LockParams, SceneNode, SurfaceFacet, SurfaceInfo, TextureFormat, TextureInfo, Tile},
            RenderError,
        },
    };
}
