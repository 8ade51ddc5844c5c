//! Render error types

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the render device and its backends
#[derive(Error, Debug)]
pub enum RenderError {
    /// Backend failed to create or update a GPU resource
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Device or backend initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// A handle was used after its resource was released
    #[error("Invalid handle: {kind} {id}")]
    InvalidHandle {
        /// Kind of resource the handle refers to
        kind: &'static str,
        /// Raw handle value
        id: u64,
    },

    /// Texture data could not be converted for upload
    #[error("Unsupported texture: {0}")]
    UnsupportedTexture(String),

    /// Operation requires an initialized device
    #[error("Render device is not initialized")]
    NotInitialized,

    /// Configuration could not be loaded or validated
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
