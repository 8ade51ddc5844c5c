//! Logging utilities and structured logging support
//!
//! Messages are tagged with their subsystem (`[PIPELINE]`, `[TEXTURE]`,
//! `[DESCRIPTOR]`, `[BATCH]`, `[HIT]`, `[DEVICE]`, `[VULKAN]`) so a single
//! `RUST_LOG` filter can follow one part of the frame.

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system from the `RUST_LOG` environment variable
pub fn init() {
    env_logger::init();
}

/// Initialize logging for tests, ignoring repeated initialization
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}
