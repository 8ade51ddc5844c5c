//! Submission and synchronization state

pub mod sync;

pub use sync::{CommandContext, Fence};
