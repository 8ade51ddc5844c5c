//! # Draw Batching
//!
//! Consecutive primitives that share a pipeline and descriptor set are
//! drawn with one indexed draw call. The [`DrawBatchAccumulator`] watches for
//! state changes, closes batches at each change, and issues the queued
//! batches in submission order when flushed.

pub mod batch_accumulator;

pub use batch_accumulator::{BatchStats, DrawBatch, DrawBatchAccumulator};
