//! Batch state machine
//!
//! ```text
//! Empty --set state--> Open --state change--> (close) Open
//!                        |
//!                      flush: close, draw queue FIFO, clear queue
//! ```
//!
//! A batch covers a contiguous index range and exactly one
//! (pipeline, descriptor set) pair. Primitive type never matters; only state
//! changes close a batch.

use crate::render::api::{
    DescriptorSetHandle, DrawCommand, GraphicsBackend, PipelineHandle, ScenePushConstants,
};
use crate::render::resources::scene_buffers::SceneVertexIndexBuffer;
use crate::render::RenderError;

/// A closed batch waiting to be drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawBatch {
    /// Pipeline for the whole range
    pub pipeline: PipelineHandle,
    /// Descriptor set for the whole range
    pub descriptor_set: DescriptorSetHandle,
    /// First index
    pub index_start: u32,
    /// One past the last index
    pub index_end: u32,
}

impl DrawBatch {
    /// Number of indices
    pub fn index_count(&self) -> u32 {
        self.index_end - self.index_start
    }

    fn to_command(self) -> DrawCommand {
        DrawCommand {
            pipeline: self.pipeline,
            descriptor_set: self.descriptor_set,
            first_index: self.index_start,
            index_count: self.index_count(),
        }
    }
}

/// Counters maintained by the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    /// Draw calls issued
    pub draw_calls: u32,
    /// Batches closed
    pub batches: u32,
    /// Buffer generations in use (starts at 1)
    pub buffers_used: u32,
}

impl Default for BatchStats {
    fn default() -> Self {
        Self {
            draw_calls: 0,
            batches: 0,
            buffers_used: 1,
        }
    }
}

#[derive(Debug, Default)]
struct OpenBatch {
    pipeline: Option<PipelineHandle>,
    descriptor_set: Option<DescriptorSetHandle>,
    index_start: u32,
}

/// Accumulates primitives into batches over the shared scene buffers
#[derive(Debug)]
pub struct DrawBatchAccumulator {
    buffers: SceneVertexIndexBuffer,
    open: OpenBatch,
    queued: Vec<DrawBatch>,
    stats: BatchStats,
}

impl DrawBatchAccumulator {
    /// Accumulator over buffers of the given capacities
    pub fn new(vertex_capacity: u32, index_capacity: u32) -> Self {
        Self {
            buffers: SceneVertexIndexBuffer::new(vertex_capacity, index_capacity),
            open: OpenBatch::default(),
            queued: Vec::new(),
            stats: BatchStats::default(),
        }
    }

    /// The shared scene buffers
    pub fn buffers(&self) -> &SceneVertexIndexBuffer {
        &self.buffers
    }

    /// Mutable access for writing primitives
    pub fn buffers_mut(&mut self) -> &mut SceneVertexIndexBuffer {
        &mut self.buffers
    }

    /// Pipeline of the open batch
    pub fn pipeline(&self) -> Option<PipelineHandle> {
        self.open.pipeline
    }

    /// Descriptor set of the open batch
    pub fn descriptor_set(&self) -> Option<DescriptorSetHandle> {
        self.open.descriptor_set
    }

    /// Batches closed but not yet drawn
    pub fn queued(&self) -> &[DrawBatch] {
        &self.queued
    }

    /// Switch pipeline, closing the open batch when it changes
    pub fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        if self.open.pipeline != Some(pipeline) {
            self.add_draw_batch();
            self.open.pipeline = Some(pipeline);
        }
    }

    /// Switch descriptor set, closing the open batch when it changes
    pub fn set_descriptor_set(&mut self, set: DescriptorSetHandle) {
        if self.open.descriptor_set != Some(set) {
            self.add_draw_batch();
            self.open.descriptor_set = Some(set);
        }
    }

    /// Close the open batch if it covers any indices
    pub fn add_draw_batch(&mut self) {
        let end = self.buffers.index_pos();
        if self.open.index_start == end {
            return;
        }

        match (self.open.pipeline, self.open.descriptor_set) {
            (Some(pipeline), Some(descriptor_set)) => {
                self.queued.push(DrawBatch {
                    pipeline,
                    descriptor_set,
                    index_start: self.open.index_start,
                    index_end: end,
                });
                self.stats.batches += 1;
            }
            _ => log::warn!(
                "[BATCH] Dropping {} indices written without pipeline state",
                end - self.open.index_start
            ),
        }
        self.open.index_start = end;
    }

    /// Close the open batch and draw every queued batch in order
    ///
    /// With `next_generation` the GPU is waited on and both buffer cursors
    /// restart at zero. The queue is emptied even when the backend fails.
    pub fn flush<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        constants: &ScenePushConstants,
        next_generation: bool,
    ) -> Result<(), RenderError> {
        self.add_draw_batch();

        let result = self.submit(backend, constants);
        self.queued.clear();

        let result = result.and_then(|()| {
            if next_generation {
                backend.finish_generation()
            } else {
                Ok(())
            }
        });

        if next_generation {
            self.buffers.take_pending();
            self.buffers.next_generation();
            self.stats.buffers_used += 1;
        }
        self.open.index_start = self.buffers.index_pos();
        result
    }

    fn submit<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        constants: &ScenePushConstants,
    ) -> Result<(), RenderError> {
        let pending = self.buffers.take_pending();
        if !pending.is_empty() {
            backend.write_scene_geometry(
                pending.first_vertex,
                &pending.vertices,
                pending.first_index,
                &pending.indices,
            )?;
        }

        if self.queued.is_empty() {
            return Ok(());
        }
        let commands: Vec<DrawCommand> = self.queued.iter().map(|batch| batch.to_command()).collect();
        backend.draw(constants, &commands)?;
        self.stats.draw_calls += commands.len() as u32;
        Ok(())
    }

    /// Make room for a primitive
    ///
    /// Starts a new buffer generation when the current one is too full.
    /// Returns `false` when the primitive cannot fit even in an empty
    /// generation; the caller drops it.
    pub fn reserve<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        constants: &ScenePushConstants,
        vertex_count: u32,
        index_count: u32,
    ) -> bool {
        if self.buffers.fits(vertex_count, index_count) {
            return true;
        }
        if !self.buffers.fits_fresh(vertex_count, index_count) {
            log::debug!("[BATCH] Primitive with {vertex_count} vertices exceeds buffer capacity");
            return false;
        }

        if let Err(e) = self.flush(backend, constants, true) {
            log::warn!("[BATCH] Flush before buffer generation change failed: {e}");
        }
        self.buffers.fits(vertex_count, index_count)
    }

    /// Forget the open batch state and rewind the cursors at frame end
    ///
    /// Anything still queued is discarded.
    pub fn reset_frame(&mut self) {
        self.queued.clear();
        self.buffers.take_pending();
        self.buffers.next_generation();
        self.open = OpenBatch::default();
    }

    /// Counters since the last reset
    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Reset the counters (buffers used restarts at 1)
    pub fn reset_stats(&mut self) {
        self.stats = BatchStats::default();
    }
}
