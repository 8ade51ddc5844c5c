//! Fixed table of every pipeline the device can bind
//!
//! All 32 scene pipelines, both line pipelines and the point pipeline are
//! built once at initialization (and again after a sample count change), so
//! classification at draw time is an array lookup.

use crate::render::api::{GraphicsBackend, PipelineHandle};
use crate::render::poly_flags::{PipelineIndex, PipelineKey};
use crate::render::RenderError;

use super::PipelineDesc;

/// Handles of the prebuilt pipelines
#[derive(Debug)]
pub struct PipelineStateTable {
    scene: Vec<PipelineHandle>,
    lines: [PipelineHandle; 2],
    point: PipelineHandle,
    samples: u32,
    bindless: bool,
}

impl PipelineStateTable {
    /// Build every pipeline for the given sample count
    ///
    /// When any pipeline fails, the ones already created are destroyed
    /// before the error is returned.
    pub fn build<B: GraphicsBackend>(
        backend: &mut B,
        samples: u32,
        bindless: bool,
    ) -> Result<Self, RenderError> {
        let mut created = Vec::with_capacity(PipelineIndex::COUNT + 3);

        let keys = PipelineIndex::all()
            .map(PipelineKey::Scene)
            .chain([
                PipelineKey::Line { depth_test: false },
                PipelineKey::Line { depth_test: true },
                PipelineKey::Point,
            ]);

        for key in keys {
            let desc = PipelineDesc::for_key(key, samples).with_bindless(bindless);
            match backend.create_pipeline(&desc) {
                Ok(handle) => created.push(handle),
                Err(e) => {
                    log::error!("[PIPELINE] Failed to create {key:?} pipeline: {e}");
                    for handle in created {
                        backend.destroy_pipeline(handle);
                    }
                    return Err(e);
                }
            }
        }

        let point = created[PipelineIndex::COUNT + 2];
        let lines = [created[PipelineIndex::COUNT], created[PipelineIndex::COUNT + 1]];
        created.truncate(PipelineIndex::COUNT);

        log::debug!(
            "[PIPELINE] Built {} pipelines ({} samples, bindless: {bindless})",
            PipelineIndex::COUNT + 3,
            samples
        );

        Ok(Self {
            scene: created,
            lines,
            point,
            samples,
            bindless,
        })
    }

    /// Pipeline for a key
    pub fn get(&self, key: PipelineKey) -> PipelineHandle {
        match key {
            PipelineKey::Scene(index) => self.scene[index.as_usize()],
            PipelineKey::Line { depth_test } => self.lines[PipelineKey::line_slot(depth_test)],
            PipelineKey::Point => self.point,
        }
    }

    /// Sample count the pipelines were built for
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Pipelines use the bindless layout
    pub fn is_bindless(&self) -> bool {
        self.bindless
    }

    /// Destroy every pipeline
    pub fn release<B: GraphicsBackend>(self, backend: &mut B) {
        for handle in self
            .scene
            .into_iter()
            .chain(self.lines)
            .chain(std::iter::once(self.point))
        {
            backend.destroy_pipeline(handle);
        }
        log::debug!("[PIPELINE] Released pipeline table");
    }
}
