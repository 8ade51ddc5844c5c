//! Scene sampler table
//!
//! Sixteen samplers indexed by a 4-bit mode:
//!
//! ```text
//! bit 0     point filtering (otherwise anisotropic x8)
//! bit 1     mirror-once addressing (otherwise wrap)
//! bits 2-3  dummy mip count: raises the minimum LOD and the LOD bias
//! ```
//!
//! The table is rebuilt whenever the configured LOD bias changes.

use crate::render::api::{GraphicsBackend, SamplerHandle};
use crate::render::RenderError;

/// Number of scene sampler modes
pub const SAMPLER_MODE_COUNT: usize = 16;

/// Anisotropy used by filtered samplers
pub const MAX_ANISOTROPY: f32 = 8.0;

/// Texel filtering
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplerFilter {
    /// Nearest texel, nearest mip
    Point,
    /// Linear filtering with anisotropy
    Anisotropic(f32),
}

/// Texture coordinate addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// Repeat
    Wrap,
    /// Mirror once, then clamp
    MirrorOnce,
}

/// Backend-neutral sampler description
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    /// Filtering
    pub filter: SamplerFilter,
    /// Addressing for U, V and W
    pub address: AddressMode,
    /// Lowest mip level that may be sampled
    pub min_lod: f32,
    /// Bias added to the computed mip level
    pub lod_bias: f32,
}

impl SamplerDesc {
    /// Description for a sampler mode
    pub fn for_mode(mode: usize, lod_bias: f32) -> Self {
        let dummy_mips = ((mode >> 2) & 3) as f32;
        Self {
            filter: if mode & 1 != 0 {
                SamplerFilter::Point
            } else {
                SamplerFilter::Anisotropic(MAX_ANISOTROPY)
            },
            address: if mode & 2 != 0 {
                AddressMode::MirrorOnce
            } else {
                AddressMode::Wrap
            },
            min_lod: dummy_mips,
            lod_bias: lod_bias + dummy_mips,
        }
    }
}

/// The sixteen scene samplers
#[derive(Debug)]
pub struct SceneSamplers {
    handles: Vec<SamplerHandle>,
    lod_bias: f32,
}

impl SceneSamplers {
    /// Create all samplers with the given LOD bias
    pub fn create<B: GraphicsBackend>(backend: &mut B, lod_bias: f32) -> Result<Self, RenderError> {
        let mut handles = Vec::with_capacity(SAMPLER_MODE_COUNT);
        for mode in 0..SAMPLER_MODE_COUNT {
            match backend.create_sampler(&SamplerDesc::for_mode(mode, lod_bias)) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    log::error!("[SAMPLER] Failed to create sampler {mode}: {e}");
                    for handle in handles {
                        backend.destroy_sampler(handle);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self { handles, lod_bias })
    }

    /// Sampler for a mode (only the low four bits are used)
    pub fn get(&self, mode: u32) -> SamplerHandle {
        self.handles[mode as usize & (SAMPLER_MODE_COUNT - 1)]
    }

    /// LOD bias the samplers were created with
    pub fn lod_bias(&self) -> f32 {
        self.lod_bias
    }

    /// Recreate the samplers if the bias changed
    ///
    /// Returns `true` when the table was rebuilt; descriptor sets that
    /// reference the old samplers must then be discarded.
    pub fn update_lod_bias<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        lod_bias: f32,
    ) -> Result<bool, RenderError> {
        if (lod_bias - self.lod_bias).abs() <= f32::EPSILON {
            return Ok(false);
        }

        let replacement = Self::create(backend, lod_bias)?;
        let old = std::mem::replace(self, replacement);
        old.release(backend);
        log::debug!("[SAMPLER] LOD bias changed to {lod_bias}");
        Ok(true)
    }

    /// Destroy every sampler
    pub fn release<B: GraphicsBackend>(self, backend: &mut B) {
        for handle in self.handles {
            backend.destroy_sampler(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::HeadlessBackend;
    use approx::assert_relative_eq;

    #[test]
    fn test_mode_bits() {
        let base = SamplerDesc::for_mode(0, -0.5);
        assert_eq!(base.filter, SamplerFilter::Anisotropic(MAX_ANISOTROPY));
        assert_eq!(base.address, AddressMode::Wrap);
        assert_relative_eq!(base.min_lod, 0.0);
        assert_relative_eq!(base.lod_bias, -0.5);

        let clamped_point = SamplerDesc::for_mode(3, 0.0);
        assert_eq!(clamped_point.filter, SamplerFilter::Point);
        assert_eq!(clamped_point.address, AddressMode::MirrorOnce);

        let dummy = SamplerDesc::for_mode(0b1000, -0.5);
        assert_relative_eq!(dummy.min_lod, 2.0);
        assert_relative_eq!(dummy.lod_bias, 1.5);
    }

    #[test]
    fn test_lod_bias_change_rebuilds() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut samplers = SceneSamplers::create(&mut backend, 0.0).unwrap();
        assert_eq!(backend.live_samplers(), SAMPLER_MODE_COUNT);

        let before = samplers.get(1);
        assert!(!samplers.update_lod_bias(&mut backend, 0.0).unwrap());
        assert!(samplers.update_lod_bias(&mut backend, -1.0).unwrap());
        assert_ne!(samplers.get(1), before);
        assert_eq!(backend.live_samplers(), SAMPLER_MODE_COUNT);
        assert_relative_eq!(samplers.lod_bias(), -1.0);

        samplers.release(&mut backend);
        assert_eq!(backend.live_samplers(), 0);
    }
}
