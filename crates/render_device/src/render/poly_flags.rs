//! PolyFlags and pipeline classification
//!
//! Every primitive the engine submits carries a legacy 32-bit `PolyFlags`
//! bitmask. The render device never interprets the mask directly when
//! drawing; instead the mask is normalized by the engine's precedence rules
//! and folded into a small [`PipelineIndex`] that selects one of 32
//! precompiled scene pipelines.
//!
//! ## Classification
//!
//! ```text
//! adjusted = precedence(flags)
//! base     = Translucent ? 0 : Modulated ? 1 : Highlighted ? 2 : 3
//! index    = base | Invisible<<2 | Occlude<<3 | Masked<<4
//! ```
//!
//! Lines and points use their own tiny pipeline sets ([`PipelineKey`]).

use bitflags::bitflags;

bitflags! {
    /// Per-primitive render flags as defined by the host engine
    ///
    /// Only the bits the render device reacts to are named. Unknown bits are
    /// retained and ignored by classification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PolyFlags: u32 {
        /// Rasterized for depth but never writes color
        const INVISIBLE = 0x0000_0001;
        /// Alpha-tested: palette index 0 is transparent
        const MASKED = 0x0000_0002;
        /// Additive translucency
        const TRANSLUCENT = 0x0000_0004;
        /// Environment mapped (UVs derived from the view reflection)
        const ENVIRONMENT = 0x0000_0010;
        /// Multiplicative blend with the framebuffer
        const MODULATED = 0x0000_0040;
        /// Visible from both sides
        const TWO_SIDED = 0x0000_0100;
        /// Point sampled instead of filtered
        const NO_SMOOTH = 0x0000_0800;
        /// Selected in the editor
        const SELECTED = 0x0200_0000;
        /// Standard alpha blending
        const HIGHLIGHTED = 0x1000_0000;
        /// Editor flat shading (shares its bit with `RENDER_FOG`)
        const FLAT_SHADED = 0x4000_0000;
        /// Volumetric fog is applied to the primitive
        const RENDER_FOG = 0x4000_0000;
        /// Writes depth
        const OCCLUDE = 0x8000_0000;
    }
}

impl PolyFlags {
    /// Build flags from a raw engine mask, keeping unknown bits
    pub const fn from_raw(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }

    /// Apply the engine's precedence rules
    ///
    /// Primitives that are neither translucent nor modulated always occlude;
    /// translucent primitives are never alpha tested. The result is a fixed
    /// point: adjusting twice yields the same flags.
    #[must_use]
    pub fn adjusted(self) -> Self {
        let mut flags = self;
        if !flags.intersects(Self::TRANSLUCENT | Self::MODULATED) {
            flags.insert(Self::OCCLUDE);
        } else if flags.contains(Self::TRANSLUCENT) {
            flags.remove(Self::MASKED);
        }
        flags
    }

    /// Sampler mode bits for the base texture (NoSmooth = 1, clamp = 2)
    pub fn sampler_mode(self, clamp: bool) -> u32 {
        let mut mode = 0;
        if self.contains(Self::NO_SMOOTH) {
            mode |= 1;
        }
        if clamp {
            mode |= 2;
        }
        mode
    }
}

/// Blend family selected by the low two bits of a pipeline index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFamily {
    /// Additive-over-background translucency
    Translucent,
    /// Multiplicative blend
    Modulated,
    /// Standard alpha blend
    Highlighted,
    /// Opaque
    Opaque,
}

/// Index of a scene pipeline, always in `0..32`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineIndex(u8);

impl PipelineIndex {
    /// Number of scene pipelines
    pub const COUNT: usize = 32;

    const INVISIBLE_BIT: u8 = 4;
    const OCCLUDE_BIT: u8 = 8;
    const MASKED_BIT: u8 = 16;

    /// Classify a PolyFlags mask into its scene pipeline
    pub fn classify(flags: PolyFlags) -> Self {
        let flags = flags.adjusted();

        let mut index = if flags.contains(PolyFlags::TRANSLUCENT) {
            0
        } else if flags.contains(PolyFlags::MODULATED) {
            1
        } else if flags.contains(PolyFlags::HIGHLIGHTED) {
            2
        } else {
            3
        };

        if flags.contains(PolyFlags::INVISIBLE) {
            index |= Self::INVISIBLE_BIT;
        }
        if flags.contains(PolyFlags::OCCLUDE) {
            index |= Self::OCCLUDE_BIT;
        }
        if flags.contains(PolyFlags::MASKED) {
            index |= Self::MASKED_BIT;
        }

        Self(index)
    }

    /// Build an index from its raw value
    ///
    /// # Panics
    /// Panics when `raw` is not below [`PipelineIndex::COUNT`].
    pub fn from_raw(raw: usize) -> Self {
        assert!(raw < Self::COUNT, "pipeline index {raw} out of range");
        Self(raw as u8)
    }

    /// Iterate every scene pipeline index in ascending order
    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT as u8).map(Self)
    }

    /// Raw value usable as an array index
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }

    /// Blend family encoded in the low two bits
    pub fn blend_family(self) -> BlendFamily {
        match self.0 & 3 {
            0 => BlendFamily::Translucent,
            1 => BlendFamily::Modulated,
            2 => BlendFamily::Highlighted,
            _ => BlendFamily::Opaque,
        }
    }

    /// Color writes are disabled
    pub fn is_invisible(self) -> bool {
        self.0 & Self::INVISIBLE_BIT != 0
    }

    /// Depth writes are enabled
    pub fn is_occluding(self) -> bool {
        self.0 & Self::OCCLUDE_BIT != 0
    }

    /// Fragment shader performs the alpha test
    pub fn is_masked(self) -> bool {
        self.0 & Self::MASKED_BIT != 0
    }
}

/// Identity of any pipeline the device can bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKey {
    /// One of the 32 triangle pipelines
    Scene(PipelineIndex),
    /// Line pipeline; the flag is the depth-test enable
    Line {
        /// Lines are depth tested against the scene
        depth_test: bool,
    },
    /// The single point pipeline
    Point,
}

impl PipelineKey {
    /// Scene pipeline for a PolyFlags mask
    pub fn for_flags(flags: PolyFlags) -> Self {
        Self::Scene(PipelineIndex::classify(flags))
    }

    /// Line pipeline selected by the "occlude lines" setting
    pub fn line(occlude_lines: bool) -> Self {
        Self::Line { depth_test: occlude_lines }
    }

    /// Line pipeline slot, 0 or 1
    pub fn line_slot(depth_test: bool) -> usize {
        usize::from(depth_test)
    }
}
