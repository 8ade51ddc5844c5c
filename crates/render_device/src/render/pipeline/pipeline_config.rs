//! Pipeline configuration and type definitions
//!
//! Backend-neutral description of every pipeline the device builds. A
//! backend turns a [`PipelineDesc`] into its native pipeline object; the
//! description itself is a pure function of the pipeline key.

use crate::render::poly_flags::{BlendFamily, PipelineIndex, PipelineKey};

/// Blend factors used by the scene pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    /// 0
    Zero,
    /// 1
    One,
    /// Source color
    SrcColor,
    /// 1 - source color
    OneMinusSrcColor,
    /// Source alpha
    SrcAlpha,
    /// 1 - source alpha
    OneMinusSrcAlpha,
    /// Destination color
    DstColor,
    /// Destination alpha
    DstAlpha,
}

/// Color attachment blend state (blend op is always ADD)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    /// Source color factor
    pub src_color: BlendFactor,
    /// Destination color factor
    pub dst_color: BlendFactor,
    /// Source alpha factor
    pub src_alpha: BlendFactor,
    /// Destination alpha factor
    pub dst_alpha: BlendFactor,
}

impl BlendState {
    /// Blend state for a scene blend family
    pub fn for_family(family: BlendFamily) -> Self {
        match family {
            BlendFamily::Translucent => Self {
                src_color: BlendFactor::One,
                dst_color: BlendFactor::OneMinusSrcColor,
                src_alpha: BlendFactor::One,
                dst_alpha: BlendFactor::OneMinusSrcAlpha,
            },
            BlendFamily::Modulated => Self {
                src_color: BlendFactor::DstColor,
                dst_color: BlendFactor::SrcColor,
                src_alpha: BlendFactor::DstAlpha,
                dst_alpha: BlendFactor::SrcAlpha,
            },
            BlendFamily::Highlighted => Self::alpha(),
            BlendFamily::Opaque => Self {
                src_color: BlendFactor::One,
                dst_color: BlendFactor::Zero,
                src_alpha: BlendFactor::One,
                dst_alpha: BlendFactor::Zero,
            },
        }
    }

    /// Premultiplied alpha blend used by highlights, lines and points
    pub fn alpha() -> Self {
        Self {
            src_color: BlendFactor::One,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::OneMinusSrcAlpha,
        }
    }
}

/// Depth test configuration; the compare op is always less-or-equal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    /// Depth testing enabled
    pub test: bool,
    /// Depth writes enabled
    pub write: bool,
}

/// Primitive assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    /// Indexed triangle list
    TriangleList,
    /// Indexed line list
    LineList,
}

/// Fragment shader flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentShaderVariant {
    /// Regular textured shading
    Standard,
    /// Discards texels below the alpha threshold
    AlphaTest,
}

/// Configuration for a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineDesc {
    /// Which pipeline this describes
    pub key: PipelineKey,
    /// Color blend for the scene color target
    pub blend: BlendState,
    /// Color writes enabled (the hit target is always written)
    pub color_write: bool,
    /// Depth configuration
    pub depth: DepthState,
    /// Primitive topology
    pub topology: PrimitiveTopology,
    /// Fragment shader flavor
    pub fragment: FragmentShaderVariant,
    /// Rasterization samples
    pub samples: u32,
    /// Textures come from the global bindless array
    pub bindless: bool,
}

impl PipelineDesc {
    /// Description of a scene pipeline
    pub fn scene(index: PipelineIndex, samples: u32) -> Self {
        Self {
            key: PipelineKey::Scene(index),
            blend: BlendState::for_family(index.blend_family()),
            color_write: !index.is_invisible(),
            depth: DepthState {
                test: true,
                write: index.is_occluding(),
            },
            topology: PrimitiveTopology::TriangleList,
            fragment: if index.is_masked() {
                FragmentShaderVariant::AlphaTest
            } else {
                FragmentShaderVariant::Standard
            },
            samples,
            bindless: false,
        }
    }

    /// Description of a line pipeline
    pub fn line(depth_test: bool, samples: u32) -> Self {
        Self {
            key: PipelineKey::Line { depth_test },
            blend: BlendState::alpha(),
            color_write: true,
            depth: DepthState {
                test: depth_test,
                write: false,
            },
            topology: PrimitiveTopology::LineList,
            fragment: FragmentShaderVariant::Standard,
            samples,
            bindless: false,
        }
    }

    /// Description of the point pipeline (points are drawn as quads)
    pub fn point(samples: u32) -> Self {
        Self {
            key: PipelineKey::Point,
            blend: BlendState::alpha(),
            color_write: true,
            depth: DepthState {
                test: false,
                write: false,
            },
            topology: PrimitiveTopology::TriangleList,
            fragment: FragmentShaderVariant::Standard,
            samples,
            bindless: false,
        }
    }

    /// Use the bindless pipeline layout and fragment shaders
    pub fn with_bindless(mut self, bindless: bool) -> Self {
        self.bindless = bindless;
        self
    }

    /// Description for any pipeline key
    pub fn for_key(key: PipelineKey, samples: u32) -> Self {
        match key {
            PipelineKey::Scene(index) => Self::scene(index, samples),
            PipelineKey::Line { depth_test } => Self::line(depth_test, samples),
            PipelineKey::Point => Self::point(samples),
        }
    }
}
