//! Engine-facing input types
//!
//! These are the shapes the host engine hands to the render device for each
//! draw call: the current frame ([`SceneNode`]), texture descriptions, surface
//! and facet data for BSP surfaces, and transformed Gouraud vertices.

use crate::foundation::math::{Coords, Vec3, Vec4};
use crate::render::api::HitRegion;
use crate::render::poly_flags::PolyFlags;

/// Far plane of the scene projection
pub const SCENE_FAR_PLANE: f32 = 32768.0;

/// Near plane of the scene projection
pub const SCENE_NEAR_PLANE: f32 = 1.0;

/// The engine's view of one viewport
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    /// Viewport left edge in render target pixels
    pub x_base: i32,
    /// Viewport top edge in render target pixels
    pub y_base: i32,
    /// Viewport width
    pub width: u32,
    /// Viewport height
    pub height: u32,
    /// Viewport width as float
    pub fx: f32,
    /// Viewport height as float
    pub fy: f32,
    /// Half viewport width
    pub fx2: f32,
    /// Half viewport height
    pub fy2: f32,
    /// Horizontal field of view in degrees
    pub fov_angle: f32,
    /// User clip plane in camera space
    pub near_clip: Vec4,
    /// -1 when rendering a mirror, otherwise 1
    pub mirror: f32,
    /// World to camera
    pub coords: Coords,
    /// Camera to world
    pub uncoords: Coords,
    /// Orthographic editor viewport
    pub is_ortho: bool,
    /// Orthographic zoom factor
    pub zoom: f32,
}

impl SceneNode {
    /// Perspective frame covering a viewport at the origin
    pub fn new(width: u32, height: u32, fov_angle: f32) -> Self {
        let fx = width as f32;
        let fy = height as f32;
        Self {
            x_base: 0,
            y_base: 0,
            width,
            height,
            fx,
            fy,
            fx2: fx * 0.5,
            fy2: fy * 0.5,
            fov_angle,
            near_clip: Vec4::new(0.0, 0.0, 0.0, 1.0),
            mirror: 1.0,
            coords: Coords::identity(),
            uncoords: Coords::identity(),
            is_ortho: false,
            zoom: 1.0,
        }
    }

    /// Move the viewport origin
    pub fn with_origin(mut self, x_base: i32, y_base: i32) -> Self {
        self.x_base = x_base;
        self.y_base = y_base;
        self
    }

    /// Make this an orthographic editor frame
    pub fn with_ortho(mut self, zoom: f32) -> Self {
        self.is_ortho = true;
        self.zoom = zoom;
        self
    }

    /// Set the camera coordinate systems
    pub fn with_coords(mut self, coords: Coords, uncoords: Coords) -> Self {
        self.coords = coords;
        self.uncoords = uncoords;
        self
    }

    /// Mirror state as a boolean
    pub fn is_mirrored(&self) -> bool {
        self.mirror < 0.0
    }
}

/// Texel layout of a texture's mip data
#[derive(Debug, Clone, PartialEq)]
pub enum TextureFormat {
    /// 8-bit palettized; the palette holds RGBA entries
    P8 {
        /// 256 RGBA colors
        palette: Vec<[u8; 4]>,
    },
    /// 32-bit RGBA
    Rgba8,
    /// 32-bit BGRA
    Bgra8,
}

impl TextureFormat {
    /// Bytes per texel
    pub fn bytes_per_texel(&self) -> usize {
        match self {
            Self::P8 { .. } => 1,
            Self::Rgba8 | Self::Bgra8 => 4,
        }
    }

    /// Palettized format
    pub fn is_palettized(&self) -> bool {
        matches!(self, Self::P8 { .. })
    }
}

/// One mip level of texel data
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MipLevel {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Raw texels in the texture's format
    pub data: Vec<u8>,
}

impl MipLevel {
    /// Mip level from raw texels
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }
}

/// Engine texture description
#[derive(Debug, Clone, PartialEq)]
pub struct TextureInfo {
    /// Identity of the texture in the engine's cache
    pub cache_id: u64,
    /// Texel data changed since the last upload
    pub realtime_changed: bool,
    /// Width of the top mip
    pub u_size: u32,
    /// Height of the top mip
    pub v_size: u32,
    /// Horizontal texel scale
    pub u_scale: f32,
    /// Vertical texel scale
    pub v_scale: f32,
    /// Texture coordinate pan
    pub pan: Vec3,
    /// Texel layout
    pub format: TextureFormat,
    /// Mip chain, largest first
    pub mips: Vec<MipLevel>,
}

impl TextureInfo {
    /// Single-mip texture with unit scale
    pub fn new(cache_id: u64, format: TextureFormat, top: MipLevel) -> Self {
        Self {
            cache_id,
            realtime_changed: false,
            u_size: top.width,
            v_size: top.height,
            u_scale: 1.0,
            v_scale: 1.0,
            pan: Vec3::zeros(),
            format,
            mips: vec![top],
        }
    }

    /// Multiplier turning texel space U into normalized U
    pub fn u_mult(&self) -> f32 {
        1.0 / (self.u_scale * self.u_size as f32)
    }

    /// Multiplier turning texel space V into normalized V
    pub fn v_mult(&self) -> f32 {
        1.0 / (self.v_scale * self.v_size as f32)
    }

    /// Top mip carries texel data
    pub fn has_data(&self) -> bool {
        self.mips.first().is_some_and(|mip| !mip.data.is_empty())
    }
}

/// BSP surface being drawn
#[derive(Debug, Default)]
pub struct SurfaceInfo<'a> {
    /// Render flags of the surface
    pub poly_flags: PolyFlags,
    /// Base texture
    pub texture: Option<&'a mut TextureInfo>,
    /// Lightmap
    pub light_map: Option<&'a mut TextureInfo>,
    /// Macro texture
    pub macro_texture: Option<&'a mut TextureInfo>,
    /// Detail texture
    pub detail_texture: Option<&'a mut TextureInfo>,
    /// Volumetric fog map
    pub fog_map: Option<&'a mut TextureInfo>,
    /// Editor flat shading color (0..255 per channel)
    pub flat_color: [u8; 4],
}

/// Polygon of a facet, points in camera space
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SavedPoly {
    /// Polygon vertices
    pub points: Vec<Vec3>,
}

impl SavedPoly {
    /// Polygon from camera space points
    pub fn new(points: Vec<Vec3>) -> Self {
        Self { points }
    }
}

/// Texture mapping plane plus the clipped polygons of a surface
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SurfaceFacet {
    /// Texture mapping coordinate system
    pub map_coords: Coords,
    /// Polygons to draw
    pub polys: Vec<SavedPoly>,
}

/// Transformed Gouraud vertex
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransTexture {
    /// Camera space position
    pub point: Vec3,
    /// Camera space normal
    pub normal: Vec3,
    /// Texture U in texels
    pub u: f32,
    /// Texture V in texels
    pub v: f32,
    /// Vertex light
    pub light: Vec3,
    /// Vertex fog
    pub fog: Vec4,
    /// Frustum outcode bits
    pub outcode: u8,
}

impl TransTexture {
    /// Unlit vertex at a camera space position
    pub fn new(point: Vec3, u: f32, v: f32) -> Self {
        Self {
            point,
            normal: Vec3::z(),
            u,
            v,
            light: Vec3::new(1.0, 1.0, 1.0),
            fog: Vec4::zeros(),
            outcode: 0,
        }
    }
}

/// Screen-space rectangle drawn by `draw_tile`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tile {
    /// Left edge in viewport pixels
    pub x: f32,
    /// Top edge in viewport pixels
    pub y: f32,
    /// Width in pixels
    pub xl: f32,
    /// Height in pixels
    pub yl: f32,
    /// Texture U of the left edge, in texels
    pub u: f32,
    /// Texture V of the top edge, in texels
    pub v: f32,
    /// Texel width
    pub ul: f32,
    /// Texel height
    pub vl: f32,
    /// Camera space depth
    pub z: f32,
    /// Tint color
    pub color: Vec4,
}

impl Tile {
    /// Tile mapping texels one to one, at depth 1, untinted
    pub fn new(x: f32, y: f32, xl: f32, yl: f32) -> Self {
        Self {
            x,
            y,
            xl,
            yl,
            u: 0.0,
            v: 0.0,
            ul: xl,
            vl: yl,
            z: 1.0,
            color: Vec4::new(1.0, 1.0, 1.0, 1.0),
        }
    }

    /// Set the texel rectangle
    pub fn with_uv(mut self, u: f32, v: f32, ul: f32, vl: f32) -> Self {
        self.u = u;
        self.v = v;
        self.ul = ul;
        self.vl = vl;
        self
    }

    /// Set the depth
    pub fn with_z(mut self, z: f32) -> Self {
        self.z = z;
        self
    }

    /// Set the tint
    pub fn with_color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }
}

/// Per-frame parameters passed to `lock`
#[derive(Debug, Clone, PartialEq)]
pub struct LockParams {
    /// Screen flash scale
    pub flash_scale: Vec4,
    /// Screen flash fog color
    pub flash_fog: Vec4,
    /// Clear color for the scene target
    pub screen_clear: Vec4,
    /// Region to resolve a pick for at `unlock`
    pub hit_region: Option<HitRegion>,
}

impl LockParams {
    /// Flash scale that disables the screen flash
    pub fn default_flash_scale() -> Vec4 {
        Vec4::new(0.5, 0.5, 0.5, 0.0)
    }

    /// Frame that resolves a pick over `region`
    pub fn with_hit_region(mut self, region: HitRegion) -> Self {
        self.hit_region = Some(region);
        self
    }

    /// Flash settings differ from the no-flash default
    pub fn has_flash(&self) -> bool {
        self.flash_scale != Self::default_flash_scale() || self.flash_fog != Vec4::zeros()
    }
}

impl Default for LockParams {
    fn default() -> Self {
        Self {
            flash_scale: Self::default_flash_scale(),
            flash_fog: Vec4::zeros(),
            screen_clear: Vec4::zeros(),
            hit_region: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scene_node_halves() {
        let frame = SceneNode::new(640, 480, 90.0);
        assert_relative_eq!(frame.fx2, 320.0);
        assert_relative_eq!(frame.fy2, 240.0);
        assert!(!frame.is_mirrored());
    }

    #[test]
    fn test_texture_multipliers() {
        let mut info = TextureInfo::new(
            7,
            TextureFormat::Rgba8,
            MipLevel::new(64, 32, vec![0; 64 * 32 * 4]),
        );
        info.u_scale = 2.0;
        assert_relative_eq!(info.u_mult(), 1.0 / 128.0);
        assert_relative_eq!(info.v_mult(), 1.0 / 32.0);
        assert!(info.has_data());
    }

    #[test]
    fn test_default_lock_has_no_flash() {
        let params = LockParams::default();
        assert!(!params.has_flash());

        let flashed = LockParams {
            flash_fog: Vec4::new(1.0, 0.0, 0.0, 0.0),
            ..LockParams::default()
        };
        assert!(flashed.has_flash());
    }
}
