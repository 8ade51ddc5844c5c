//! Primitive emission
//!
//! Every draw call resolves its textures, binds pipeline and descriptor
//! state through the batch accumulator and appends its vertices. Batches
//! only break when that state changes, so consecutive primitives of any
//! kind share a draw call.

use bitflags::bitflags;

use super::RenderDevice;
use crate::config::LightMode;
use crate::foundation::math::{mirror_by_vector, triple, Vec2, Vec3, Vec4};
use crate::render::api::GraphicsBackend;
use crate::render::poly_flags::{PipelineIndex, PipelineKey, PolyFlags};
use crate::render::resources::SceneVertex;
use crate::render::scene::{SceneNode, SurfaceFacet, SurfaceInfo, TextureInfo, Tile, TransTexture};

/// Orthographic zoom above which tiny 3D lines are skipped entirely
pub const ORTHO_LOW_DETAIL: f32 = 40000.0;

/// Depths this close to zero count as unset for editor tiles
const SMALL_NUMBER: f32 = 1.0e-8;

/// Minimum Manhattan length of an orthographic line, in pixels
const MIN_ORTHO_LINE_LENGTH: f32 = 0.2;

bitflags! {
    /// Shader feature bits stored in every [`SceneVertex`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VertexFlags: u32 {
        /// Lightmap in slot 1
        const LIGHT_MAP = 1;
        /// Macro texture in slot 2
        const MACRO_TEXTURE = 2;
        /// Detail texture in slot 3
        const DETAIL_TEXTURE = 4;
        /// Fog map in slot 3
        const FOG_MAP = 8;
        /// Gouraud vertex fog from texcoords 2 and 3
        const GOURAUD_FOG = 16;
        /// Brighter opaque meshes
        const BRIGHT_ACTOR = 32;
        /// Lightmaps blended at 1x
        const ONE_X_BLENDING = 64;
    }
}

/// Planar texture mapping of one complex surface slot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct TexMapping {
    u_pan: f32,
    v_pan: f32,
    u_mult: f32,
    v_mult: f32,
}

impl TexMapping {
    fn texture(info: &TextureInfo, u_dot: f32, v_dot: f32) -> Self {
        Self {
            u_pan: u_dot + info.pan.x,
            v_pan: v_dot + info.pan.y,
            u_mult: info.u_mult(),
            v_mult: info.v_mult(),
        }
    }

    /// Lightmap texels are centered, so the pan moves back half a texel
    fn light_map(info: &TextureInfo, u_dot: f32, v_dot: f32) -> Self {
        Self {
            u_pan: u_dot + info.pan.x - 0.5 * info.u_scale,
            v_pan: v_dot + info.pan.y - 0.5 * info.v_scale,
            ..Self::texture(info, u_dot, v_dot)
        }
    }

    fn apply(&self, u: f32, v: f32) -> [f32; 2] {
        [(u - self.u_pan) * self.u_mult, (v - self.v_pan) * self.v_mult]
    }
}

fn opaque(color: Vec4) -> Vec4 {
    Vec4::new(color.x, color.y, color.z, 1.0)
}

fn white() -> Vec4 {
    Vec4::new(1.0, 1.0, 1.0, 1.0)
}

fn gouraud_flags(poly_flags: PolyFlags, light_mode: LightMode) -> VertexFlags {
    let mut flags = VertexFlags::empty();
    let blended = PolyFlags::TRANSLUCENT | PolyFlags::MODULATED;
    if poly_flags.intersection(PolyFlags::RENDER_FOG | blended) == PolyFlags::RENDER_FOG {
        flags |= VertexFlags::GOURAUD_FOG;
    }
    if !poly_flags.intersects(blended) && light_mode == LightMode::BrighterActors {
        flags |= VertexFlags::BRIGHT_ACTOR;
    }
    flags
}

fn gouraud_vertex(
    p: &TransTexture,
    tex_coord: [f32; 2],
    flags: VertexFlags,
    modulated: bool,
    binds: [u32; 4],
) -> SceneVertex {
    let color = if modulated {
        white()
    } else {
        Vec4::new(p.light.x, p.light.y, p.light.z, 1.0)
    };
    let mut vertex = SceneVertex::new(p.point, color)
        .with_flags(flags.bits())
        .with_tex_coord(tex_coord[0], tex_coord[1])
        .with_texture_binds(binds);
    vertex.tex_coord2 = [p.fog.x, p.fog.y];
    vertex.tex_coord3 = [p.fog.z, p.fog.w];
    vertex
}

/// Environment map coordinates in texels from the view reflection
fn environment_uv(frame: &SceneNode, p: &TransTexture, info: &TextureInfo) -> (f32, f32) {
    let view = p.point.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::zeros);
    let t = frame.uncoords.transform_vector(mirror_by_vector(view, p.normal));
    let u_scale = info.u_scale * info.u_size as f32 / 256.0;
    let v_scale = info.v_scale * info.v_size as f32 / 256.0;
    (
        (t.x + 1.0) * 0.5 * 256.0 * u_scale,
        (t.y + 1.0) * 0.5 * 256.0 * v_scale,
    )
}

impl<B: GraphicsBackend> RenderDevice<B> {
    /// Draw a BSP surface: every polygon of the facet with up to four
    /// texture layers
    ///
    /// In editor mode, selected and flat shaded surfaces get a second
    /// highlight pass over the same polygons.
    pub fn draw_complex_surface(
        &mut self,
        _frame: &SceneNode,
        surface: &mut SurfaceInfo<'_>,
        facet: &SurfaceFacet,
    ) {
        let poly_flags = surface.poly_flags;
        let masked = poly_flags.contains(PolyFlags::MASKED);

        let tex = self.resolve_texture(surface.texture.as_deref_mut(), masked);
        let light_map = self.resolve_texture(surface.light_map.as_deref_mut(), false);
        let macro_texture = self.resolve_texture(surface.macro_texture.as_deref_mut(), false);
        let fog_map = match surface.fog_map.as_deref_mut() {
            Some(info) if info.has_data() => self.resolve_texture(Some(info), false),
            _ => None,
        };
        let detail = if self.config.detail_textures && surface.fog_map.is_none() {
            self.resolve_texture(surface.detail_texture.as_deref_mut(), false)
        } else {
            None
        };

        let coords = &facet.map_coords;
        let u_dot = coords.x_axis.dot(&coords.origin);
        let v_dot = coords.y_axis.dot(&coords.origin);
        let mapping = |id: Option<_>, info: Option<&TextureInfo>, light: bool| match id.and(info) {
            Some(info) if light => TexMapping::light_map(info, u_dot, v_dot),
            Some(info) => TexMapping::texture(info, u_dot, v_dot),
            None => TexMapping::default(),
        };
        let base_map = mapping(tex, surface.texture.as_deref(), false);
        let light_map_map = mapping(light_map, surface.light_map.as_deref(), true);
        let macro_map = mapping(macro_texture, surface.macro_texture.as_deref(), false);
        let detail_map = match fog_map {
            Some(_) => mapping(fog_map, surface.fog_map.as_deref(), true),
            None => mapping(detail, surface.detail_texture.as_deref(), false),
        };

        let mut vertex_flags = VertexFlags::empty();
        vertex_flags.set(VertexFlags::LIGHT_MAP, light_map.is_some());
        vertex_flags.set(VertexFlags::MACRO_TEXTURE, macro_texture.is_some());
        vertex_flags.set(VertexFlags::DETAIL_TEXTURE, detail.is_some() && fog_map.is_none());
        vertex_flags.set(VertexFlags::FOG_MAP, fog_map.is_some());
        vertex_flags.set(VertexFlags::ONE_X_BLENDING, self.config.light_mode == LightMode::OneXBlending);

        let slots = [tex, light_map, macro_texture, fog_map.or(detail)];
        let Some(binds) = self.apply_state(PipelineKey::for_flags(poly_flags), poly_flags, slots, false) else {
            return;
        };

        let surface_vertex = |point: Vec3, color: Vec4, binds: [u32; 4]| {
            let u = coords.x_axis.dot(&point);
            let v = coords.y_axis.dot(&point);
            let mut vertex = SceneVertex::new(point, color)
                .with_flags(vertex_flags.bits())
                .with_texture_binds(binds);
            vertex.tex_coord = base_map.apply(u, v);
            vertex.tex_coord2 = light_map_map.apply(u, v);
            vertex.tex_coord3 = macro_map.apply(u, v);
            vertex.tex_coord4 = detail_map.apply(u, v);
            vertex
        };

        if !self.emit_facet(facet, |point| surface_vertex(point, white(), binds)) {
            return;
        }
        self.counters.complex_surfaces += 1;

        if !self.editor_mode() || !poly_flags.intersects(PolyFlags::SELECTED | PolyFlags::FLAT_SHADED) {
            return;
        }

        let color = if poly_flags.contains(PolyFlags::FLAT_SHADED) {
            let [r, g, b, _] = surface.flat_color.map(|c| f32::from(c) / 255.0);
            if poly_flags.contains(PolyFlags::SELECTED) {
                Vec4::new(r * 1.5, g * 1.5, b * 1.5, 1.0)
            } else {
                Vec4::new(r, g, b, 0.85)
            }
        } else {
            Vec4::new(0.0, 0.0, 0.05, 0.20)
        };

        let highlight = PolyFlags::HIGHLIGHTED;
        let Some(binds) = self.apply_state(PipelineKey::for_flags(highlight), highlight, [None; 4], false) else {
            return;
        };
        self.emit_facet(facet, |point| surface_vertex(point, color, binds));
    }

    /// Fan-triangulate every polygon of a facet
    ///
    /// Returns `false` when a polygon could not fit even in an empty buffer
    /// generation; the rest of the facet is abandoned.
    fn emit_facet(&mut self, facet: &SurfaceFacet, mut vertex: impl FnMut(Vec3) -> SceneVertex) -> bool {
        for poly in &facet.polys {
            let count = poly.points.len() as u32;
            if count < 3 {
                continue;
            }
            if !self.reserve(count, (count - 2) * 3) {
                log::debug!("[BATCH] Surface polygon with {count} points dropped");
                return false;
            }
            let vertices: Vec<SceneVertex> = poly.points.iter().map(|&p| vertex(p)).collect();
            if let Some(batches) = self.batches() {
                batches.buffers_mut().push_fan(&vertices);
            }
        }
        true
    }

    /// Bind the pipeline for `poly_flags` with a single base texture
    fn bind_texture(&mut self, info: &mut TextureInfo, poly_flags: PolyFlags, clamp: bool) -> Option<[u32; 4]> {
        let tex = self.resolve_texture(Some(info), poly_flags.contains(PolyFlags::MASKED));
        self.apply_state(
            PipelineKey::for_flags(poly_flags),
            poly_flags,
            [tex, None, None, None],
            clamp,
        )
    }

    /// Draw a lit convex polygon as a triangle fan
    ///
    /// Polygons with fewer than three points are dropped.
    pub fn draw_gouraud_polygon(
        &mut self,
        _frame: &SceneNode,
        info: &mut TextureInfo,
        pts: &[TransTexture],
        poly_flags: PolyFlags,
    ) {
        let count = pts.len() as u32;
        if count < 3 || !self.reserve(count, (count - 2) * 3) {
            return;
        }
        let Some(binds) = self.bind_texture(info, poly_flags, false) else {
            return;
        };

        let flags = gouraud_flags(poly_flags, self.config.light_mode);
        let modulated = poly_flags.contains(PolyFlags::MODULATED);
        let (u_mult, v_mult) = (info.u_mult(), info.v_mult());
        let vertices: Vec<SceneVertex> = pts
            .iter()
            .map(|p| gouraud_vertex(p, [p.u * u_mult, p.v * v_mult], flags, modulated, binds))
            .collect();

        if let Some(batches) = self.batches() {
            batches.buffers_mut().push_fan(&vertices);
        }
        self.counters.gouraud_polygons += 1;
    }

    /// Draw a lit triangle list (mesh)
    ///
    /// Triangles entirely outside one frustum plane are skipped. One-sided
    /// triangles facing away from the camera are culled, with the facing
    /// flipped inside mirrors.
    pub fn draw_gouraud_triangles(
        &mut self,
        frame: &SceneNode,
        info: &mut TextureInfo,
        pts: &[TransTexture],
        poly_flags: PolyFlags,
    ) {
        let count = pts.len() as u32;
        if count < 3 || !self.reserve(count, count) {
            return;
        }
        let Some(binds) = self.bind_texture(info, poly_flags, false) else {
            return;
        };

        let flags = gouraud_flags(poly_flags, self.config.light_mode);
        let modulated = poly_flags.contains(PolyFlags::MODULATED);
        let environment = poly_flags.contains(PolyFlags::ENVIRONMENT);
        let info = &*info;
        let (u_mult, v_mult) = (info.u_mult(), info.v_mult());
        let vertices: Vec<SceneVertex> = pts
            .iter()
            .map(|p| {
                let (u, v) = if environment {
                    environment_uv(frame, p, info)
                } else {
                    (p.u, p.v)
                };
                gouraud_vertex(p, [u * u_mult, v * v_mult], flags, modulated, binds)
            })
            .collect();

        let two_sided = poly_flags.contains(PolyFlags::TWO_SIDED);
        let mirror = frame.is_mirrored();

        let Some(batches) = self.batches() else {
            return;
        };
        let buffers = batches.buffers_mut();
        let base = buffers.push_vertices(&vertices);

        let mut indices = Vec::with_capacity(pts.len());
        for (i, tri) in pts.chunks_exact(3).enumerate() {
            if tri[0].outcode & tri[1].outcode & tri[2].outcode != 0 {
                continue;
            }
            let first = base + i as u32 * 3;
            if two_sided {
                indices.extend([first + 2, first + 1, first]);
            } else {
                let backface = triple(tri[0].point, tri[1].point, tri[2].point) <= 0.0;
                if mirror == backface {
                    indices.extend([first, first + 1, first + 2]);
                }
            }
        }
        buffers.push_indices(&indices);
        self.counters.gouraud_polygons += 1;
    }

    /// Camera space position of a viewport pixel at depth `z`
    fn screen_to_camera(&self, frame: &SceneNode, x: f32, y: f32, z: f32) -> Vec3 {
        Vec3::new(
            self.projection.rfx2 * z * (x - frame.fx2),
            self.projection.rfy2 * z * (y - frame.fy2),
            z,
        )
    }

    /// Draw a screen-aligned textured rectangle (HUD, sprites, fonts)
    pub fn draw_tile(&mut self, frame: &SceneNode, info: &mut TextureInfo, tile: &Tile, poly_flags: PolyFlags) {
        if !self.reserve(4, 6) {
            return;
        }

        let mut z = tile.z;
        if self.editor_mode() && (frame.is_ortho || z.abs() <= SMALL_NUMBER) {
            z = 1.0;
        }

        let mut poly_flags = poly_flags;
        if poly_flags.contains(PolyFlags::MODULATED) && info.format.is_palettized() {
            poly_flags = PolyFlags::MODULATED;
        }

        let tex = self.resolve_texture(Some(&mut *info), poly_flags.contains(PolyFlags::MASKED));
        let Some(binds) = self.apply_state(
            PipelineKey::for_flags(poly_flags),
            poly_flags,
            [tex, None, None, None],
            true,
        ) else {
            return;
        };

        let (u_mult, v_mult) = match tex {
            Some(_) => (info.u_mult(), info.v_mult()),
            None => (0.0, 0.0),
        };
        let color = if poly_flags.contains(PolyFlags::MODULATED) {
            white()
        } else {
            opaque(tile.color)
        };

        let (mut x, mut y, mut xl, mut yl) = (tile.x, tile.y, tile.xl, tile.yl);
        if self.samples > 1 {
            let right = (x + xl + 0.5).floor();
            let bottom = (y + yl + 0.5).floor();
            x = (x + 0.5).floor();
            y = (y + 0.5).floor();
            xl = right - x;
            yl = bottom - y;
        }

        let (u0, v0) = (tile.u * u_mult, tile.v * v_mult);
        let (u1, v1) = ((tile.u + tile.ul) * u_mult, (tile.v + tile.vl) * v_mult);
        let corners = [
            (x, y, u0, v0),
            (x + xl, y, u1, v0),
            (x + xl, y + yl, u1, v1),
            (x, y + yl, u0, v1),
        ];
        let quad = corners.map(|(px, py, u, v)| {
            SceneVertex::new(self.screen_to_camera(frame, px, py, z), color)
                .with_tex_coord(u, v)
                .with_texture_binds(binds)
        });

        if let Some(batches) = self.batches() {
            batches.buffers_mut().push_quad(&quad);
        }
        self.counters.tiles += 1;
    }

    /// Draw a world space line
    ///
    /// Orthographic editor views project the line to the screen; lines
    /// shorter than a fraction of a pixel become a point, or vanish when
    /// zoomed far out.
    pub fn draw_3d_line(&mut self, frame: &SceneNode, color: Vec4, p1: Vec3, p2: Vec3) {
        let p1 = frame.coords.transform_point(p1);
        let p2 = frame.coords.transform_point(p2);

        if !frame.is_ortho {
            self.emit_line(PipelineKey::line(self.config.occlude_lines), color, p1, p2);
            return;
        }

        let project = |p: Vec3| Vec3::new(p.x / frame.zoom + frame.fx2, p.y / frame.zoom + frame.fy2, 1.0);
        let (a, b) = (project(p1), project(p2));
        if (b.x - a.x).abs() + (b.y - a.y).abs() >= MIN_ORTHO_LINE_LENGTH {
            self.draw_2d_line(frame, color, a, b);
        } else if frame.zoom < ORTHO_LOW_DETAIL {
            self.draw_2d_point(
                frame,
                color,
                Vec2::new(a.x - 1.0, a.y - 1.0),
                Vec2::new(a.x + 1.0, a.y + 1.0),
                a.z,
            );
        }
    }

    /// Draw a line between two viewport pixels; `z` of each point is its
    /// camera space depth
    pub fn draw_2d_line(&mut self, frame: &SceneNode, color: Vec4, p1: Vec3, p2: Vec3) {
        let a = self.screen_to_camera(frame, p1.x, p1.y, p1.z);
        let b = self.screen_to_camera(frame, p2.x, p2.y, p2.z);
        self.emit_line(PipelineKey::line(self.config.occlude_lines), color, a, b);
    }

    fn emit_line(&mut self, key: PipelineKey, color: Vec4, a: Vec3, b: Vec3) {
        let highlight = PolyFlags::HIGHLIGHTED;
        let Some(binds) = self.apply_state(key, highlight, [None; 4], false) else {
            return;
        };
        if !self.reserve(2, 2) {
            return;
        }
        let color = opaque(color);
        let a = SceneVertex::new(a, color).with_texture_binds(binds);
        let b = SceneVertex::new(b, color).with_texture_binds(binds);
        if let Some(batches) = self.batches() {
            batches.buffers_mut().push_line(a, b);
        }
    }

    /// Fill the pixel rectangle `p1..p2`, grown by half a pixel on every
    /// side
    pub fn draw_2d_point(&mut self, frame: &SceneNode, color: Vec4, p1: Vec2, p2: Vec2, z: f32) {
        let z = if self.editor_mode() { 1.0 } else { z };

        let highlight = PolyFlags::HIGHLIGHTED;
        let Some(binds) = self.apply_state(PipelineKey::Point, highlight, [None; 4], false) else {
            return;
        };
        if !self.reserve(4, 6) {
            return;
        }

        let color = opaque(color);
        let (x1, y1) = (p1.x - 0.5, p1.y - 0.5);
        let (x2, y2) = (p2.x + 0.5, p2.y + 0.5);
        let quad = [(x1, y1), (x2, y1), (x2, y2), (x1, y2)].map(|(x, y)| {
            SceneVertex::new(self.screen_to_camera(frame, x, y, z), color).with_texture_binds(binds)
        });
        if let Some(batches) = self.batches() {
            batches.buffers_mut().push_quad(&quad);
        }
    }

    /// Full-screen quad in clip space for the screen flash
    pub(super) fn draw_flash_quad(&mut self, color: Vec4) {
        let key = PipelineKey::Scene(PipelineIndex::from_raw(2));
        let Some(binds) = self.apply_state(key, PolyFlags::HIGHLIGHTED, [None; 4], false) else {
            return;
        };
        if !self.reserve(4, 6) {
            return;
        }
        let quad = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
            .map(|(x, y)| SceneVertex::new(Vec3::new(x, y, 0.0), color).with_texture_binds(binds));
        if let Some(batches) = self.batches() {
            batches.buffers_mut().push_quad(&quad);
        }
    }
}
