//! CPU rasterizer for the hit and depth targets
//!
//! Only the parts of the scene pass that picking depends on are modelled:
//! the hit index written per pixel and the depth test that decides which
//! primitive owns a pixel. Color is not produced.

use crate::foundation::math::{Vec3, Vec4};
use crate::render::api::{HitRegion, ScenePushConstants, Viewport};
use crate::render::pipeline::PipelineDesc;
use crate::render::resources::scene_buffers::SceneVertex;

/// Hit (R32_UINT) and depth (D32F) targets
#[derive(Debug, Clone)]
pub struct HitTarget {
    width: u32,
    height: u32,
    hit: Vec<u32>,
    depth: Vec<f32>,
}

impl HitTarget {
    /// Cleared targets of the given size
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            hit: vec![0; len],
            depth: vec![1.0; len],
        }
    }

    /// Target width
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Target height
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Zero the hit target and reset depth to the far plane
    pub fn clear(&mut self) {
        self.hit.fill(0);
        self.clear_depth();
    }

    /// Reset depth to the far plane
    pub fn clear_depth(&mut self) {
        self.depth.fill(1.0);
    }

    /// Hit value at a pixel
    pub fn value(&self, x: u32, y: u32) -> Option<u32> {
        (x < self.width && y < self.height).then(|| self.hit[self.offset(x, y)])
    }

    /// Values inside a region (clipped to the target), row by row
    pub fn read(&self, region: HitRegion) -> Vec<u32> {
        let x_end = (region.x + region.width).min(self.width);
        let y_end = (region.y + region.height).min(self.height);
        let mut values = Vec::new();
        for y in region.y.min(y_end)..y_end {
            for x in region.x.min(x_end)..x_end {
                values.push(self.hit[self.offset(x, y)]);
            }
        }
        values
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    fn write(&mut self, x: i64, y: i64, z: f32, desc: &PipelineDesc, hit_index: u32) {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return;
        }
        if !(0.0..=1.0).contains(&z) {
            return;
        }
        let i = self.offset(x as u32, y as u32);
        if desc.depth.test && z > self.depth[i] {
            return;
        }
        if desc.depth.write {
            self.depth[i] = z;
        }
        self.hit[i] = hit_index;
    }
}

/// Window-space position of a vertex, or `None` behind the eye
fn to_window(vertex: &SceneVertex, constants: &ScenePushConstants, viewport: &Viewport) -> Option<Vec3> {
    let p = vertex.position();
    let clip = constants.projection() * Vec4::new(p.x, p.y, p.z, 1.0);
    if clip.w <= f32::EPSILON {
        return None;
    }
    let ndc = clip.xyz() / clip.w;
    Some(Vec3::new(
        viewport.x + (ndc.x + 1.0) * 0.5 * viewport.width,
        viewport.y + (ndc.y + 1.0) * 0.5 * viewport.height,
        ndc.z,
    ))
}

fn edge(a: &Vec3, b: &Vec3, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// Pixel bounds of the viewport clipped to the target
fn scissor(target: &HitTarget, viewport: &Viewport) -> (i64, i64, i64, i64) {
    let x0 = (viewport.x.floor() as i64).max(0);
    let y0 = (viewport.y.floor() as i64).max(0);
    let x1 = ((viewport.x + viewport.width).ceil() as i64).min(i64::from(target.width));
    let y1 = ((viewport.y + viewport.height).ceil() as i64).min(i64::from(target.height));
    (x0, y0, x1, y1)
}

/// Rasterize an indexed triangle list
pub fn draw_triangles(
    target: &mut HitTarget,
    viewport: &Viewport,
    constants: &ScenePushConstants,
    desc: &PipelineDesc,
    vertices: &[SceneVertex],
    indices: &[u32],
) {
    let (sx0, sy0, sx1, sy1) = scissor(target, viewport);

    for tri in indices.chunks_exact(3) {
        let mut window = [Vec3::zeros(); 3];
        let mut visible = true;
        for (out, &index) in window.iter_mut().zip(tri) {
            match vertices.get(index as usize).and_then(|v| to_window(v, constants, viewport)) {
                Some(p) => *out = p,
                None => visible = false,
            }
        }
        if !visible {
            continue;
        }

        let [a, b, c] = window;
        let area = edge(&a, &b, c.x, c.y);
        if area.abs() <= f32::EPSILON {
            continue;
        }

        let min_x = (a.x.min(b.x).min(c.x).floor() as i64).max(sx0);
        let max_x = (a.x.max(b.x).max(c.x).ceil() as i64).min(sx1);
        let min_y = (a.y.min(b.y).min(c.y).floor() as i64).max(sy0);
        let max_y = (a.y.max(b.y).max(c.y).ceil() as i64).min(sy1);

        for y in min_y..max_y {
            for x in min_x..max_x {
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(&b, &c, px, py) / area;
                let w1 = edge(&c, &a, px, py) / area;
                let w2 = edge(&a, &b, px, py) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let z = w0 * a.z + w1 * b.z + w2 * c.z;
                target.write(x, y, z, desc, constants.hit_index);
            }
        }
    }
}

/// Rasterize an indexed line list
pub fn draw_lines(
    target: &mut HitTarget,
    viewport: &Viewport,
    constants: &ScenePushConstants,
    desc: &PipelineDesc,
    vertices: &[SceneVertex],
    indices: &[u32],
) {
    let (sx0, sy0, sx1, sy1) = scissor(target, viewport);

    for line in indices.chunks_exact(2) {
        let ends: Option<Vec<Vec3>> = line
            .iter()
            .map(|&i| vertices.get(i as usize).and_then(|v| to_window(v, constants, viewport)))
            .collect();
        let Some(ends) = ends else {
            continue;
        };
        let (a, b) = (ends[0], ends[1]);

        let steps = (b.x - a.x).abs().max((b.y - a.y).abs()).ceil().max(1.0) as i64;
        for step in 0..=steps {
            let t = step as f32 / steps as f32;
            let p = a + (b - a) * t;
            let (x, y) = (p.x.floor() as i64, p.y.floor() as i64);
            if x < sx0 || y < sy0 || x >= sx1 || y >= sy1 {
                continue;
            }
            target.write(x, y, p.z, desc, constants.hit_index);
        }
    }
}
