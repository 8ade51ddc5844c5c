//! Shared scene vertex and index buffers
//!
//! Every primitive appends into one pair of fixed-capacity buffers. Cursors
//! only move forward within a buffer generation; starting a new generation
//! resets both cursors to zero and is only allowed at a batch boundary, after
//! the GPU has finished with the previous generation.
//!
//! Written data is staged on the CPU and handed to the backend in one piece
//! at the next flush ([`SceneVertexIndexBuffer::take_pending`]).

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Vec3, Vec4};

/// Vertex layout shared by every scene pipeline
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SceneVertex {
    /// Shader feature bits
    pub flags: u32,
    /// Camera space position
    pub position: [f32; 3],
    /// Base texture coordinate
    pub tex_coord: [f32; 2],
    /// Lightmap coordinate (fog for Gouraud vertices)
    pub tex_coord2: [f32; 2],
    /// Macro texture coordinate (fog for Gouraud vertices)
    pub tex_coord3: [f32; 2],
    /// Detail or fog map coordinate
    pub tex_coord4: [f32; 2],
    /// Vertex color
    pub color: [f32; 4],
    /// Bindless texture array slots (base, lightmap, macro, detail)
    pub texture_binds: [u32; 4],
}

impl SceneVertex {
    /// Vertex at a position with a color
    pub fn new(position: Vec3, color: Vec4) -> Self {
        Self {
            position: position.into(),
            color: color.into(),
            ..Self::default()
        }
    }

    /// Set the base texture coordinate
    pub fn with_tex_coord(mut self, u: f32, v: f32) -> Self {
        self.tex_coord = [u, v];
        self
    }

    /// Set shader flags
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Set bindless texture slots
    pub fn with_texture_binds(mut self, binds: [u32; 4]) -> Self {
        self.texture_binds = binds;
        self
    }

    /// Position as a vector
    pub fn position(&self) -> Vec3 {
        Vec3::from(self.position)
    }
}

/// Geometry written since the last upload
#[derive(Debug, Default)]
pub struct PendingGeometry {
    /// Vertex slot of the first pending vertex
    pub first_vertex: u32,
    /// Pending vertices
    pub vertices: Vec<SceneVertex>,
    /// Index slot of the first pending index
    pub first_index: u32,
    /// Pending indices (absolute vertex slots)
    pub indices: Vec<u32>,
}

impl PendingGeometry {
    /// Nothing was written
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.indices.is_empty()
    }
}

/// Largest power-of-two sample count not above either limit
pub fn best_sample_count(requested: u32, max_supported: u32) -> u32 {
    let limit = requested.min(max_supported).max(1);
    let mut samples = 1;
    while samples * 2 <= limit {
        samples *= 2;
    }
    samples
}

/// Write cursors over the shared scene buffers
#[derive(Debug)]
pub struct SceneVertexIndexBuffer {
    vertex_capacity: u32,
    index_capacity: u32,
    vertex_pos: u32,
    index_pos: u32,
    generation: u64,
    pending: PendingGeometry,
}

impl SceneVertexIndexBuffer {
    /// Cursors over buffers of the given capacities
    pub fn new(vertex_capacity: u32, index_capacity: u32) -> Self {
        Self {
            vertex_capacity,
            index_capacity,
            vertex_pos: 0,
            index_pos: 0,
            generation: 0,
            pending: PendingGeometry::default(),
        }
    }

    /// Vertex capacity
    pub fn vertex_capacity(&self) -> u32 {
        self.vertex_capacity
    }

    /// Index capacity
    pub fn index_capacity(&self) -> u32 {
        self.index_capacity
    }

    /// Next vertex slot
    pub fn vertex_pos(&self) -> u32 {
        self.vertex_pos
    }

    /// Next index slot
    pub fn index_pos(&self) -> u32 {
        self.index_pos
    }

    /// Current buffer generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Data fits behind the current cursors
    pub fn fits(&self, vertex_count: u32, index_count: u32) -> bool {
        u64::from(self.vertex_pos) + u64::from(vertex_count) <= u64::from(self.vertex_capacity)
            && u64::from(self.index_pos) + u64::from(index_count) <= u64::from(self.index_capacity)
    }

    /// Data fits in an empty generation
    pub fn fits_fresh(&self, vertex_count: u32, index_count: u32) -> bool {
        vertex_count <= self.vertex_capacity && index_count <= self.index_capacity
    }

    /// Append vertices, returning the slot of the first one
    ///
    /// Callers check [`fits`](Self::fits) first.
    pub fn push_vertices(&mut self, vertices: &[SceneVertex]) -> u32 {
        let base = self.vertex_pos;
        if self.pending.vertices.is_empty() {
            self.pending.first_vertex = base;
        }
        self.pending.vertices.extend_from_slice(vertices);
        self.vertex_pos += vertices.len() as u32;
        base
    }

    /// Append indices
    pub fn push_indices(&mut self, indices: &[u32]) {
        if self.pending.indices.is_empty() {
            self.pending.first_index = self.index_pos;
        }
        self.pending.indices.extend_from_slice(indices);
        self.index_pos += indices.len() as u32;
    }

    /// Append a convex polygon as a triangle fan
    pub fn push_fan(&mut self, vertices: &[SceneVertex]) {
        let base = self.push_vertices(vertices);
        let count = vertices.len() as u32;
        let indices: Vec<u32> = (2..count)
            .flat_map(|i| [base, base + i - 1, base + i])
            .collect();
        self.push_indices(&indices);
    }

    /// Append a quad as two triangles (vertices in fan order)
    pub fn push_quad(&mut self, vertices: &[SceneVertex; 4]) {
        self.push_fan(vertices);
    }

    /// Append one line segment
    pub fn push_line(&mut self, a: SceneVertex, b: SceneVertex) {
        let base = self.push_vertices(&[a, b]);
        self.push_indices(&[base, base + 1]);
    }

    /// Hand over everything written since the last call
    pub fn take_pending(&mut self) -> PendingGeometry {
        std::mem::take(&mut self.pending)
    }

    /// Start a new generation with both cursors at zero
    ///
    /// Pending data must have been taken first.
    pub fn next_generation(&mut self) {
        debug_assert!(self.pending.is_empty(), "pending geometry dropped at generation change");
        self.vertex_pos = 0;
        self.index_pos = 0;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(x: f32) -> SceneVertex {
        SceneVertex::new(Vec3::new(x, 0.0, 1.0), Vec4::new(1.0, 1.0, 1.0, 1.0))
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<SceneVertex>(), 80);
        let vertex = SceneVertex::default();
        let bytes = bytemuck::bytes_of(&vertex);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fan_indices() {
        let mut buffer = SceneVertexIndexBuffer::new(16, 48);
        buffer.push_vertices(&[vertex(9.0)]);
        buffer.push_fan(&[vertex(0.0), vertex(1.0), vertex(2.0), vertex(3.0), vertex(4.0)]);

        let pending = buffer.take_pending();
        assert_eq!(pending.first_vertex, 0);
        assert_eq!(pending.vertices.len(), 6);
        assert_eq!(pending.indices, vec![1, 2, 3, 1, 3, 4, 1, 4, 5]);
        assert_eq!(buffer.index_pos(), 9);
    }

    #[test]
    fn test_pending_tracks_first_slots() {
        let mut buffer = SceneVertexIndexBuffer::new(16, 48);
        buffer.push_line(vertex(0.0), vertex(1.0));
        buffer.take_pending();

        buffer.push_line(vertex(2.0), vertex(3.0));
        let pending = buffer.take_pending();
        assert_eq!(pending.first_vertex, 2);
        assert_eq!(pending.first_index, 2);
        assert_eq!(pending.indices, vec![2, 3]);
    }

    #[test]
    fn test_capacity_checks() {
        let mut buffer = SceneVertexIndexBuffer::new(8, 12);
        assert!(buffer.fits(8, 12));
        assert!(!buffer.fits(9, 0));
        assert!(!buffer.fits(0, 13));

        buffer.push_quad(&[vertex(0.0), vertex(1.0), vertex(2.0), vertex(3.0)]);
        assert!(buffer.fits(4, 6));
        assert!(!buffer.fits(5, 6));
        assert!(buffer.fits_fresh(5, 6));
        assert!(!buffer.fits_fresh(9, 6));
        assert!(!buffer.fits(u32::MAX, u32::MAX));
    }

    #[test]
    fn test_next_generation_resets_cursors() {
        let mut buffer = SceneVertexIndexBuffer::new(8, 12);
        buffer.push_quad(&[vertex(0.0), vertex(1.0), vertex(2.0), vertex(3.0)]);
        buffer.take_pending();
        buffer.next_generation();

        assert_eq!(buffer.vertex_pos(), 0);
        assert_eq!(buffer.index_pos(), 0);
        assert_eq!(buffer.generation(), 1);
    }

    #[test]
    fn test_best_sample_count() {
        assert_eq!(best_sample_count(0, 8), 1);
        assert_eq!(best_sample_count(2, 8), 2);
        assert_eq!(best_sample_count(4, 2), 2);
        assert_eq!(best_sample_count(3, 8), 2);
    }
}
