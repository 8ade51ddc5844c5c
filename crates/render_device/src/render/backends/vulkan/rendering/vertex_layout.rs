//! Vertex input layout for [`SceneVertex`]

use std::mem::{offset_of, size_of};

use ash::vk;

use crate::render::resources::scene_buffers::SceneVertex;

/// Number of vertex attributes read by the scene shaders
pub const SCENE_ATTRIBUTE_COUNT: usize = 8;

/// Vulkan vertex layout for the scene vertex
pub struct SceneVertexLayout;

impl SceneVertexLayout {
    /// Binding 0 advances once per vertex
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<SceneVertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Attributes in shader location order
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; SCENE_ATTRIBUTE_COUNT] {
        let attribute = |location: u32, format: vk::Format, offset: usize| vk::VertexInputAttributeDescription {
            binding: 0,
            location,
            format,
            offset: offset as u32,
        };

        [
            attribute(0, vk::Format::R32_UINT, offset_of!(SceneVertex, flags)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(SceneVertex, position)),
            attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(SceneVertex, tex_coord)),
            attribute(3, vk::Format::R32G32_SFLOAT, offset_of!(SceneVertex, tex_coord2)),
            attribute(4, vk::Format::R32G32_SFLOAT, offset_of!(SceneVertex, tex_coord3)),
            attribute(5, vk::Format::R32G32_SFLOAT, offset_of!(SceneVertex, tex_coord4)),
            attribute(6, vk::Format::R32G32B32A32_SFLOAT, offset_of!(SceneVertex, color)),
            attribute(7, vk::Format::R32G32B32A32_UINT, offset_of!(SceneVertex, texture_binds)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_vertex_layout() {
        let binding = SceneVertexLayout::binding_description();
        assert_eq!(binding.stride, 80);

        let attributes = SceneVertexLayout::attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 4, 16, 24, 32, 40, 48, 64]);
        assert!(attributes.iter().enumerate().all(|(i, a)| a.location == i as u32));
    }
}
