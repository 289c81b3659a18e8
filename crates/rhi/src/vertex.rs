//! Mesh vertex layout.

use std::mem::offset_of;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Position, color and texture coordinate, bound at locations 0, 1 and 2.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    #[inline]
    pub const fn new(pos: Vec3, color: Vec3, tex_coord: Vec2) -> Self {
        Self {
            pos,
            color,
            tex_coord,
        }
    }

    /// Bit-exact key for deduplication; floats are not `Eq`/`Hash`.
    #[inline]
    pub fn bit_key(&self) -> [u32; 8] {
        bytemuck::cast(*self)
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, tex_coord) as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(size_of::<Vertex>(), 32);
        assert_eq!(Vertex::binding_description().stride, 32);

        let attrs = Vertex::attribute_descriptions();
        assert_eq!(
            attrs.iter().map(|a| a.offset).collect::<Vec<_>>(),
            vec![0, 12, 24]
        );
        assert_eq!(
            attrs.iter().map(|a| a.location).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(attrs[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn test_bit_key_distinguishes_vertices() {
        let a = Vertex::new(Vec3::ZERO, Vec3::ONE, Vec2::new(0.5, 0.5));
        let b = Vertex::new(Vec3::ZERO, Vec3::ONE, Vec2::new(0.5, 0.25));
        assert_eq!(a.bit_key(), a.bit_key());
        assert_ne!(a.bit_key(), b.bit_key());
    }
}
