//! Uniform buffer object shared with the vertex shader (set 0, binding 0).
//!
//! `#[repr(C)]` with three column-major matrices, matching the std140 layout
//! of the GLSL block.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);
const FOV_Y_DEGREES: f32 = 45.0;
const Z_NEAR: f32 = 0.1;
const Z_FAR: f32 = 10.0;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Fixed camera looking at the origin from (2, 2, 2) with +Z up.
    ///
    /// The projection's Y axis is flipped for Vulkan clip space.
    pub fn for_extent(width: u32, height: u32) -> Self {
        let aspect = width as f32 / height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
        proj.y_axis.y *= -1.0;

        Self {
            model: Mat4::IDENTITY,
            view: Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z),
            proj,
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_ubo_size_and_alignment() {
        assert_eq!(UniformBufferObject::SIZE, 192);
        assert_eq!(std::mem::align_of::<UniformBufferObject>(), 16);
        assert_eq!(UniformBufferObject::default().as_bytes().len(), 192);
    }

    #[test]
    fn test_model_is_identity() {
        let ubo = UniformBufferObject::for_extent(800, 600);
        assert_eq!(ubo.model, Mat4::IDENTITY);
    }

    #[test]
    fn test_projection_y_is_flipped() {
        let ubo = UniformBufferObject::for_extent(800, 600);
        let unflipped = Mat4::perspective_rh(45f32.to_radians(), 800.0 / 600.0, 0.1, 10.0);
        assert!(ubo.proj.y_axis.y < 0.0);
        assert_eq!(ubo.proj.y_axis.y, -unflipped.y_axis.y);
        assert_eq!(ubo.proj.x_axis, unflipped.x_axis);
    }

    #[test]
    fn test_aspect_follows_extent() {
        let wide = UniformBufferObject::for_extent(1600, 600);
        let square = UniformBufferObject::for_extent(600, 600);
        // x scale is f / aspect, so wider extents shrink it.
        assert!(wide.proj.x_axis.x < square.proj.x_axis.x);
    }

    #[test]
    fn test_origin_is_in_front_of_camera() {
        let ubo = UniformBufferObject::for_extent(800, 600);
        let clip = ubo.proj * ubo.view * ubo.model * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert!(clip.w > 0.0);
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn test_zero_height_does_not_divide_by_zero() {
        let ubo = UniformBufferObject::for_extent(800, 0);
        assert!(ubo.proj.x_axis.x.is_finite());
    }
}
