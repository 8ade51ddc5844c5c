//! Math utilities and types
//!
//! Thin aliases over `nalgebra` plus the handful of engine-specific
//! operations the render device needs (coordinate systems and the
//! scene projection).

pub use nalgebra::{Matrix4, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Orthonormal coordinate system (origin plus three axes)
///
/// The host engine describes camera space and texture mapping with this
/// shape; transforming a point projects it onto each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coords {
    /// Origin of the coordinate system
    pub origin: Vec3,
    /// X axis
    pub x_axis: Vec3,
    /// Y axis
    pub y_axis: Vec3,
    /// Z axis
    pub z_axis: Vec3,
}

impl Coords {
    /// Identity coordinate system
    pub fn identity() -> Self {
        Self {
            origin: Vec3::zeros(),
            x_axis: Vec3::x(),
            y_axis: Vec3::y(),
            z_axis: Vec3::z(),
        }
    }

    /// Transform a point into this coordinate system
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.transform_vector(point - self.origin)
    }

    /// Transform a direction into this coordinate system (origin ignored)
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        Vec3::new(v.dot(&self.x_axis), v.dot(&self.y_axis), v.dot(&self.z_axis))
    }
}

impl Default for Coords {
    fn default() -> Self {
        Self::identity()
    }
}

/// Reflect `v` about the plane with normal `n`
pub fn mirror_by_vector(v: Vec3, n: Vec3) -> Vec3 {
    v - n * (2.0 * v.dot(&n))
}

/// Scalar triple product `a · (b × c)`
pub fn triple(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    a.dot(&b.cross(&c))
}

/// Left-handed perspective frustum with a `[0, 1]` clip-space depth range
pub fn frustum_lh_zo(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let width = right - left;
    let height = top - bottom;
    let depth = far - near;
    Mat4::new(
        2.0 * near / width, 0.0, -(right + left) / width, 0.0,
        0.0, 2.0 * near / height, -(top + bottom) / height, 0.0,
        0.0, 0.0, far / depth, -far * near / depth,
        0.0, 0.0, 1.0, 0.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_coords_transform() {
        let coords = Coords {
            origin: Vec3::new(1.0, 0.0, 0.0),
            x_axis: Vec3::y(),
            y_axis: Vec3::x(),
            z_axis: Vec3::z(),
        };
        let p = coords.transform_point(Vec3::new(3.0, 5.0, 7.0));
        assert_relative_eq!(p, Vec3::new(5.0, 2.0, 7.0));
    }

    #[test]
    fn test_frustum_projects_to_ndc() {
        let m = frustum_lh_zo(-1.0, 1.0, -1.0, 1.0, 1.0, 32768.0);
        let clip = m * Vec4::new(0.5, -0.25, 2.0, 1.0);
        assert_relative_eq!(clip.x / clip.w, 0.25);
        assert_relative_eq!(clip.y / clip.w, -0.125);
        let near = m * Vec4::new(0.0, 0.0, 1.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_mirror_and_triple() {
        let r = mirror_by_vector(Vec3::new(1.0, -1.0, 0.0), Vec3::y());
        assert_relative_eq!(r, Vec3::new(1.0, 1.0, 0.0));
        assert_relative_eq!(triple(Vec3::x(), Vec3::y(), Vec3::z()), 1.0);
    }
}
