//! Bounding volumes for culling
//!
//! Meshes compute an `AABB` once at load; the resolver moves it into world
//! space and tests it against the camera `Frustum`.

use super::math::{Mat4, Point3, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Axis-Aligned Bounding Box for spatial queries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AABB {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl AABB {
    /// Create a new AABB from min and max points
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with given extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Smallest box enclosing every point; `None` for an empty set
    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let mut bounds = Self::new(first, first);
        for p in points {
            bounds.min = bounds.min.inf(&p);
            bounds.max = bounds.max.sup(&p);
        }
        Some(bounds)
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the extents (half-size) of the AABB
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// The eight corners
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Box enclosing this one after an affine transform
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let corners = self
            .corners()
            .map(|c| matrix.transform_point(&Point3::from(c)).coords);
        // Eight corners, never empty.
        Self::from_points(corners).unwrap_or(*self)
    }

    /// Check if this AABB contains a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// Check if this AABB intersects another AABB
    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}

/// Plane defined by normal and distance from origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Normal vector (normalized)
    pub normal: Vec3,
    /// Distance from origin along the normal
    pub distance: f32,
}

impl Plane {
    /// Create a new plane from normal and distance
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self {
            normal: normal.normalize(),
            distance,
        }
    }

    /// Plane `ax + by + cz + d = 0`, normalized
    pub fn from_coefficients(coefficients: Vec4) -> Self {
        let normal = coefficients.xyz();
        let length = normal.magnitude();
        if length > f32::EPSILON {
            Self {
                normal: normal / length,
                distance: coefficients.w / length,
            }
        } else {
            Self {
                normal: Vec3::zeros(),
                distance: 0.0,
            }
        }
    }

    /// Calculate signed distance from plane to point
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(&point) + self.distance
    }
}

/// Frustum for visibility culling
#[derive(Debug, Clone)]
pub struct Frustum {
    /// Six inward-facing planes (left, right, bottom, top, near, far)
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Create a frustum from six planes
    pub fn new(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extract frustum planes from a view-projection matrix (Gribb-Hartmann)
    ///
    /// Expects OpenGL clip conventions (`-w <= z <= w`).
    pub fn from_matrix(vp_matrix: &Mat4) -> Self {
        let row = |i: usize| {
            Vec4::new(vp_matrix[(i, 0)], vp_matrix[(i, 1)], vp_matrix[(i, 2)], vp_matrix[(i, 3)])
        };
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        Self {
            planes: [
                Plane::from_coefficients(r3 + r0),
                Plane::from_coefficients(r3 - r0),
                Plane::from_coefficients(r3 + r1),
                Plane::from_coefficients(r3 - r1),
                Plane::from_coefficients(r3 + r2),
                Plane::from_coefficients(r3 - r2),
            ],
        }
    }

    /// Check if an AABB is inside or intersects the frustum
    pub fn intersects_aabb(&self, aabb: &AABB) -> bool {
        for plane in &self.planes {
            // Corner furthest along the plane normal
            let mut p = aabb.min;
            if plane.normal.x >= 0.0 {
                p.x = aabb.max.x;
            }
            if plane.normal.y >= 0.0 {
                p.y = aabb.max.y;
            }
            if plane.normal.z >= 0.0 {
                p.z = aabb.max.z;
            }

            if plane.distance_to_point(p) < 0.0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box() -> AABB {
        AABB::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_aabb_contains_and_intersects() {
        let aabb = unit_box();
        assert!(aabb.contains_point(Vec3::zeros()));
        assert!(!aabb.contains_point(Vec3::new(2.0, 0.0, 0.0)));

        let far = AABB::new(Vec3::new(5.0, 5.0, 5.0), Vec3::new(7.0, 7.0, 7.0));
        assert!(!aabb.intersects(&far));
        assert!(aabb.intersects(&AABB::from_center_extents(Vec3::new(1.5, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0))));
    }

    #[test]
    fn test_aabb_boundaries_are_inclusive() {
        let aabb = unit_box();
        assert!(aabb.contains_point(Vec3::new(1.0, -1.0, 1.0)));
        assert!(!aabb.contains_point(Vec3::new(1.0, -1.0, 1.001)));

        let touching = AABB::new(Vec3::new(1.0, -3.0, -3.0), Vec3::new(2.0, 3.0, 3.0));
        assert!(aabb.intersects(&touching));
        assert!(touching.intersects(&aabb));
        let apart_on_z = AABB::new(Vec3::new(-1.0, -1.0, 1.5), Vec3::new(1.0, 1.0, 2.0));
        assert!(!aabb.intersects(&apart_on_z));
    }

    #[test]
    fn test_aabb_transformed_by_translation_and_scale() {
        let matrix = Mat4::new_translation(&Vec3::new(10.0, 0.0, 0.0))
            * Mat4::new_nonuniform_scaling(&Vec3::new(2.0, 1.0, 1.0));
        let moved = unit_box().transformed(&matrix);

        assert_relative_eq!(moved.min, Vec3::new(8.0, -1.0, -1.0), epsilon = 1e-5);
        assert_relative_eq!(moved.max, Vec3::new(12.0, 1.0, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_frustum_from_perspective() {
        let projection = nalgebra::Perspective3::new(1.0, 0.8, 0.1, 100.0).to_homogeneous();
        let view = Mat4::look_at_rh(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(0.0, 0.0, -1.0),
            &Vec3::y(),
        );
        let frustum = Frustum::from_matrix(&(projection * view));

        let ahead = AABB::from_center_extents(Vec3::new(0.0, 0.0, -10.0), Vec3::new(0.5, 0.5, 0.5));
        let behind = AABB::from_center_extents(Vec3::new(0.0, 0.0, 10.0), Vec3::new(0.5, 0.5, 0.5));
        let beyond_far = AABB::from_center_extents(Vec3::new(0.0, 0.0, -500.0), Vec3::new(0.5, 0.5, 0.5));
        let off_side = AABB::from_center_extents(Vec3::new(50.0, 0.0, -10.0), Vec3::new(0.5, 0.5, 0.5));

        assert!(frustum.intersects_aabb(&ahead));
        assert!(!frustum.intersects_aabb(&behind));
        assert!(!frustum.intersects_aabb(&beyond_far));
        assert!(!frustum.intersects_aabb(&off_side));
    }
}
