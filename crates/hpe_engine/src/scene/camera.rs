//! Free-fly yaw/pitch camera

use super::{Frustum, AABB};
use crate::config::CameraSettings;
use crate::foundation::math::{Mat4, Point3, Vec3};
use nalgebra::Perspective3;

const PITCH_LIMIT: f32 = 89.0;

/// Perspective camera oriented by yaw and pitch in degrees
///
/// Yaw -90 looks down -Z.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Eye position
    pub position: Vec3,
    /// Heading in degrees
    pub yaw: f32,
    /// Elevation in degrees, clamped to +/-89
    pub pitch: f32,
    /// Vertical field of view in degrees
    pub fov_y: f32,
    /// Near clip distance
    pub near: f32,
    /// Far clip distance
    pub far: f32,
    /// Width over height
    pub aspect: f32,
}

impl Camera {
    /// Camera from configured defaults
    pub fn from_settings(settings: &CameraSettings, aspect: f32) -> Self {
        let [x, y, z] = settings.position;
        Self {
            position: Vec3::new(x, y, z),
            yaw: settings.yaw,
            pitch: settings.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT),
            fov_y: settings.fov_y,
            near: settings.near,
            far: settings.far,
            aspect,
        }
    }

    /// Unit view direction
    pub fn forward(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos()).normalize()
    }

    /// Set orientation, clamping pitch
    pub fn set_orientation(&mut self, yaw: f32, pitch: f32) {
        self.yaw = yaw;
        self.pitch = pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Turn to face `target`
    pub fn look_at(&mut self, target: Vec3) {
        let direction = target - self.position;
        if direction.norm_squared() <= f32::EPSILON {
            return;
        }
        let direction = direction.normalize();
        let yaw = direction.z.atan2(direction.x).to_degrees();
        let pitch = direction.y.asin().to_degrees();
        self.set_orientation(yaw, pitch);
    }

    /// World-to-view matrix
    pub fn view(&self) -> Mat4 {
        let eye = Point3::from(self.position);
        let target = Point3::from(self.position + self.forward());
        Mat4::look_at_rh(&eye, &target, &Vec3::y())
    }

    /// View-to-clip matrix
    pub fn projection(&self) -> Mat4 {
        Perspective3::new(self.aspect, self.fov_y.to_radians(), self.near, self.far).to_homogeneous()
    }

    /// World-to-clip matrix
    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Culling volume
    pub fn frustum(&self) -> Frustum {
        Frustum::from_matrix(&self.view_projection())
    }

    /// Distance in front of the camera along the view axis
    pub fn depth(&self, point: &Vec3) -> f32 {
        (point - self.position).dot(&self.forward())
    }

    /// Whether any part of the box is visible
    pub fn sees(&self, bounds: &AABB) -> bool {
        self.frustum().intersects_aabb(bounds)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::from_settings(&CameraSettings::default(), 16.0 / 9.0)
    }
}
