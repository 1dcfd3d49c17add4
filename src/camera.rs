use glam::{vec4, Mat4, Vec2, Vec3};

use crate::config::CameraConfig;
use crate::raycast::Ray;

/// Clip-space `w` below this is treated as a point on the camera plane.
const MIN_CLIP_W: f32 = 1e-6;

/// Perspective camera looking from `position` at `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveCamera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl PerspectiveCamera {
    pub fn new(config: &CameraConfig, aspect: f32) -> Self {
        Self {
            position: Vec3::from(config.position),
            target: Vec3::from(config.target),
            up: Vec3::Y,
            fov_y_degrees: config.fov_y_degrees,
            aspect: if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 },
            near: config.near,
            far: config.far,
        }
    }

    /// Recompute the aspect ratio for a new viewport. A zero-sized viewport
    /// keeps the previous aspect.
    pub fn set_viewport(&mut self, width: f32, height: f32) -> bool {
        if width > 0.0 && height > 0.0 {
            self.aspect = width / height;
            true
        } else {
            false
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_degrees.to_radians(), self.aspect, self.near, self.far)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Normalized device coordinates of a world point. `None` when the point
    /// lies on the camera plane or the result is not finite.
    pub fn project(&self, world: Vec3) -> Option<Vec3> {
        let clip = self.view_proj() * vec4(world.x, world.y, world.z, 1.0);
        if clip.w.abs() < MIN_CLIP_W {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        ndc.is_finite().then_some(ndc)
    }

    /// Ray from the camera position through an NDC location.
    pub fn ray_from_ndc(&self, ndc: Vec2) -> Option<Ray> {
        let inv_view_proj = self.view_proj().inverse();
        let far_point = inv_view_proj * vec4(ndc.x, ndc.y, 0.5, 1.0);
        if far_point.w.abs() < MIN_CLIP_W {
            return None;
        }
        let direction = far_point.truncate() / far_point.w - self.position;
        if !direction.is_finite() || direction.length_squared() == 0.0 {
            return None;
        }
        Some(Ray::new(self.position, direction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin_camera() -> PerspectiveCamera {
        let config = CameraConfig {
            position: [0.0, 0.0, 0.0],
            target: [0.0, 0.0, -1.0],
            ..CameraConfig::default()
        };
        PerspectiveCamera::new(&config, 16.0 / 9.0)
    }

    #[test]
    fn point_on_axis_projects_to_center() {
        let ndc = origin_camera().project(Vec3::new(0.0, 0.0, -1.0)).unwrap();
        assert!(ndc.x.abs() < 1e-6 && ndc.y.abs() < 1e-6);
    }

    #[test]
    fn point_on_camera_plane_is_degenerate() {
        assert_eq!(origin_camera().project(Vec3::new(1.0, 0.0, 0.0)), None);
    }

    #[test]
    fn ray_passes_through_projected_point() {
        let camera = PerspectiveCamera::new(&CameraConfig::default(), 1.5);
        let p = Vec3::new(0.03, -0.02, 0.01);
        let ndc = camera.project(p).unwrap();
        let ray = camera.ray_from_ndc(ndc.truncate()).unwrap();
        assert_eq!(ray.origin, camera.position);
        let t = (p - ray.origin).dot(ray.direction);
        assert!((ray.at(t) - p).length() < 1e-4);
    }

    #[test]
    fn zero_viewport_keeps_aspect() {
        let mut camera = origin_camera();
        let before = camera.aspect;
        assert!(!camera.set_viewport(0.0, 600.0));
        assert_eq!(camera.aspect, before);
        assert!(camera.set_viewport(800.0, 400.0));
        assert_eq!(camera.aspect, 2.0);
    }
}
