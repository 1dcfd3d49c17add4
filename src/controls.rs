use std::f32::consts::PI;

use glam::{vec3, Vec3};

use crate::camera::PerspectiveCamera;
use crate::config::ControlsConfig;

const POLAR_EPSILON: f32 = 1e-6;
const ZOOM_BASE: f32 = 0.95;

/// Orbit controller around a fixed target. Input accumulates into pending
/// deltas; `update` applies them once per frame (fractionally when damping is
/// enabled) and writes the camera position.
#[derive(Debug, Clone)]
pub struct OrbitControls {
    config: ControlsConfig,
    pending_azimuth: f32,
    pending_polar: f32,
    scale: f32,
}

impl OrbitControls {
    pub fn new(config: ControlsConfig) -> Self {
        Self { config, pending_azimuth: 0.0, pending_polar: 0.0, scale: 1.0 }
    }

    /// Pointer drag in CSS pixels. A drag across the full viewport height
    /// turns the camera by one full revolution.
    pub fn rotate_by_pixels(&mut self, dx: f32, dy: f32, viewport_height: f32) {
        if !(viewport_height > 0.0) {
            return;
        }
        let speed = self.config.rotate_speed;
        self.rotate_left(2.0 * PI * dx * speed / viewport_height);
        self.rotate_up(2.0 * PI * dy * speed / viewport_height);
    }

    pub fn rotate_left(&mut self, angle: f32) {
        self.pending_azimuth -= angle;
    }

    pub fn rotate_up(&mut self, angle: f32) {
        self.pending_polar -= angle;
    }

    /// Mouse wheel: negative `delta_y` moves the camera closer.
    pub fn wheel(&mut self, delta_y: f32) {
        let step = ZOOM_BASE.powf(self.config.zoom_speed);
        if delta_y < 0.0 {
            self.scale *= step;
        } else if delta_y > 0.0 {
            self.scale /= step;
        }
    }

    /// Apply pending input to the camera. Returns whether the camera moved.
    pub fn update(&mut self, camera: &mut PerspectiveCamera) -> bool {
        let offset = camera.position - camera.target;
        let mut spherical = Spherical::from_offset(offset);

        let factor = if self.config.enable_damping { self.config.damping_factor } else { 1.0 };
        spherical.azimuth += self.pending_azimuth * factor;
        spherical.polar += self.pending_polar * factor;
        spherical.polar = spherical.polar.clamp(POLAR_EPSILON, PI - POLAR_EPSILON);
        spherical.radius = (spherical.radius * self.scale)
            .max(self.config.min_distance)
            .min(self.config.max_distance);

        let position = camera.target + spherical.to_offset();
        let moved = (position - camera.position).length_squared() > POLAR_EPSILON * POLAR_EPSILON;
        camera.position = position;

        if self.config.enable_damping {
            self.pending_azimuth *= 1.0 - self.config.damping_factor;
            self.pending_polar *= 1.0 - self.config.damping_factor;
        } else {
            self.pending_azimuth = 0.0;
            self.pending_polar = 0.0;
        }
        self.scale = 1.0;

        moved
    }
}

/// Y-up spherical coordinates: polar angle from +Y, azimuth from +Z towards +X.
#[derive(Debug, Clone, Copy)]
struct Spherical {
    radius: f32,
    polar: f32,
    azimuth: f32,
}

impl Spherical {
    fn from_offset(v: Vec3) -> Self {
        let radius = v.length();
        if radius == 0.0 {
            return Self { radius, polar: 0.0, azimuth: 0.0 };
        }
        Self {
            radius,
            polar: (v.y / radius).clamp(-1.0, 1.0).acos(),
            azimuth: v.x.atan2(v.z),
        }
    }

    fn to_offset(self) -> Vec3 {
        let sin_polar = self.polar.sin();
        vec3(
            self.radius * sin_polar * self.azimuth.sin(),
            self.radius * self.polar.cos(),
            self.radius * sin_polar * self.azimuth.cos(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;

    fn camera() -> PerspectiveCamera {
        PerspectiveCamera::new(&CameraConfig::default(), 1.0)
    }

    fn undamped() -> ControlsConfig {
        ControlsConfig { enable_damping: false, ..ControlsConfig::default() }
    }

    #[test]
    fn idle_update_keeps_camera() {
        let mut cam = camera();
        let mut controls = OrbitControls::new(ControlsConfig::default());
        let before = cam.position;
        assert!(!controls.update(&mut cam));
        assert!((cam.position - before).length() < 1e-6);
    }

    #[test]
    fn rotation_preserves_distance_to_target() {
        let mut cam = camera();
        let mut controls = OrbitControls::new(undamped());
        controls.rotate_left(PI / 2.0);
        assert!(controls.update(&mut cam));
        assert!((cam.position.length() - 0.3).abs() < 1e-5);
        // Rotating left by a quarter turn moves a +Z camera to -X.
        assert!((cam.position - vec3(-0.3, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn damping_spreads_motion_over_frames() {
        let mut cam = camera();
        let mut controls = OrbitControls::new(ControlsConfig::default());
        controls.rotate_left(0.5);
        controls.update(&mut cam);
        let first = Spherical::from_offset(cam.position).azimuth;
        assert!((first + 0.5 * 0.05).abs() < 1e-5);

        for _ in 0..400 {
            controls.update(&mut cam);
        }
        let settled = Spherical::from_offset(cam.position).azimuth;
        assert!((settled + 0.5).abs() < 1e-3);
    }

    #[test]
    fn polar_angle_is_clamped() {
        let mut cam = camera();
        let mut controls = OrbitControls::new(undamped());
        controls.rotate_up(10.0);
        controls.update(&mut cam);
        // Pinned just short of the pole instead of flipping over it.
        assert!(cam.position.is_finite());
        assert!((cam.position.y - 0.3).abs() < 1e-5);
        assert!(cam.position.z >= 0.0);
    }

    #[test]
    fn wheel_dolly_and_distance_limits() {
        let mut cam = camera();
        let mut controls = OrbitControls::new(ControlsConfig { max_distance: 0.31, ..undamped() });
        controls.wheel(-100.0);
        controls.update(&mut cam);
        assert!((cam.position.length() - 0.3 * 0.95).abs() < 1e-5);

        for _ in 0..10 {
            controls.wheel(100.0);
        }
        controls.update(&mut cam);
        assert!((cam.position.length() - 0.31).abs() < 1e-5);
    }

    #[test]
    fn zero_height_drag_is_ignored() {
        let mut cam = camera();
        let mut controls = OrbitControls::new(undamped());
        controls.rotate_by_pixels(50.0, 50.0, 0.0);
        assert!(!controls.update(&mut cam));
    }
}
