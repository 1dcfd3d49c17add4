//! Screen-space tracking of fixed 3D anchor points.
//!
//! Every frame each anchor is projected to normalized device coordinates, a
//! ray is cast from the camera through that location, and the anchor is
//! hidden when the nearest scene hit is closer to the camera than the anchor
//! itself. Distances are compared in world space, which is exact for convex,
//! well separated occluders and approximate for geometry grazing the line of
//! sight at an angle.

use glam::{vec2, Vec2, Vec3};

use crate::camera::PerspectiveCamera;
use crate::scene::Scene;

/// Output side of a hotspot: something that can be shown, hidden and moved.
pub trait HotspotMarker {
    fn set_visible(&mut self, visible: bool);

    /// Pixel offset from the viewport centre, +y pointing down.
    fn set_translation(&mut self, x: f32, y: f32);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot<M> {
    pub position: Vec3,
    pub marker: M,
}

/// Result of evaluating one anchor for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HotspotFrame {
    pub visible: bool,
    /// `None` when the projection or viewport is degenerate.
    pub translation: Option<Vec2>,
}

/// Pixel translation for an NDC location.
pub fn ndc_to_translation(ndc: Vec2, viewport_width: f32, viewport_height: f32) -> Option<Vec2> {
    if !(viewport_width > 0.0 && viewport_height > 0.0) {
        return None;
    }
    let t = vec2(ndc.x * viewport_width * 0.5, -ndc.y * viewport_height * 0.5);
    t.is_finite().then_some(t)
}

/// Evaluate a single anchor against the current camera and scene.
/// `None` when the point cannot be projected this frame.
pub fn evaluate(
    camera: &PerspectiveCamera,
    scene: &Scene,
    position: Vec3,
    viewport_width: f32,
    viewport_height: f32,
) -> Option<HotspotFrame> {
    let ndc = camera.project(position)?.truncate();

    let visible = match camera.ray_from_ndc(ndc) {
        Some(ray) => match scene.intersect(&ray, true).first() {
            Some(hit) => position.distance(camera.position) <= hit.distance,
            None => true,
        },
        None => true,
    };

    Some(HotspotFrame {
        visible,
        translation: ndc_to_translation(ndc, viewport_width, viewport_height),
    })
}

/// Owns the fixed anchor list. The list never grows or shrinks after
/// construction.
#[derive(Debug)]
pub struct HotspotTracker<M> {
    hotspots: Vec<Hotspot<M>>,
    last_visible: Vec<Option<bool>>,
}

impl<M: HotspotMarker> HotspotTracker<M> {
    pub fn new(hotspots: Vec<Hotspot<M>>) -> Self {
        let last_visible = vec![None; hotspots.len()];
        Self { hotspots, last_visible }
    }

    pub fn len(&self) -> usize {
        self.hotspots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hotspots.is_empty()
    }

    pub fn hotspots(&self) -> &[Hotspot<M>] {
        &self.hotspots
    }

    /// Visibility computed by the most recent update, if any.
    pub fn is_visible(&self, index: usize) -> Option<bool> {
        self.last_visible.get(index).copied().flatten()
    }

    /// Reposition and show or hide every marker for the current frame.
    pub fn update_all(
        &mut self,
        camera: &PerspectiveCamera,
        scene: &Scene,
        viewport_width: f32,
        viewport_height: f32,
    ) {
        for (hotspot, last) in self.hotspots.iter_mut().zip(self.last_visible.iter_mut()) {
            let Some(frame) = evaluate(camera, scene, hotspot.position, viewport_width, viewport_height) else {
                continue;
            };

            hotspot.marker.set_visible(frame.visible);
            *last = Some(frame.visible);

            if let Some(t) = frame.translation {
                hotspot.marker.set_translation(t.x, t.y);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use crate::scene::tests::square;
    use crate::scene::SceneNode;
    use glam::Mat4;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct RecordingMarker {
        visible: Option<bool>,
        translation: Option<(f32, f32)>,
        writes: usize,
    }

    impl HotspotMarker for RecordingMarker {
        fn set_visible(&mut self, visible: bool) {
            self.visible = Some(visible);
        }

        fn set_translation(&mut self, x: f32, y: f32) {
            self.translation = Some((x, y));
            self.writes += 1;
        }
    }

    fn looking_down_neg_z() -> PerspectiveCamera {
        let config = CameraConfig {
            position: [0.0, 0.0, 0.0],
            target: [0.0, 0.0, -1.0],
            ..CameraConfig::default()
        };
        PerspectiveCamera::new(&config, 800.0 / 600.0)
    }

    fn tracker(points: &[Vec3]) -> HotspotTracker<RecordingMarker> {
        HotspotTracker::new(
            points
                .iter()
                .map(|p| Hotspot { position: *p, marker: RecordingMarker::default() })
                .collect(),
        )
    }

    fn occluder_at(z: f32) -> Scene {
        let mut scene = Scene::new();
        scene.add(SceneNode::new(Some("occluder".into()), Mat4::IDENTITY).with_mesh(square(Vec3::new(0.0, 0.0, z), 1.0)));
        scene
    }

    #[test]
    fn empty_scene_point_defaults_to_visible() {
        let camera = looking_down_neg_z();
        let mut tracker = tracker(&[Vec3::new(0.0, 0.0, -1.0)]);
        tracker.update_all(&camera, &Scene::new(), 800.0, 600.0);

        let marker = &tracker.hotspots()[0].marker;
        assert_eq!(marker.visible, Some(true));
        let (x, y) = marker.translation.unwrap();
        assert!(x.abs() < 1e-4 && y.abs() < 1e-4);
    }

    #[test]
    fn nearer_point_visible_farther_point_occluded() {
        let camera = looking_down_neg_z();
        let scene = occluder_at(-2.0);
        let mut tracker = tracker(&[Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 0.0, -3.0)]);
        tracker.update_all(&camera, &scene, 800.0, 600.0);

        assert_eq!(tracker.is_visible(0), Some(true));
        assert_eq!(tracker.is_visible(1), Some(false));
        assert_eq!(tracker.hotspots()[0].marker.translation, tracker.hotspots()[1].marker.translation);
    }

    #[test]
    fn geometry_off_the_line_of_sight_does_not_occlude() {
        let camera = looking_down_neg_z();
        let mut scene = Scene::new();
        scene.add(SceneNode::new(None, Mat4::IDENTITY).with_mesh(square(Vec3::new(5.0, 0.0, -2.0), 1.0)));
        let frame = evaluate(&camera, &scene, Vec3::new(0.0, 0.0, -3.0), 800.0, 600.0).unwrap();
        assert!(frame.visible);
    }

    #[test]
    fn translation_is_linear_in_viewport_size() {
        let ndc = vec2(0.25, -0.5);
        let small = ndc_to_translation(ndc, 640.0, 480.0).unwrap();
        let large = ndc_to_translation(ndc, 1280.0, 960.0).unwrap();
        assert_eq!(large, small * 2.0);
        assert_eq!(small, vec2(80.0, 120.0));
    }

    #[test]
    fn center_maps_to_zero_translation() {
        assert_eq!(ndc_to_translation(Vec2::ZERO, 1024.0, 768.0), Some(Vec2::ZERO));
    }

    #[test]
    fn repeated_updates_are_idempotent() {
        let camera = PerspectiveCamera::new(&CameraConfig::default(), 1.25);
        let scene = occluder_at(-0.05);
        let mut tracker = tracker(&[Vec3::new(0.01, -0.007, 0.03), Vec3::new(0.02, 0.02, -0.08)]);

        tracker.update_all(&camera, &scene, 1000.0, 800.0);
        let first: Vec<_> = tracker.hotspots().iter().map(|h| (h.marker.visible, h.marker.translation)).collect();
        tracker.update_all(&camera, &scene, 1000.0, 800.0);
        let second: Vec<_> = tracker.hotspots().iter().map(|h| (h.marker.visible, h.marker.translation)).collect();

        assert_eq!(first, second);
        assert_eq!(tracker.is_visible(1), Some(false));
    }

    #[test]
    fn zero_viewport_skips_transform_but_keeps_visibility() {
        let camera = looking_down_neg_z();
        let mut tracker = tracker(&[Vec3::new(0.0, 0.0, -1.0)]);
        tracker.update_all(&camera, &Scene::new(), 0.0, 600.0);

        let marker = &tracker.hotspots()[0].marker;
        assert_eq!(marker.visible, Some(true));
        assert_eq!(marker.translation, None);
        assert_eq!(marker.writes, 0);
    }

    #[test]
    fn point_on_camera_plane_is_skipped() {
        let camera = looking_down_neg_z();
        let mut tracker = tracker(&[Vec3::new(1.0, 0.0, 0.0)]);
        tracker.update_all(&camera, &Scene::new(), 800.0, 600.0);

        assert_eq!(tracker.hotspots()[0].marker, RecordingMarker::default());
        assert_eq!(tracker.is_visible(0), None);
    }
}
