use serde::Deserialize;

use crate::error::{ViewerError, ViewerResult};

/// Viewer configuration. Every field has a default, so a page can pass a
/// partial JSON object (or nothing at all).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub model_url: String,
    pub environment_url: String,

    pub container_selector: String,
    pub progress_selector: String,
    pub overlay_selector: String,

    pub camera: CameraConfig,
    pub controls: ControlsConfig,
    pub render: RenderConfig,

    /// Percentage shown on the progress bar before the first item finishes.
    pub initial_progress: f32,
    pub overlay_hide_delay_ms: i32,

    /// Class toggled on hotspot markers when they are not occluded.
    pub visible_class: String,
    pub hotspots: Vec<HotspotConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub position: [f32; 3],
    pub target: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub enable_damping: bool,
    pub damping_factor: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// 0xRRGGBB
    pub clear_color: u32,
    pub clear_alpha: f32,
    pub exposure: f32,
    pub max_pixel_ratio: f64,
    pub sample_count: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HotspotConfig {
    pub position: [f32; 3],
    pub selector: String,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        let points = [
            [0.0103148, -0.006981742, 0.03138121],
            [0.050873709, 0.0203039, 0.021715679],
            [0.006961332, 0.02311723, 0.00890365],
            [-0.02723543, 0.02851662, 0.017251429],
            [-0.0245239, 0.034617535, -0.01035874],
        ];

        Self {
            model_url: "/argus_camera.glb".to_string(),
            environment_url: "/midday_1k.hdr".to_string(),
            container_selector: "#container".to_string(),
            progress_selector: "#progress".to_string(),
            overlay_selector: "#progress-overlay".to_string(),
            camera: CameraConfig::default(),
            controls: ControlsConfig::default(),
            render: RenderConfig::default(),
            initial_progress: 4.0,
            overlay_hide_delay_ms: 1000,
            visible_class: "visible".to_string(),
            hotspots: points
                .iter()
                .enumerate()
                .map(|(i, p)| HotspotConfig { position: *p, selector: format!(".point-{}", i) })
                .collect(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_y_degrees: 45.0,
            near: 0.01,
            far: 20.0,
            position: [0.0, 0.0, 0.3],
            target: [0.0, 0.0, 0.0],
        }
    }
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            enable_damping: true,
            damping_factor: 0.05,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: 0xaaaaaa,
            clear_alpha: 1.0,
            exposure: 1.1,
            max_pixel_ratio: 2.0,
            sample_count: 4,
        }
    }
}

impl RenderConfig {
    /// Clear colour as linear RGBA, matching how an sRGB hex colour is
    /// interpreted by colour-managed renderers.
    pub fn clear_color_linear(&self) -> [f64; 4] {
        let channel = |shift: u32| {
            let c = ((self.clear_color >> shift) & 0xff) as f64 / 255.0;
            if c <= 0.04045 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        };
        [channel(16), channel(8), channel(0), self.clear_alpha as f64]
    }
}

impl ViewerConfig {
    /// Parse an optional JSON override on top of the defaults.
    pub fn from_json(json: Option<&str>) -> ViewerResult<Self> {
        let config = match json.map(str::trim).filter(|s| !s.is_empty()) {
            Some(text) => serde_json::from_str::<ViewerConfig>(text)?,
            None => ViewerConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ViewerResult<()> {
        let cam = &self.camera;
        if !(cam.near > 0.0) || !(cam.far > cam.near) {
            return Err(ViewerError::Config(format!(
                "camera planes must satisfy 0 < near < far (near={}, far={})",
                cam.near, cam.far
            )));
        }
        if !(cam.fov_y_degrees > 0.0 && cam.fov_y_degrees < 180.0) {
            return Err(ViewerError::Config(format!("fov_y_degrees out of range: {}", cam.fov_y_degrees)));
        }
        if !(self.render.max_pixel_ratio > 0.0) {
            return Err(ViewerError::Config("max_pixel_ratio must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.controls.damping_factor) {
            return Err(ViewerError::Config(format!(
                "damping_factor must be in [0, 1): {}",
                self.controls.damping_factor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_product_page() {
        let config = ViewerConfig::default();
        assert_eq!(config.hotspots.len(), 5);
        assert_eq!(config.hotspots[3].selector, ".point-3");
        assert_eq!(config.camera.position, [0.0, 0.0, 0.3]);
        assert_eq!(config.render.max_pixel_ratio, 2.0);
        assert_eq!(config.overlay_hide_delay_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = ViewerConfig::from_json(Some(r#"{ "model_url": "/shoe.glb", "camera": { "fov_y_degrees": 60 } }"#))
            .unwrap();
        assert_eq!(config.model_url, "/shoe.glb");
        assert_eq!(config.camera.fov_y_degrees, 60.0);
        assert_eq!(config.camera.near, 0.01);
        assert_eq!(config.environment_url, "/midday_1k.hdr");
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(ViewerConfig::from_json(Some("  ")).unwrap(), ViewerConfig::default());
        assert_eq!(ViewerConfig::from_json(None).unwrap(), ViewerConfig::default());
    }

    #[test]
    fn rejects_inverted_planes() {
        let err = ViewerConfig::from_json(Some(r#"{ "camera": { "near": 5.0, "far": 1.0 } }"#)).unwrap_err();
        assert!(matches!(err, ViewerError::Config(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = ViewerConfig::from_json(Some("{ not json")).unwrap_err();
        assert!(matches!(err, ViewerError::ConfigJson(_)));
    }

    #[test]
    fn clear_color_is_linearized() {
        let rgba = RenderConfig::default().clear_color_linear();
        // 0xaa in sRGB is roughly 0.402 linear
        assert!((rgba[0] - 0.402).abs() < 0.01);
        assert_eq!(rgba[0], rgba[2]);
        assert_eq!(rgba[3], 1.0);
    }
}
