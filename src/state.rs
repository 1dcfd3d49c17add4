use std::rc::Rc;

use flume::{Receiver, Sender};
use glam::{vec2, Mat4, Vec2, Vec3};

use crate::camera::PerspectiveCamera;
use crate::config::ViewerConfig;
use crate::controls::OrbitControls;
use crate::environment::EnvironmentMap;
use crate::frame::FrameClock;
use crate::hotspot::{Hotspot, HotspotMarker, HotspotTracker};
use crate::loader::{AssetMessage, AssetRequest};
use crate::model::{ModelAsset, TextureSlot};
use crate::progress::{LoadProgress, LoadStatus, ProgressSink};
use crate::resources::texture_requests;
use crate::scene::Scene;
use crate::viewport::Viewport;

/// GPU side of the viewer, as seen from the frame loop.
pub trait RenderBackend {
    fn upload_model(&mut self, asset: &ModelAsset, textures: &Sender<AssetMessage>);
    fn upload_environment(&mut self, map: &EnvironmentMap);
    fn upload_texture(&mut self, image_index: usize, slot: TextureSlot, view: Rc<wgpu::TextureView>);
    fn resize(&mut self, width: u32, height: u32);
    fn render(&mut self, camera: &PerspectiveCamera, model_transform: Mat4);
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    pointer_id: i32,
    last: Vec2,
}

/// Everything the frame loop owns. Loads only ever talk to it through the
/// asset channel, which is drained at the start of each tick.
pub struct ViewerState<M, B, S> {
    pub config: ViewerConfig,

    // Camera
    pub camera: PerspectiveCamera,
    pub controls: OrbitControls,
    pub viewport: Viewport,

    // Scene
    pub scene: Scene,
    pub tracker: HotspotTracker<M>,
    pub model_transform: Mat4,
    model_loaded: bool,

    // Output
    pub backend: B,
    pub progress_sink: S,
    progress: LoadProgress,

    // Asset Loading
    tx: Sender<AssetMessage>,
    rx: Receiver<AssetMessage>,

    drag: Option<Drag>,
    frame_count: u64,
    last_timestamp_ms: Option<f64>,
}

impl<M: HotspotMarker, B: RenderBackend, S: ProgressSink> ViewerState<M, B, S> {
    /// `markers` pairs up with `config.hotspots` by index.
    pub fn new(config: ViewerConfig, markers: Vec<M>, viewport: Viewport, backend: B, progress_sink: S) -> Self {
        let (tx, rx) = flume::unbounded();

        let aspect = if viewport.is_degenerate() { 1.0 } else { viewport.width() / viewport.height() };
        let camera = PerspectiveCamera::new(&config.camera, aspect);
        let controls = OrbitControls::new(config.controls.clone());

        let hotspots = config
            .hotspots
            .iter()
            .zip(markers)
            .map(|(spot, marker)| Hotspot { position: Vec3::from(spot.position), marker })
            .collect();

        Self {
            camera,
            controls,
            viewport,
            scene: Scene::new(),
            tracker: HotspotTracker::new(hotspots),
            model_transform: Mat4::IDENTITY,
            model_loaded: false,
            backend,
            progress_sink,
            progress: LoadProgress::new(),
            tx,
            rx,
            drag: None,
            frame_count: 0,
            last_timestamp_ms: None,
            config,
        }
    }

    pub fn sender(&self) -> Sender<AssetMessage> {
        self.tx.clone()
    }

    /// Register the model and environment loads and show the initial
    /// progress. The caller spawns the returned requests.
    pub fn begin_loading(&mut self) -> Vec<AssetRequest> {
        let requests = vec![
            AssetRequest::Environment(self.config.environment_url.clone()),
            AssetRequest::Model(self.config.model_url.clone()),
        ];
        for _ in &requests {
            self.progress.item_started();
        }
        self.progress_sink.set_percent(self.config.initial_progress);
        requests
    }

    pub fn model_loaded(&self) -> bool {
        self.model_loaded
    }

    pub fn loading_state(&self) -> LoadStatus {
        self.progress.status()
    }

    pub fn hotspot_visible(&self, index: usize) -> Option<bool> {
        self.tracker.is_visible(index)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn handle_message(&mut self, message: AssetMessage) {
        match message {
            AssetMessage::ModelLoaded { url, asset } => {
                let mut root = asset.root.clone();
                let offset = root.recenter();
                self.model_transform = Mat4::from_translation(offset);
                self.scene.add(root);
                // Embedded textures count towards completion like any other item.
                for _ in texture_requests(&asset) {
                    self.progress.item_started();
                }
                self.backend.upload_model(&asset, &self.tx);
                self.model_loaded = true;
                log::info!("Model {} ready, recentred by {:?}", url, offset);
                self.progress.item_loaded(&mut self.progress_sink);
            }
            AssetMessage::EnvironmentLoaded { url, map } => {
                self.backend.upload_environment(&map);
                log::info!("Environment {} ready ({}x{})", url, map.width, map.height);
                self.progress.item_loaded(&mut self.progress_sink);
            }
            AssetMessage::TextureLoaded { image_index, slot, view } => {
                self.backend.upload_texture(image_index, slot, view);
                self.progress.item_loaded(&mut self.progress_sink);
            }
            AssetMessage::TextureFailed { image_index, error } => {
                self.progress.item_failed(format!("{} (image {})", error, image_index), &mut self.progress_sink);
            }
            AssetMessage::Failed { url, error } => {
                self.progress.item_failed(format!("{} ({})", error, url), &mut self.progress_sink);
            }
        }
    }

    /// Window resize in CSS pixels. Returns the backing-store size the canvas
    /// should be given.
    pub fn resize(&mut self, css_width: f64, css_height: f64, device_pixel_ratio: f64) -> (u32, u32) {
        self.viewport.resize(css_width, css_height, device_pixel_ratio);
        if !self.camera.set_viewport(self.viewport.width(), self.viewport.height()) {
            log::debug!("Ignoring degenerate viewport {}x{}", css_width, css_height);
        }
        let (width, height) = self.viewport.physical_size();
        self.backend.resize(width, height);
        (width, height)
    }

    pub fn pointer_down(&mut self, pointer_id: i32, x: f32, y: f32) {
        self.drag = Some(Drag { pointer_id, last: vec2(x, y) });
    }

    pub fn pointer_move(&mut self, pointer_id: i32, x: f32, y: f32) {
        let Some(drag) = self.drag.as_mut() else {
            return;
        };
        if drag.pointer_id != pointer_id {
            return;
        }
        let position = vec2(x, y);
        let delta = position - drag.last;
        drag.last = position;
        self.controls.rotate_by_pixels(delta.x, delta.y, self.viewport.height());
    }

    pub fn pointer_up(&mut self, pointer_id: i32) {
        if self.drag.is_some_and(|d| d.pointer_id == pointer_id) {
            self.drag = None;
        }
    }

    pub fn wheel(&mut self, delta_y: f32) {
        self.controls.wheel(delta_y);
    }
}

impl<M: HotspotMarker, B: RenderBackend, S: ProgressSink> FrameClock for ViewerState<M, B, S> {
    /// One frame: drain finished loads, step the controls, move the markers,
    /// draw.
    fn tick(&mut self, timestamp_ms: f64) {
        while let Ok(message) = self.rx.try_recv() {
            self.handle_message(message);
        }

        self.controls.update(&mut self.camera);

        if self.model_loaded {
            self.tracker.update_all(&self.camera, &self.scene, self.viewport.width(), self.viewport.height());
        }

        self.backend.render(&self.camera, self.model_transform);

        if self.last_timestamp_ms.is_none() {
            log::info!("First frame at {:.1} ms", timestamp_ms);
        }
        self.last_timestamp_ms = Some(timestamp_ms);
        self.frame_count += 1;
    }
}
