use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Event, HtmlCanvasElement, PointerEvent, WheelEvent, Window};

#[cfg(feature = "console_error_panic_hook")]
use std::panic;

pub mod camera;
pub mod config;
pub mod controls;
pub mod environment;
pub mod error;
pub mod frame;
pub mod hotspot;
pub mod loader;
pub mod model;
pub mod overlay;
pub mod progress;
pub mod raycast;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod state;
pub mod uniforms;
pub mod viewport;

use config::ViewerConfig;
use error::{ViewerError, ViewerResult};
use frame::{AnimationLoop, EventListener};
use overlay::{query_element, resolve_markers, DomMarker, ProgressOverlay};
use renderer::Renderer;
use state::ViewerState;
use viewport::Viewport;

type SharedState = Rc<RefCell<ViewerState<DomMarker, Renderer, ProgressOverlay>>>;

/// Handle returned to the page. Dropping it stops the frame loop and removes
/// the input listeners.
#[wasm_bindgen]
pub struct Viewer {
    state: SharedState,
    _animation: AnimationLoop,
    _listeners: Vec<EventListener>,
}

#[wasm_bindgen]
impl Viewer {
    /// Visibility of hotspot `index` as of the last frame, `undefined` before
    /// the model has loaded.
    #[wasm_bindgen(js_name = "hotspotVisible")]
    pub fn hotspot_visible(&self, index: usize) -> Option<bool> {
        self.state.try_borrow().ok()?.hotspot_visible(index)
    }

    /// One of `idle`, `loading`, `complete`, `failed`.
    #[wasm_bindgen(js_name = "loadingState")]
    pub fn loading_state(&self) -> String {
        match self.state.try_borrow() {
            Ok(state) => state.loading_state().as_str().to_string(),
            Err(_) => "busy".to_string(),
        }
    }
}

#[wasm_bindgen(js_name = "startViewer")]
pub async fn start_viewer(container_selector: Option<String>, config_json: Option<String>) -> Result<Viewer, JsValue> {
    #[cfg(feature = "console_error_panic_hook")]
    panic::set_hook(Box::new(console_error_panic_hook::hook));

    if console_log::init_with_level(log::Level::Info).is_err() {
        log::debug!("Logger already initialised");
    }

    let mut config = ViewerConfig::from_json(config_json.as_deref())?;
    if let Some(selector) = container_selector {
        config.container_selector = selector;
    }

    match build_viewer(config).await {
        Ok(viewer) => Ok(viewer),
        Err(err) => {
            log::error!("Viewer failed to start: {}", err);
            Err(err.into())
        }
    }
}

fn is_mobile(window: &Window) -> bool {
    let agent = window.navigator().user_agent().unwrap_or_default();
    ["Mobi", "Android", "iPhone", "iPad"].iter().any(|needle| agent.contains(needle))
}

fn window_size(window: &Window) -> (f64, f64, f64) {
    let width = window.inner_width().ok().and_then(|v| v.as_f64()).unwrap_or(0.0);
    let height = window.inner_height().ok().and_then(|v| v.as_f64()).unwrap_or(0.0);
    (width, height, window.device_pixel_ratio())
}

fn size_canvas(canvas: &HtmlCanvasElement, width: u32, height: u32) {
    canvas.set_width(width);
    canvas.set_height(height);
}

async fn build_viewer(config: ViewerConfig) -> ViewerResult<Viewer> {
    log::info!("Initializing viewer...");

    let window = web_sys::window().ok_or_else(|| ViewerError::Js("no window".to_string()))?;
    let document = window.document().ok_or_else(|| ViewerError::Js("no document".to_string()))?;

    let container = query_element(&document, &config.container_selector)?;
    let markers = resolve_markers(&document, &config)?;
    let progress = ProgressOverlay::from_document(&document, &config)?;

    let canvas: HtmlCanvasElement = document
        .create_element("canvas")?
        .dyn_into()
        .map_err(|_| ViewerError::Js("canvas element is not an HtmlCanvasElement".to_string()))?;
    let style = canvas.style();
    style.set_property("display", "block")?;
    style.set_property("width", "100%")?;
    style.set_property("height", "100%")?;
    style.set_property("touch-action", "none")?;
    container.append_child(&canvas)?;

    let (css_width, css_height, dpr) = window_size(&window);
    let viewport = Viewport::new(css_width, css_height, dpr, config.render.max_pixel_ratio);
    let (width, height) = viewport.physical_size();
    size_canvas(&canvas, width, height);

    let renderer = Renderer::new(canvas.clone(), is_mobile(&window), &config.render).await?;

    let mut state = ViewerState::new(config, markers, viewport, renderer, progress);
    let tx = state.sender();
    for request in state.begin_loading() {
        loader::spawn_load(request, tx.clone());
    }
    let state: SharedState = Rc::new(RefCell::new(state));

    let listeners = install_listeners(&window, &canvas, &state)?;
    let animation = AnimationLoop::start(state.clone())?;

    log::info!("Viewer running");
    Ok(Viewer { state, _animation: animation, _listeners: listeners })
}

fn install_listeners(window: &Window, canvas: &HtmlCanvasElement, state: &SharedState) -> ViewerResult<Vec<EventListener>> {
    let mut listeners = Vec::new();

    {
        let state = state.clone();
        let canvas = canvas.clone();
        let resize_window = window.clone();
        listeners.push(EventListener::new(window, "resize", move |_: Event| {
            let (css_width, css_height, dpr) = window_size(&resize_window);
            let (width, height) = state.borrow_mut().resize(css_width, css_height, dpr);
            size_canvas(&canvas, width, height);
        })?);
    }

    {
        let state = state.clone();
        let target = canvas.clone();
        listeners.push(EventListener::new(canvas, "pointerdown", move |event: Event| {
            if let Some(event) = event.dyn_ref::<PointerEvent>() {
                let id = event.pointer_id();
                state.borrow_mut().pointer_down(id, event.client_x() as f32, event.client_y() as f32);
                let _ = target.set_pointer_capture(id);
            }
        })?);
    }

    {
        let state = state.clone();
        listeners.push(EventListener::new(canvas, "pointermove", move |event: Event| {
            if let Some(event) = event.dyn_ref::<PointerEvent>() {
                state.borrow_mut().pointer_move(event.pointer_id(), event.client_x() as f32, event.client_y() as f32);
            }
        })?);
    }

    for name in ["pointerup", "pointercancel"] {
        let state = state.clone();
        listeners.push(EventListener::new(canvas, name, move |event: Event| {
            if let Some(event) = event.dyn_ref::<PointerEvent>() {
                state.borrow_mut().pointer_up(event.pointer_id());
            }
        })?);
    }

    {
        let state = state.clone();
        listeners.push(EventListener::active(canvas, "wheel", move |event: Event| {
            if let Some(event) = event.dyn_ref::<WheelEvent>() {
                event.prevent_default();
                state.borrow_mut().wheel(event.delta_y() as f32);
            }
        })?);
    }

    Ok(listeners)
}
