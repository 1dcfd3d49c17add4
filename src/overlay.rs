use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, HtmlElement};

use crate::config::ViewerConfig;
use crate::error::{ViewerError, ViewerResult};
use crate::hotspot::HotspotMarker;
use crate::progress::ProgressSink;

pub fn query_element(document: &Document, selector: &str) -> ViewerResult<HtmlElement> {
    document
        .query_selector(selector)?
        .ok_or_else(|| ViewerError::MissingElement(selector.to_string()))?
        .dyn_into::<HtmlElement>()
        .map_err(|_| ViewerError::MissingElement(selector.to_string()))
}

/// CSS transform for a marker offset from the viewport centre.
pub fn translate_css(x: f32, y: f32) -> String {
    format!("translate({}px, {}px)", x, y)
}

/// A hotspot's DOM element. Writes are skipped when nothing changed so a
/// still camera does not touch the style system every frame.
pub struct DomMarker {
    element: HtmlElement,
    visible_class: String,
    visible: Option<bool>,
    transform: String,
}

impl DomMarker {
    pub fn new(element: HtmlElement, visible_class: &str) -> Self {
        Self { element, visible_class: visible_class.to_string(), visible: None, transform: String::new() }
    }
}

impl HotspotMarker for DomMarker {
    fn set_visible(&mut self, visible: bool) {
        if self.visible == Some(visible) {
            return;
        }
        self.visible = Some(visible);
        let classes = self.element.class_list();
        let result = if visible { classes.add_1(&self.visible_class) } else { classes.remove_1(&self.visible_class) };
        if let Err(e) = result {
            log::warn!("Failed to toggle marker class: {:?}", e);
        }
    }

    fn set_translation(&mut self, x: f32, y: f32) {
        let transform = translate_css(x, y);
        if transform == self.transform {
            return;
        }
        if let Err(e) = self.element.style().set_property("transform", &transform) {
            log::warn!("Failed to move marker: {:?}", e);
            return;
        }
        self.transform = transform;
    }
}

/// Resolve every configured hotspot selector up front through `lookup`. The
/// first selector without an element fails the whole set.
pub fn resolve_with<M>(config: &ViewerConfig, mut lookup: impl FnMut(&str) -> Option<M>) -> ViewerResult<Vec<M>> {
    config
        .hotspots
        .iter()
        .map(|spot| lookup(&spot.selector).ok_or_else(|| ViewerError::MissingElement(spot.selector.clone())))
        .collect()
}

pub fn resolve_markers(document: &Document, config: &ViewerConfig) -> ViewerResult<Vec<DomMarker>> {
    resolve_with(config, |selector| {
        query_element(document, selector)
            .ok()
            .map(|el| DomMarker::new(el, &config.visible_class))
    })
}

/// Progress bar plus the overlay that hosts it.
pub struct ProgressOverlay {
    bar: HtmlElement,
    overlay: HtmlElement,
    hide_delay_ms: i32,
    hide_callback: Option<Closure<dyn FnMut()>>,
}

impl ProgressOverlay {
    pub fn new(bar: HtmlElement, overlay: HtmlElement, hide_delay_ms: i32) -> Self {
        Self { bar, overlay, hide_delay_ms, hide_callback: None }
    }

    pub fn from_document(document: &Document, config: &ViewerConfig) -> ViewerResult<Self> {
        Ok(Self::new(
            query_element(document, &config.progress_selector)?,
            query_element(document, &config.overlay_selector)?,
            config.overlay_hide_delay_ms,
        ))
    }

    fn schedule_hide(&mut self) -> ViewerResult<()> {
        let window = web_sys::window().ok_or_else(|| ViewerError::Js("no window".to_string()))?;
        let overlay = self.overlay.clone();
        let callback = Closure::<dyn FnMut()>::new(move || {
            if let Err(e) = overlay.style().set_property("display", "none") {
                log::warn!("Failed to hide progress overlay: {:?}", e);
            }
        });
        window.set_timeout_with_callback_and_timeout_and_arguments_0(callback.as_ref().unchecked_ref(), self.hide_delay_ms)?;
        self.hide_callback = Some(callback);
        Ok(())
    }
}

impl ProgressSink for ProgressOverlay {
    fn set_percent(&mut self, percent: f32) {
        let width = format!("{}%", percent.clamp(0.0, 100.0));
        if let Err(e) = self.bar.style().set_property("width", &width) {
            log::warn!("Failed to update progress bar: {:?}", e);
        }
    }

    fn complete(&mut self) {
        if let Err(e) = self.schedule_hide() {
            log::warn!("Failed to schedule overlay hide: {}", e);
        }
    }

    fn fail(&mut self, message: &str) {
        if let Err(e) = self.overlay.class_list().add_1("error") {
            log::warn!("Failed to flag progress overlay: {:?}", e);
        }
        if let Err(e) = self.overlay.set_attribute("data-error", message) {
            log::warn!("Failed to attach load error to overlay: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_is_written_in_pixels() {
        assert_eq!(translate_css(12.5, -3.0), "translate(12.5px, -3px)");
        assert_eq!(translate_css(0.0, 0.0), "translate(0px, 0px)");
    }

    #[test]
    fn missing_hotspot_element_fails_resolution() {
        let config = ViewerConfig::default();
        let mut looked_up = Vec::new();
        let result = resolve_with(&config, |selector| {
            looked_up.push(selector.to_string());
            (selector != ".point-2").then_some(())
        });

        assert!(matches!(result, Err(ViewerError::MissingElement(ref s)) if s == ".point-2"));
        // Resolution stops at the first gap.
        assert_eq!(looked_up, vec![".point-0", ".point-1", ".point-2"]);
    }

    #[test]
    fn every_hotspot_resolves_in_order() {
        let config = ViewerConfig::default();
        let markers = resolve_with(&config, |selector| Some(selector.to_string())).unwrap();
        assert_eq!(markers.len(), config.hotspots.len());
        assert_eq!(markers[0], ".point-0");
    }
}
