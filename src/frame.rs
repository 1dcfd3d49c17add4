use std::cell::{Cell, RefCell};
use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{AddEventListenerOptions, Event, EventTarget};

use crate::error::{ViewerError, ViewerResult};

/// Anything driven once per display frame.
pub trait FrameClock {
    fn tick(&mut self, timestamp_ms: f64);
}

type FrameCallback = Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>>;

/// `requestAnimationFrame` loop around a shared clock. Runs until dropped.
pub struct AnimationLoop {
    callback: FrameCallback,
    pending: Rc<Cell<Option<i32>>>,
}

impl AnimationLoop {
    pub fn start<C: FrameClock + 'static>(clock: Rc<RefCell<C>>) -> ViewerResult<Self> {
        let window = web_sys::window().ok_or_else(|| ViewerError::Js("no window".to_string()))?;
        let callback: FrameCallback = Rc::new(RefCell::new(None));
        let pending = Rc::new(Cell::new(None));

        let next = callback.clone();
        let next_pending = pending.clone();
        let frame_window = window.clone();
        *callback.borrow_mut() = Some(Closure::new(move |timestamp_ms: f64| {
            next_pending.set(None);
            match clock.try_borrow_mut() {
                Ok(mut clock) => clock.tick(timestamp_ms),
                Err(_) => log::warn!("Frame skipped: viewer state is busy"),
            }
            if let Some(cb) = next.borrow().as_ref() {
                match frame_window.request_animation_frame(cb.as_ref().unchecked_ref()) {
                    Ok(id) => next_pending.set(Some(id)),
                    Err(e) => log::error!("requestAnimationFrame failed: {:?}", e),
                }
            }
        }));

        if let Some(cb) = callback.borrow().as_ref() {
            pending.set(Some(window.request_animation_frame(cb.as_ref().unchecked_ref())?));
        }

        Ok(Self { callback, pending })
    }
}

impl Drop for AnimationLoop {
    fn drop(&mut self) {
        if let (Some(id), Some(window)) = (self.pending.take(), web_sys::window()) {
            let _ = window.cancel_animation_frame(id);
        }
        // Breaks the closure's reference to itself.
        self.callback.borrow_mut().take();
    }
}

/// DOM event listener removed again when dropped.
pub struct EventListener {
    target: EventTarget,
    event: &'static str,
    callback: Closure<dyn FnMut(Event)>,
}

impl EventListener {
    pub fn new(target: &EventTarget, event: &'static str, handler: impl FnMut(Event) + 'static) -> ViewerResult<Self> {
        let callback = Closure::<dyn FnMut(Event)>::new(handler);
        target.add_event_listener_with_callback(event, callback.as_ref().unchecked_ref())?;
        Ok(Self { target: target.clone(), event, callback })
    }

    /// Non-passive listener, required for handlers that call
    /// `prevent_default` on wheel or touch events.
    pub fn active(target: &EventTarget, event: &'static str, handler: impl FnMut(Event) + 'static) -> ViewerResult<Self> {
        let callback = Closure::<dyn FnMut(Event)>::new(handler);
        let options = AddEventListenerOptions::new();
        options.set_passive(false);
        target.add_event_listener_with_callback_and_add_event_listener_options(
            event,
            callback.as_ref().unchecked_ref(),
            &options,
        )?;
        Ok(Self { target: target.clone(), event, callback })
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        let _ = self
            .target
            .remove_event_listener_with_callback(self.event, self.callback.as_ref().unchecked_ref());
    }
}
