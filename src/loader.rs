use std::rc::Rc;

use flume::Sender;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use crate::environment::EnvironmentMap;
use crate::error::{ViewerError, ViewerResult};
use crate::model::{parse_glb, ModelAsset, TextureSlot};

/// Results posted back to the frame loop by asynchronous loads.
#[derive(Debug)]
pub enum AssetMessage {
    ModelLoaded { url: String, asset: ModelAsset },
    EnvironmentLoaded { url: String, map: EnvironmentMap },
    /// Decoded embedded image. Applies to every slot that reads the image in
    /// the same colour space as `slot`.
    TextureLoaded { image_index: usize, slot: TextureSlot, view: Rc<wgpu::TextureView> },
    TextureFailed { image_index: usize, error: ViewerError },
    Failed { url: String, error: ViewerError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetRequest {
    Model(String),
    Environment(String),
}

impl AssetRequest {
    pub fn url(&self) -> &str {
        match self {
            AssetRequest::Model(url) | AssetRequest::Environment(url) => url,
        }
    }

    /// Turn fetched bytes into the message the frame loop consumes.
    pub fn decode(&self, bytes: &[u8]) -> AssetMessage {
        let url = self.url().to_string();
        let result = match self {
            AssetRequest::Model(_) => parse_glb(bytes).map(|asset| AssetMessage::ModelLoaded { url: url.clone(), asset }),
            AssetRequest::Environment(_) => {
                EnvironmentMap::decode_hdr(bytes).map(|map| AssetMessage::EnvironmentLoaded { url: url.clone(), map })
            }
        };
        result.unwrap_or_else(|error| AssetMessage::Failed { url, error })
    }
}

/// Fetch and decode one asset on the current thread's executor. Exactly one
/// message is sent per request.
pub fn spawn_load(request: AssetRequest, tx: Sender<AssetMessage>) {
    wasm_bindgen_futures::spawn_local(async move {
        log::info!("Loading {}", request.url());
        let message = match fetch_bytes(request.url()).await {
            Ok(bytes) => request.decode(&bytes),
            Err(error) => AssetMessage::Failed { url: request.url().to_string(), error },
        };
        if tx.send(message).is_err() {
            log::warn!("Frame loop gone before {} finished loading", request.url());
        }
    });
}

pub async fn fetch_bytes(url: &str) -> ViewerResult<Vec<u8>> {
    let fetch_error = |reason: String| ViewerError::Fetch { url: url.to_string(), reason };

    let window = web_sys::window().ok_or_else(|| fetch_error("no window".to_string()))?;
    let resp_val = JsFuture::from(window.fetch_with_str(url))
        .await
        .map_err(|e| fetch_error(format!("{:?}", e)))?;
    let resp: web_sys::Response = resp_val.dyn_into().map_err(|e| fetch_error(format!("{:?}", e)))?;

    if !resp.ok() {
        return Err(ViewerError::HttpStatus { url: url.to_string(), status: resp.status() });
    }

    let buffer = resp.array_buffer().map_err(|e| fetch_error(format!("{:?}", e)))?;
    let buffer = JsFuture::from(buffer).await.map_err(|e| fetch_error(format!("{:?}", e)))?;
    let array = js_sys::Uint8Array::new(&buffer);
    let mut bytes = vec![0u8; array.length() as usize];
    array.copy_to(&mut bytes);
    Ok(bytes)
}
