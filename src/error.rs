use thiserror::Error;
use wasm_bindgen::JsValue;

pub type ViewerResult<T> = Result<T, ViewerError>;

/// Errors surfaced by the viewer. Load failures are terminal for the asset
/// that produced them; nothing here is retried.
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("No element matches selector `{0}`")]
    MissingElement(String),

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("HTTP {status} while fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Model parse error: {0}")]
    ModelParse(String),

    #[error("Environment decode error: {0}")]
    EnvironmentDecode(String),

    #[error("GPU setup failed: {0}")]
    Gpu(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Config JSON error: {0}")]
    ConfigJson(#[from] serde_json::Error),

    #[error("JavaScript error: {0}")]
    Js(String),
}

impl From<gltf::Error> for ViewerError {
    fn from(err: gltf::Error) -> Self {
        ViewerError::ModelParse(err.to_string())
    }
}

impl From<image::ImageError> for ViewerError {
    fn from(err: image::ImageError) -> Self {
        ViewerError::EnvironmentDecode(err.to_string())
    }
}

impl From<JsValue> for ViewerError {
    fn from(value: JsValue) -> Self {
        ViewerError::Js(value.as_string().unwrap_or_else(|| format!("{:?}", value)))
    }
}

impl From<ViewerError> for JsValue {
    fn from(err: ViewerError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}
