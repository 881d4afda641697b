//! Error types for the capture toolkit

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a capture session
#[derive(Error, Debug)]
pub enum Error {
    /// The privileged side of the message channel is gone
    #[error("message channel closed")]
    ChannelClosed,

    /// A second handler was registered for an already-claimed kind
    #[error("handler already registered for kind: {0}")]
    DuplicateHandler(String),

    /// The privileged side replied with an error response
    #[error("request failed: {message}")]
    Response {
        message: String,
        status_code: Option<u16>,
    },

    /// The reply arrived but did not carry the expected data shape
    #[error("unexpected response data: {0}")]
    UnexpectedResponse(String),

    /// Fetching a resource failed
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// A tile capture or the surrounding session failed
    #[error("capture failed: {0}")]
    Capture(String),

    /// DOM rasterization failed
    #[error("rendering failed: {0}")]
    Render(String),

    /// Inline image data could not be decoded
    #[error("invalid inline image data: {0}")]
    InlineData(String),

    /// Image encode/decode error
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// Serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Malformed URL
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
