//! Error types for the dashboard core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashError {
    /// The backend answered `start` with its reserved `error` sentinel
    #[error("Backend unavailable: the application under test could not be reached. Please try again later.")]
    BackendUnavailable,

    #[error("A batch is already running")]
    AlreadyRunning,

    #[error("Network error: {0}")]
    TransientNetwork(#[from] reqwest::Error),

    #[error("{resource} returned HTTP {status}")]
    HttpStatus { resource: String, status: u16 },

    #[error("Malformed event frame: {0}")]
    ProtocolDecode(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Dashboard loop has stopped")]
    DashboardStopped,

    #[error("Invalid machine id: {0}")]
    InvalidMachine(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl DashError {
    /// Conditions a retry loop recovers from on its next tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DashError::TransientNetwork(_) | DashError::HttpStatus { .. } | DashError::ConnectionLost(_)
        )
    }
}

pub type DashResult<T> = Result<T, DashError>;
