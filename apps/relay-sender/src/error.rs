use std::{path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("uplink is not connected")]
    NotConnected,
    #[error("hub closed the connection: {0}")]
    Closed(String),
    #[error("hub refused admission: {0}")]
    Rejected(String),
    #[error("failed to read frames: {0}")]
    Io(#[from] std::io::Error),
    #[error("no frame files in {}", .0.display())]
    EmptyFrameDir(PathBuf),
    #[error("gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl SenderError {
    /// Errors that reconnecting cannot fix.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SenderError::Rejected(_) | SenderError::ReconnectExhausted { .. }
        )
    }
}
