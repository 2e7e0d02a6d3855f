use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Signal channel error: {0}")]
    SignalClosed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
