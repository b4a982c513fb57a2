use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The signaling channel closed before a reply arrived.
    #[error("signaling channel closed")]
    ChannelClosed,

    /// A newer call waiting on the same reply action replaced this one.
    #[error("call awaiting {0} superseded by a newer call")]
    Superseded(&'static str),

    #[error("media acquisition failed: {0}")]
    Acquisition(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
