use thiserror::Error;
use warp_protocol::Token;

/// Daemon-side error taxonomy. Every variant is local to one session: it
/// terminates that session and is logged with its remote address and warp
/// token, never crashing the daemon.
#[derive(Error, Debug)]
pub enum WarpError {
    #[error("warp already in use: {0}")]
    DuplicateWarp(Token),

    #[error("unknown warp: {0}")]
    UnknownWarp(Token),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("peer disconnected")]
    Disconnected,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for WarpError {
    fn from(e: serde_json::Error) -> Self {
        WarpError::Decode(e.to_string())
    }
}
