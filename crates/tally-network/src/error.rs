use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("peer {peer} unreachable: {reason}")]
    UnreachablePeer { peer: String, reason: String },

    #[error("peer {peer} timed out after {after_ms} ms")]
    Timeout { peer: String, after_ms: u64 },

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        NetworkError::MalformedMessage(reason.into())
    }
}
