use thiserror::Error;

pub type Result<T> = std::result::Result<T, TopologyError>;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("remote status source not configured")]
    RemoteNotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid status payload: {0}")]
    InvalidPayload(String),

    #[error("mesh client failed: {0}")]
    MeshClient(String),

    #[error("mesh client timed out after {0} ms")]
    MeshTimeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
