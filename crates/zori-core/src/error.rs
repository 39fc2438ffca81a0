use thiserror::Error;

pub type ZoriResult<T> = Result<T, ZoriError>;

#[derive(Debug, Error)]
pub enum ZoriError {
    /// Bad magic, short header, truncated record, or malformed document.
    #[error("format error: {0}")]
    Format(String),

    #[error("unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    /// Wrong password or corrupted envelope/pack; the two are never distinguished.
    #[error("authentication failed")]
    Authentication,

    #[error("chunk integrity error: {0}")]
    ChunkIntegrity(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ZoriError {
    pub fn format(msg: impl Into<String>) -> Self {
        ZoriError::Format(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        ZoriError::Store(msg.into())
    }
}
