use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Zone #{index} is degenerate: start and end points are equal")]
    DegenerateZone { index: usize },

    #[error("Storage Error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream Error: {0}")]
    Stream(String),

    #[error("Assignment Error: {0}")]
    Assignment(String),

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

impl Error {
    #[inline]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Configuration errors are the only ones that halt a stream before it starts.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::DegenerateZone { .. })
    }
}
