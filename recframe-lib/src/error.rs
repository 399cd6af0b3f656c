#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The format configuration is malformed or incomplete. Raised only while
    /// constructing a session.
    #[error("Invalid format config: {0}")]
    Config(String),

    /// Opaque session state could not be restored.
    #[error("Invalid snapshot: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
