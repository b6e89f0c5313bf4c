pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An id contained path separators or dot segments.
    #[error("refusing to use {id:?} as a path segment")]
    BadId { id: String },

    /// The blocking worker was cancelled mid-operation.
    #[error("filesystem task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}
