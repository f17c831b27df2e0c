use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A mutating call was given an empty key part where silence would hide intent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The request log table does not exist yet. Reporting queries treat this as "no data".
    #[error("request log table has not been initialized")]
    MissingTable,
    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Storage(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        if e.to_string().contains("no such table") {
            return StoreError::MissingTable;
        }
        StoreError::Storage(e)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
