use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoverageError {
    /// A listing call failed. Fatal for the run.
    #[error("query to {path} failed with status {status}: {body}")]
    QueryFailure {
        path: String,
        status: u16,
        body: String,
    },

    /// A single schedule detail could not be fetched. The schedule is skipped.
    #[error("failed to fetch schedule {schedule_id}: {reason}")]
    DetailFetchFailure { schedule_id: String, reason: String },

    #[error("malformed payload: {0}")]
    Mapping(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoverageError {
    pub fn mapping(message: impl Into<String>) -> Self {
        CoverageError::Mapping(message.into())
    }

    /// Whether the run must stop on this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CoverageError::DetailFetchFailure { .. } | CoverageError::Mapping(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoverageError>;
