use thiserror::Error;

/// Errors surfaced by the public analytics operations.
///
/// Curation adapter failures are contained inside the ranking pipeline
/// (the pre-curation order is used instead) and never show up here.
/// An aggregation re-run hitting an existing row is not an error either;
/// the job reports it as `AlreadyAggregated`.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Bad request data: unknown metric type, negative limit, malformed
    /// date range. Never worth retrying.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying store failed. Surfaced on both the write and read
    /// path; the engine does not retry on its own.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// A caller-supplied deadline expired before the operation finished.
    #[error("operation timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;

impl AnalyticsError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        AnalyticsError::InvalidArgument(msg.into())
    }
}
