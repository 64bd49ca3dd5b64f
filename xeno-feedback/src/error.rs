use thiserror::Error;

/// Errors raised by the feedback layer.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("no outcomes recorded in the current window")]
    NoData,
    #[error("unknown metric {0}")]
    UnknownMetric(String),
    #[error("persistence is disabled in the configuration")]
    PersistenceDisabled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot format error: {0}")]
    Format(String),
    #[error("backup {0} not found")]
    BackupNotFound(String),
    #[error("no A/B test is active")]
    NoActiveTest,
    #[error("strategy {0} is not part of the active A/B test")]
    UnknownStrategy(String),
}
