use thiserror::Error;

/// What a worker should do after an operation fails with a given error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient — nack and retry with backoff, up to the retry budget.
    Retry,
    /// Terminal — mark the queue item failed, do not retry.
    Fail,
    /// Not actually an error from the pipeline's point of view (e.g. a
    /// duplicate delivery of an already-persisted segment) — ack and move on.
    Success,
    /// Drop the event without persisting or broadcasting anything.
    Drop,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("segment not found: {0}")]
    SegmentNotFound(String),

    #[error("frame decode failed: {0}")]
    DecodeFailed(String),

    #[error("remote worker timed out: {0}")]
    RemoteTimeout(String),

    #[error("remote worker unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("adapter transient failure: {0}")]
    AdapterTransient(String),

    #[error("ambiguous capability claimed by more than one active provider: {0}")]
    AmbiguousCapability(String),

    #[error("no active provider configured for capability: {0}")]
    UnconfiguredCapability(String),

    #[error("provider config reload failed: {0}")]
    ConfigReloadFailed(String),

    #[error("duplicate segment analysis: {0}")]
    DuplicateSegmentAnalysis(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error for the worker pool's state machine.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            Error::DuplicateSegmentAnalysis(_) => Disposition::Success,
            Error::SegmentNotFound(_) => Disposition::Drop,
            Error::RemoteTimeout(_) | Error::RemoteUnreachable(_) | Error::AdapterTransient(_) => {
                Disposition::Retry
            }
            Error::Redis(_) | Error::Http(_) => Disposition::Retry,
            Error::Database(e) if crate::resilience::retry::should_retry_error(e) => {
                Disposition::Retry
            }
            // UnconfiguredCapability and everything else below: terminal, no retry.
            _ => Disposition::Fail,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::NotFound("resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    "23505" => {
                        Error::DuplicateSegmentAnalysis(db_err.message().to_string())
                    }
                    "23503" => Error::NotFound("referenced resource not found".to_string()),
                    "23514" => Error::InvalidInput("constraint check failed".to_string()),
                    "23502" => Error::InvalidInput("required field is missing".to_string()),
                    _ => Error::Database(err),
                }
            }
            _ => Error::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_segment_analysis_is_treated_as_success() {
        let err = Error::DuplicateSegmentAnalysis("stream-1/seg-3.ts/object_detection".into());
        assert_eq!(err.disposition(), Disposition::Success);
    }

    #[test]
    fn remote_timeout_is_retried() {
        let err = Error::RemoteTimeout("worker-1".into());
        assert_eq!(err.disposition(), Disposition::Retry);
    }

    #[test]
    fn missing_segment_is_dropped_not_retried() {
        let err = Error::SegmentNotFound("/media/seg-7.ts".into());
        assert_eq!(err.disposition(), Disposition::Drop);
    }

    #[test]
    fn unconfigured_capability_fails_without_retry() {
        let err = Error::UnconfiguredCapability("logo_detection".into());
        assert_eq!(err.disposition(), Disposition::Fail);
    }
}
