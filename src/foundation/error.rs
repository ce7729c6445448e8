use crate::foundation::core::MediaTime;

pub type MuxResult<T> = Result<T, MuxError>;

#[derive(thiserror::Error, Debug)]
pub enum MuxError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("construction error: {0}")]
    Construction(String),

    #[error("missing {track} track sample at {at}")]
    MissingTrackSample { track: &'static str, at: MediaTime },

    #[error("composite unavailable: {0}")]
    CompositeUnavailable(String),

    #[error("append rejected: {0}")]
    AppendRejected(String),

    #[error("sink failure: {0}")]
    SinkFailure(String),

    #[error("session cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MuxError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn construction(msg: impl Into<String>) -> Self {
        Self::Construction(msg.into())
    }

    pub fn composite(msg: impl Into<String>) -> Self {
        Self::CompositeUnavailable(msg.into())
    }

    pub fn append_rejected(msg: impl Into<String>) -> Self {
        Self::AppendRejected(msg.into())
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::SinkFailure(msg.into())
    }

    pub fn missing_sample(track: &'static str, at: MediaTime) -> Self {
        Self::MissingTrackSample { track, at }
    }

    /// Cancellation is reported through the failure path but is not an error condition.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Re-tag any error raised while opening collaborators as a construction failure.
    pub(crate) fn into_construction(self, what: &str) -> Self {
        match self {
            Self::Construction(_) => self,
            other => Self::Construction(format!("{what}: {other}")),
        }
    }
}
