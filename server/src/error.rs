use shared::{CalcError, ConfigError, EventError};
use uuid::Uuid;

/// Failure taxonomy for event processing. Only the pipeline decides what
/// happens to a failed event; everything below it fails fast and lets
/// the pipeline classify.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("malformed event: {0}")]
    MalformedEvent(#[from] EventError),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),

    #[error(transparent)]
    UnknownActivityType(#[from] CalcError),

    #[error("{0} unavailable, circuit open")]
    DownstreamUnavailable(&'static str),

    #[error("team member {0} not found")]
    MemberNotFound(Uuid),

    #[error("team {0} not found")]
    TeamNotFound(Uuid),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("cache error: {0}")]
    Cache(#[source] anyhow::Error),
}

impl ProcessError {
    /// Transient failures are retried with backoff and eventually
    /// redelivered; everything else is dead-lettered.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DownstreamUnavailable(_) | Self::Storage(_) | Self::Cache(_)
        )
    }

    /// Missing members/teams imply an upstream provisioning bug and are
    /// surfaced louder than ordinary rejections.
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, Self::MemberNotFound(_) | Self::TeamNotFound(_))
    }
}
