use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced to callers of the sync engine.
///
/// Job-status "not found" is deliberately absent: the tracker treats it as a
/// terminal signal (see [`crate::app::model::JobLookup::NotFound`]).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication required")]
    Authentication,

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("site not found: {0}")]
    SiteNotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transport error: {0:#}")]
    Transport(#[from] anyhow::Error),
}

impl SyncError {
    /// Maps a non-success HTTP status from the crawl service.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = if body.trim().is_empty() {
            status.to_string()
        } else {
            format!("{status}: {}", body.trim())
        };
        match status {
            StatusCode::UNAUTHORIZED => Self::Authentication,
            StatusCode::FORBIDDEN => Self::Permission(detail),
            StatusCode::NOT_FOUND => Self::SiteNotFound(detail),
            StatusCode::CONFLICT => Self::Conflict(detail),
            s if s.is_client_error() => Self::Validation(detail),
            _ => Self::Transport(anyhow::anyhow!("crawl service returned {detail}")),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication | Self::Permission(_))
    }

    /// A copy for every caller that shared one failed request. Transport causes
    /// are flattened to their message.
    pub fn to_shared(&self) -> Self {
        match self {
            Self::Validation(msg) => Self::Validation(msg.clone()),
            Self::Authentication => Self::Authentication,
            Self::Permission(msg) => Self::Permission(msg.clone()),
            Self::SiteNotFound(msg) => Self::SiteNotFound(msg.clone()),
            Self::Conflict(msg) => Self::Conflict(msg.clone()),
            Self::Transport(err) => Self::Transport(anyhow::anyhow!("{err:#}")),
        }
    }

    /// Only transport failures are worth retrying; everything else needs the caller to act.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(anyhow::Error::new(err))
    }
}
