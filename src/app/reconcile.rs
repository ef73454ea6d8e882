use crate::app::model::SiteStatus;

/// Classified remote job status token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteJobState {
    Running,
    Completed,
    Failed,
    Unknown,
}

impl RemoteJobState {
    pub fn classify(token: Option<&str>) -> Self {
        let Some(token) = token else {
            return Self::Unknown;
        };
        let token = token.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match token.as_str() {
            "running" | "crawling" | "in_progress" | "processing" | "started" | "queued"
            | "pending" | "scraping" => Self::Running,
            "completed" | "complete" | "done" | "finished" | "success" | "succeeded" => {
                Self::Completed
            }
            "failed" | "error" | "errored" | "cancelled" | "canceled" | "aborted" | "timeout" => {
                Self::Failed
            }
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn local_status(self) -> Option<SiteStatus> {
        match self {
            Self::Running => Some(SiteStatus::Crawling),
            Self::Completed => Some(SiteStatus::Active),
            Self::Failed => Some(SiteStatus::Error),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub state: RemoteJobState,
    pub status: SiteStatus,
    pub progress: Option<u8>,
}

impl Reconciled {
    /// Whether the job should be retired after this observation.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal() || self.progress == Some(100)
    }
}

/// Maps a remote status report onto local status and progress.
///
/// `previous_progress` must be the value last observed for the *same* job id;
/// the result never goes below it.
pub fn reconcile(
    remote_status: Option<&str>,
    remote_progress: Option<f64>,
    previous_status: SiteStatus,
    previous_progress: Option<u8>,
) -> Reconciled {
    let state = RemoteJobState::classify(remote_status);
    let status = state.local_status().unwrap_or(previous_status);

    let observed = remote_progress.and_then(clamp_progress);
    let progress = match (previous_progress, observed) {
        (Some(prev), Some(next)) => Some(prev.max(next)),
        (prev, None) => prev,
        (None, next) => next,
    };

    // A completed job is complete regardless of the last percentage it reported.
    let progress = if state == RemoteJobState::Completed {
        Some(100)
    } else {
        progress
    };

    // Progress 100 with a still-running token means the crawl is done.
    let status = if progress == Some(100) && state == RemoteJobState::Running {
        SiteStatus::Active
    } else {
        status
    };

    Reconciled {
        state,
        status,
        progress,
    }
}

fn clamp_progress(raw: f64) -> Option<u8> {
    if raw.is_nan() {
        return None;
    }
    Some(raw.clamp(0.0, 100.0).round() as u8)
}
