use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SyncError;

/// Prefix for ids minted locally between an optimistic insert and server acknowledgment.
pub const TEMP_ID_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    #[default]
    Inactive,
    Pending,
    Crawling,
    Active,
    Error,
}

impl SiteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Pending => "pending",
            Self::Crawling => "crawling",
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    #[default]
    Manual,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CrawlConfig {
    pub depth: u32,
    #[serde(default)]
    pub cadence: Cadence,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            depth: Self::default_depth(),
            cadence: Cadence::Manual,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl CrawlConfig {
    pub fn default_depth() -> u32 {
        8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub config: CrawlConfig,
    #[serde(default)]
    pub status: SiteStatus,
    #[serde(default)]
    pub pages_crawled: u64,
    #[serde(default)]
    pub last_crawled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub job_id: Option<String>,
}

impl Site {
    /// Builds the placeholder record shown while a create call is outstanding.
    pub fn optimistic(draft: &SiteDraft) -> Self {
        Self {
            id: format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4().simple()),
            name: draft.name.trim().to_string(),
            url: draft.url.trim().to_string(),
            config: draft.config.clone(),
            status: SiteStatus::Inactive,
            pages_crawled: 0,
            last_crawled_at: None,
            progress: None,
            job_id: None,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    /// A job is tracked while it has an id and has not reported completion.
    pub fn has_unresolved_job(&self) -> bool {
        self.job_id.is_some() && self.progress.is_none_or(|p| p < 100)
    }

    /// Returns a new record with `patch` applied; the receiver is untouched.
    pub fn patched(&self, patch: &SitePatch) -> Self {
        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name = name.clone();
        }
        if let Some(url) = &patch.url {
            next.url = url.clone();
        }
        if let Some(config) = &patch.config {
            next.config = config.clone();
        }
        if let Some(status) = patch.status {
            next.status = status;
        }
        if let Some(pages) = patch.pages_crawled {
            next.pages_crawled = pages;
        }
        if let Some(at) = patch.last_crawled_at {
            next.last_crawled_at = Some(at);
        }
        if let Some(progress) = patch.progress {
            next.progress = progress.map(|p| p.min(100));
        }
        if let Some(job_id) = &patch.job_id {
            next.job_id = job_id.clone();
        }
        next
    }
}

/// Field-level update; `None` leaves a field alone, `Some(None)` clears an optional one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitePatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub config: Option<CrawlConfig>,
    pub status: Option<SiteStatus>,
    pub pages_crawled: Option<u64>,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub progress: Option<Option<u8>>,
    pub job_id: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteDraft {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub config: CrawlConfig,
}

impl SiteDraft {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            config: CrawlConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.name.trim().is_empty() {
            return Err(SyncError::Validation("name is required".to_string()));
        }
        let url = Url::parse(self.url.trim())
            .map_err(|err| SyncError::Validation(format!("invalid url {:?}: {err}", self.url)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::Validation(format!(
                "url must be http/https: {url}"
            )));
        }
        if self.config.depth == 0 {
            return Err(SyncError::Validation("depth must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartedJob {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub pages_crawled: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobLookup {
    Found(JobStatusReport),
    /// The service no longer knows the job; it finished or was dropped.
    NotFound,
}
