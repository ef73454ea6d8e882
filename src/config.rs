use std::time::Duration;

use anyhow::Context as _;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_MAX_CONCURRENT_POLLS: usize = 8;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub api_url: String,
    pub api_token: Option<String>,
    pub poll_interval: Duration,
    pub max_concurrent_polls: usize,
    pub request_timeout: Duration,
}

impl SyncConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_concurrent_polls: DEFAULT_MAX_CONCURRENT_POLLS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source so parsing stays testable.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let api_url = get("CRAWLSYNC_API_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .context("CRAWLSYNC_API_URL is required")?;
        url::Url::parse(&api_url)
            .with_context(|| format!("invalid CRAWLSYNC_API_URL={api_url:?}"))?;

        let api_token = get("CRAWLSYNC_API_TOKEN")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let mut config = Self::new(api_url);
        config.api_token = api_token;

        if let Some(raw) = get("CRAWLSYNC_POLL_INTERVAL_MS") {
            config.poll_interval = parse_poll_interval(&raw).with_context(|| {
                format!("invalid CRAWLSYNC_POLL_INTERVAL_MS={raw:?}")
            })?;
        }
        if let Some(raw) = get("CRAWLSYNC_MAX_CONCURRENT_POLLS") {
            config.max_concurrent_polls = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|v| *v >= 1)
                .with_context(|| {
                    format!("invalid CRAWLSYNC_MAX_CONCURRENT_POLLS={raw:?}. expected a positive integer")
                })?;
        }
        if let Some(raw) = get("CRAWLSYNC_REQUEST_TIMEOUT_SECS") {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|v| *v >= 1)
                .with_context(|| format!("invalid CRAWLSYNC_REQUEST_TIMEOUT_SECS={raw:?}"))?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

pub fn parse_poll_interval(raw: &str) -> anyhow::Result<Duration> {
    let ms: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("not a number of milliseconds: {raw:?}"))?;
    let interval = Duration::from_millis(ms);
    if interval < MIN_POLL_INTERVAL {
        anyhow::bail!(
            "poll interval must be at least {}ms",
            MIN_POLL_INTERVAL.as_millis()
        );
    }
    Ok(interval)
}
