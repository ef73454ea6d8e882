use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::app::model::{JobLookup, JobStatusReport, Site, SiteDraft, StartedJob};
use crate::error::SyncError;

/// Remote crawl service: the system of record for sites and the owner of job execution.
#[async_trait]
pub trait CrawlService: Send + Sync {
    async fn create_site(&self, draft: &SiteDraft) -> Result<Site, SyncError>;
    async fn list_sites(&self) -> Result<Vec<Site>, SyncError>;

    /// Canonical state for one site. Services without a single-site endpoint
    /// fall back to a filtered full list.
    async fn get_site(&self, site_id: &str) -> Result<Option<Site>, SyncError> {
        let sites = self.list_sites().await?;
        Ok(sites.into_iter().find(|s| s.id == site_id))
    }

    async fn update_site(&self, site_id: &str, draft: &SiteDraft) -> Result<Site, SyncError>;
    async fn delete_site(&self, site_id: &str) -> Result<(), SyncError>;

    /// Not idempotent on the service side; callers must not retry blindly.
    async fn start_job(&self, site_id: &str) -> Result<StartedJob, SyncError>;
    async fn get_job_status(&self, job_id: &str) -> Result<JobLookup, SyncError>;
}

#[derive(Clone)]
pub struct HttpCrawlService {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpCrawlService {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            anyhow::bail!("crawl service base url is empty");
        }
        let base_url = Url::parse(base_url)
            .with_context(|| format!("parse crawl service base url {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("crawl service base url {base_url} cannot take a path");
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url,
            auth_token: auth_token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        })
    }

    pub fn from_config(config: &crate::config::SyncConfig) -> anyhow::Result<Self> {
        Self::new(
            &config.api_url,
            config.api_token.clone(),
            config.request_timeout,
        )
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("crawl service base url cannot take a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<Response, SyncError> {
        let resp = self
            .authorize(req)
            .send()
            .await
            .with_context(|| format!("send {what} request"))?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        tracing::debug!(%status, what, "crawl service rejected request");
        Err(SyncError::from_status(status, &body))
    }

    async fn json<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T, SyncError> {
        let value = resp
            .json::<T>()
            .await
            .with_context(|| format!("parse {what} response"))?;
        Ok(value)
    }
}

#[async_trait]
impl CrawlService for HttpCrawlService {
    async fn create_site(&self, draft: &SiteDraft) -> Result<Site, SyncError> {
        let req = self.client.post(self.url(&["sites"])?).json(draft);
        let resp = self.send(req, "create site").await?;
        Self::json(resp, "create site").await
    }

    async fn list_sites(&self) -> Result<Vec<Site>, SyncError> {
        let req = self.client.get(self.url(&["sites"])?);
        let resp = self.send(req, "list sites").await?;
        Self::json(resp, "list sites").await
    }

    async fn get_site(&self, site_id: &str) -> Result<Option<Site>, SyncError> {
        let req = self.client.get(self.url(&["sites", site_id])?);
        match self.send(req, "get site").await {
            Ok(resp) => Ok(Some(Self::json(resp, "get site").await?)),
            Err(SyncError::SiteNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn update_site(&self, site_id: &str, draft: &SiteDraft) -> Result<Site, SyncError> {
        let req = self
            .client
            .put(self.url(&["sites", site_id])?)
            .json(draft);
        let resp = self.send(req, "update site").await?;
        Self::json(resp, "update site").await
    }

    async fn delete_site(&self, site_id: &str) -> Result<(), SyncError> {
        let req = self.client.delete(self.url(&["sites", site_id])?);
        self.send(req, "delete site").await?;
        Ok(())
    }

    async fn start_job(&self, site_id: &str) -> Result<StartedJob, SyncError> {
        let req = self.client.post(self.url(&["sites", site_id, "jobs"])?);
        let resp = self.send(req, "start job").await?;
        Self::json(resp, "start job").await
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobLookup, SyncError> {
        let req = self.client.get(self.url(&["jobs", job_id])?);
        let resp = match self.authorize(req).send().await {
            Ok(resp) => resp,
            Err(err) => return Err(SyncError::from(err)),
        };
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(JobLookup::NotFound);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status, &body));
        }
        let report: JobStatusReport = Self::json(resp, "job status").await?;
        Ok(JobLookup::Found(report))
    }
}
