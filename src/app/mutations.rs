use std::sync::Arc;

use crate::app::client::CrawlService;
use crate::app::model::{Site, SiteDraft, SitePatch, SiteStatus};
use crate::app::refresh::Refresher;
use crate::app::store::SiteStore;
use crate::error::SyncError;

/// Create/update/delete/start against the service, reflected in the store.
///
/// Only `add` is optimistic. Update and delete touch the store after the service
/// confirms, since a half-applied edit is worse than a brief stale row.
pub struct SiteMutations {
    store: Arc<SiteStore>,
    service: Arc<dyn CrawlService>,
    refresher: Arc<Refresher>,
}

impl SiteMutations {
    pub fn new(
        store: Arc<SiteStore>,
        service: Arc<dyn CrawlService>,
        refresher: Arc<Refresher>,
    ) -> Self {
        Self {
            store,
            service,
            refresher,
        }
    }

    pub async fn add(&self, draft: SiteDraft) -> Result<Site, SyncError> {
        draft.validate()?;

        let snapshot = self.store.snapshot();
        let temp = Site::optimistic(&draft);
        let temp_id = temp.id.clone();
        self.store.insert_front(temp);
        tracing::debug!(site_id = %temp_id, "inserted optimistic site");

        let created = match self.service.create_site(&draft).await {
            Ok(created) => created,
            Err(err) => {
                self.roll_back(&temp_id, snapshot);
                tracing::warn!(site_id = %temp_id, %err, "create site failed; rolled back");
                return Err(err);
            }
        };

        self.store.swap(&temp_id, created.clone());
        tracing::info!(site_id = %created.id, name = %created.name, "site created");

        self.invalidate().await;
        Ok(created)
    }

    pub async fn update(&self, site_id: &str, draft: SiteDraft) -> Result<Site, SyncError> {
        draft.validate()?;
        let updated = self.service.update_site(site_id, &draft).await?;
        let fields = SitePatch {
            name: Some(updated.name.clone()),
            url: Some(updated.url.clone()),
            config: Some(updated.config.clone()),
            ..Default::default()
        };
        // Only configuration changes here; job tracking fields belong to the tracker.
        if !self.store.patch(site_id, &fields) {
            self.store.upsert_many(vec![updated.clone()]);
        }
        tracing::info!(site_id, "site updated");
        self.invalidate().await;
        Ok(updated)
    }

    pub async fn remove(&self, site_id: &str) -> Result<(), SyncError> {
        self.service.delete_site(site_id).await?;
        self.store.remove(site_id);
        tracing::info!(site_id, "site deleted");
        self.invalidate().await;
        Ok(())
    }

    /// Starts a crawl. A site runs at most one job, and the call is never retried
    /// because the service does not deduplicate starts.
    pub async fn start_crawl(&self, site_id: &str) -> Result<String, SyncError> {
        let site = self
            .store
            .get(site_id)
            .ok_or_else(|| SyncError::SiteNotFound(site_id.to_string()))?;
        if site.is_temporary() {
            return Err(SyncError::Validation(format!(
                "site {site_id} has not been saved yet"
            )));
        }
        if let Some(job_id) = &site.job_id {
            return Err(SyncError::Conflict(format!(
                "crawl {job_id} already running for site {site_id}"
            )));
        }

        let started = self.service.start_job(site_id).await?;
        let patch = SitePatch {
            status: Some(SiteStatus::Crawling),
            progress: Some(Some(0)),
            job_id: Some(Some(started.job_id.clone())),
            ..Default::default()
        };
        if !self.store.patch(site_id, &patch) {
            tracing::warn!(site_id, job_id = %started.job_id, "site removed before crawl start landed");
        }
        tracing::info!(site_id, job_id = %started.job_id, "crawl started");
        Ok(started.job_id)
    }

    /// Restores the pre-insert snapshot when nothing else wrote meanwhile; otherwise
    /// drops only the temporary record so concurrent patches survive.
    fn roll_back(&self, temp_id: &str, snapshot: Vec<Site>) {
        let mut current = self.store.snapshot();
        current.retain(|s| s.id != temp_id);
        if current == snapshot {
            self.store.restore(snapshot);
        } else {
            self.store.remove(temp_id);
        }
    }

    async fn invalidate(&self) {
        if let Err(err) = self.refresher.refresh_all().await {
            tracing::warn!(%err, "refresh after mutation failed");
        }
    }
}
