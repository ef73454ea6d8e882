use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::client::CrawlService;
use crate::app::model::{Site, SiteDraft};
use crate::app::mutations::SiteMutations;
use crate::app::refresh::Refresher;
use crate::app::stats::SiteStats;
use crate::app::store::SiteStore;
use crate::app::tracker::{JobPhase, JobTracker};
use crate::config::SyncConfig;
use crate::error::SyncError;

/// Client-side view of the crawl service's sites, kept in sync with running jobs.
pub struct SiteSync {
    store: Arc<SiteStore>,
    refresher: Arc<Refresher>,
    mutations: SiteMutations,
    tracker: Arc<JobTracker>,
}

impl SiteSync {
    /// `cancel` scopes the tracker; cancel it when the owner goes away.
    pub fn new(
        service: Arc<dyn CrawlService>,
        config: &SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        let store = Arc::new(SiteStore::new());
        let refresher = Arc::new(Refresher::new(Arc::clone(&store), Arc::clone(&service)));
        let mutations = SiteMutations::new(
            Arc::clone(&store),
            Arc::clone(&service),
            Arc::clone(&refresher),
        );
        let tracker = Arc::new(JobTracker::new(
            Arc::clone(&store),
            service,
            Arc::clone(&refresher),
            config.poll_interval,
            config.max_concurrent_polls,
            cancel,
        ));
        Self {
            store,
            refresher,
            mutations,
            tracker,
        }
    }

    pub fn store(&self) -> &Arc<SiteStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn sites(&self) -> Vec<Site> {
        self.store.list()
    }

    pub fn stats(&self) -> SiteStats {
        SiteStats::from_sites(&self.store.list())
    }

    pub fn phase(&self, site_id: &str) -> JobPhase {
        self.tracker.phase(site_id)
    }

    /// Rebuilds the store from the service, e.g. at launch.
    pub async fn load(&self) -> Result<(), SyncError> {
        self.refresh().await?;
        let tracked = self.tracker.tracked().len();
        tracing::info!(sites = self.store.len(), tracked, "loaded sites");
        Ok(())
    }

    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.refresher.refresh_all().await
    }

    pub async fn add(&self, draft: SiteDraft) -> Result<Site, SyncError> {
        self.mutations.add(draft).await
    }

    pub async fn update(&self, site_id: &str, draft: SiteDraft) -> Result<Site, SyncError> {
        self.mutations.update(site_id, draft).await
    }

    pub async fn remove(&self, site_id: &str) -> Result<(), SyncError> {
        self.mutations.remove(site_id).await
    }

    pub async fn start_crawl(&self, site_id: &str) -> Result<String, SyncError> {
        let job_id = self.mutations.start_crawl(site_id).await?;
        self.tracker.wake();
        Ok(job_id)
    }

    pub fn start_tracking(&self) -> JoinHandle<()> {
        self.tracker.spawn()
    }

    pub fn stop_tracking(&self) {
        self.tracker.cancel_token().cancel();
    }
}
