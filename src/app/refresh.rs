use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use tokio::sync::Mutex;

use crate::app::client::CrawlService;
use crate::app::merge;
use crate::app::model::SiteStatus;
use crate::app::store::SiteStore;
use crate::error::SyncError;

/// Pulls authoritative site state into the store through the merge guard.
pub struct Refresher {
    store: Arc<SiteStore>,
    service: Arc<dyn CrawlService>,
    gate: Mutex<()>,
    started: AtomicU64,
    // Failure of the latest full refresh; written and read only while `gate` is held.
    last_failure: std::sync::Mutex<Option<SyncError>>,
}

impl Refresher {
    pub fn new(store: Arc<SiteStore>, service: Arc<dyn CrawlService>) -> Self {
        Self {
            store,
            service,
            gate: Mutex::new(()),
            started: AtomicU64::new(0),
            last_failure: std::sync::Mutex::new(None),
        }
    }

    /// Number of full-list fetches issued so far.
    pub fn full_refreshes(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Replaces the store with the service's list.
    ///
    /// Callers that queue up behind a fetch which started after they asked share
    /// its result, failure included, instead of issuing another list request.
    pub async fn refresh_all(&self) -> Result<(), SyncError> {
        let requested_after = self.started.load(Ordering::SeqCst);
        let _guard = self.gate.lock().await;
        if self.started.load(Ordering::SeqCst) > requested_after {
            tracing::debug!("coalesced with a refresh that started after this request");
            return match self.failure().as_ref() {
                Some(err) => Err(err.to_shared()),
                None => Ok(()),
            };
        }
        self.started.fetch_add(1, Ordering::SeqCst);

        let outcome = self.fetch_all().await;
        *self.failure() = outcome.as_ref().err().map(SyncError::to_shared);
        outcome
    }

    fn failure(&self) -> std::sync::MutexGuard<'_, Option<SyncError>> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch_all(&self) -> Result<(), SyncError> {
        let fresh = self.service.list_sites().await?;
        let received = fresh.len();

        self.store.replace_with(|current, retired| {
            // Held jobs are read from the list being replaced, so a job retired
            // while the fetch was outstanding is not brought back.
            let held = merge::job_lookup(current);
            // Keep optimistic inserts whose create call is still outstanding.
            let mut next: Vec<_> = current
                .iter()
                .filter(|s| s.is_temporary())
                .cloned()
                .collect();
            next.extend(fresh.into_iter().map(|site| {
                let local = current.iter().find(|s| s.id == site.id);
                let site = merge::drop_retired(retired, local, site);
                merge::reattach_one(&held, site)
            }));
            tracing::debug!(sites = received, tracked = held.len(), "refreshed site list");
            next
        });
        Ok(())
    }

    /// Pulls canonical state for one site, leaving every other record alone.
    pub async fn refresh_site(&self, site_id: &str) -> Result<(), SyncError> {
        self.fetch_one(site_id, None).await
    }

    /// Like [`refresh_site`](Self::refresh_site), for a site whose job just retired.
    ///
    /// If the service still reports the site as in progress without a job id, the
    /// status the tracker settled on is kept.
    pub async fn refresh_settled(
        &self,
        site_id: &str,
        settled: SiteStatus,
    ) -> Result<(), SyncError> {
        self.fetch_one(site_id, Some(settled)).await
    }

    async fn fetch_one(&self, site_id: &str, settled: Option<SiteStatus>) -> Result<(), SyncError> {
        let Some(fresh) = self.service.get_site(site_id).await? else {
            tracing::debug!(site_id, "site vanished from the service");
            self.store.remove(site_id);
            return Ok(());
        };

        self.store.upsert_with(|current, retired| {
            let local = current.iter().find(|s| s.id == site_id);
            let held = merge::job_lookup(current);
            let site = merge::drop_retired(retired, local, fresh);
            let mut merged = merge::reattach_one(&held, site);
            if let Some(settled) = settled {
                merge::settle(&mut merged, settled, local.and_then(|s| s.progress));
            }
            merged
        });
        Ok(())
    }
}
