use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::app::client::CrawlService;
use crate::app::model::{JobLookup, Site, SitePatch, SiteStatus};
use crate::app::queue::RequestQueue;
use crate::app::reconcile::{Reconciled, reconcile};
use crate::app::refresh::Refresher;
use crate::app::store::SiteStore;

/// Per-site tracking state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JobPhase {
    #[default]
    Idle,
    Polling {
        job_id: String,
    },
    StillRunning {
        job_id: String,
        progress: Option<u8>,
    },
    Completed {
        job_id: String,
        status: SiteStatus,
    },
    NotFound {
        job_id: String,
    },
}

/// What one status response did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Applied {
    Running(Option<u8>),
    Finished(SiteStatus),
    Vanished,
}

/// Polls job status for every site holding an unresolved job and patches the
/// store one site at a time.
pub struct JobTracker {
    store: Arc<SiteStore>,
    service: Arc<dyn CrawlService>,
    refresher: Arc<Refresher>,
    queue: RequestQueue,
    interval: Duration,
    in_flight: Arc<Mutex<HashSet<String>>>,
    phases: Mutex<HashMap<String, JobPhase>>,
    wake: Notify,
    cancel: CancellationToken,
}

impl JobTracker {
    pub fn new(
        store: Arc<SiteStore>,
        service: Arc<dyn CrawlService>,
        refresher: Arc<Refresher>,
        interval: Duration,
        max_concurrent_polls: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            service,
            refresher,
            queue: RequestQueue::new(max_concurrent_polls),
            interval,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            phases: Mutex::new(HashMap::new()),
            wake: Notify::new(),
            cancel,
        }
    }

    pub fn phase(&self, site_id: &str) -> JobPhase {
        lock(&self.phases).get(site_id).cloned().unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Sites whose job has not yet been retired.
    pub fn tracked(&self) -> Vec<Site> {
        self.store
            .list()
            .into_iter()
            .filter(Site::has_unresolved_job)
            .collect()
    }

    /// Requests a tick without waiting for the interval, e.g. right after a job starts.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Ticks until the cancellation token fires. Requests already sent are left to finish;
    /// their results are discarded.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            poll_interval_ms = self.interval.as_millis() as u64,
            "job tracker started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("job tracker stopping");
                    break;
                }
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }
            let spawned = self.tick();
            if !spawned.is_empty() {
                tracing::trace!(requests = spawned.len(), "tick dispatched");
            }
        }
    }

    /// Issues one status request per tracked job that has none outstanding.
    ///
    /// Returns the spawned request tasks; dropping the handles detaches them.
    pub fn tick(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        if self.cancel.is_cancelled() {
            return Vec::new();
        }

        let tracked = self.tracked();
        self.forget_removed_sites();

        let mut handles = Vec::with_capacity(tracked.len());
        for site in tracked {
            let Some(job_id) = site.job_id.clone() else {
                continue;
            };
            let Some(in_flight) = InFlight::claim(&self.in_flight, &job_id) else {
                tracing::trace!(site_id = %site.id, %job_id, "status request still outstanding");
                continue;
            };
            self.set_phase(
                &site.id,
                JobPhase::Polling {
                    job_id: job_id.clone(),
                },
            );

            let this = Arc::clone(self);
            let site_id = site.id;
            // The claim moves with the task, so it is released even if the task
            // is dropped while waiting for a queue slot.
            handles.push(self.queue.spawn(async move {
                this.poll(&site_id, &job_id).await;
                drop(in_flight);
            }));
        }
        handles
    }

    async fn poll(&self, site_id: &str, job_id: &str) {
        let lookup = match self.service.get_job_status(job_id).await {
            Ok(lookup) => lookup,
            Err(err) => {
                if err.is_auth() {
                    tracing::warn!(site_id, job_id, %err, "job status request rejected");
                } else {
                    tracing::debug!(site_id, job_id, %err, "job status request failed; retrying next tick");
                }
                self.set_phase(
                    site_id,
                    JobPhase::StillRunning {
                        job_id: job_id.to_string(),
                        progress: self.store.get(site_id).and_then(|s| s.progress),
                    },
                );
                return;
            }
        };

        if self.cancel.is_cancelled() {
            tracing::debug!(site_id, job_id, "tracker stopped; discarding job status");
            return;
        }

        let Some(applied) = self.apply(site_id, job_id, lookup) else {
            tracing::debug!(site_id, job_id, "site no longer holds this job; discarding status");
            return;
        };

        match applied {
            Applied::Running(progress) => {
                self.set_phase(
                    site_id,
                    JobPhase::StillRunning {
                        job_id: job_id.to_string(),
                        progress,
                    },
                );
            }
            Applied::Vanished => {
                tracing::info!(site_id, job_id, "job no longer known to the service");
                self.set_phase(
                    site_id,
                    JobPhase::NotFound {
                        job_id: job_id.to_string(),
                    },
                );
            }
            Applied::Finished(status) => {
                tracing::info!(site_id, job_id, %status, "job finished");
                self.set_phase(
                    site_id,
                    JobPhase::Completed {
                        job_id: job_id.to_string(),
                        status,
                    },
                );
                if let Err(err) = self.refresher.refresh_settled(site_id, status).await {
                    tracing::warn!(site_id, job_id, %err, "canonical refresh after job failed");
                }
            }
        }
    }

    /// Patches the site if it still holds `job_id`. The job id is cleared in the same
    /// write that records a terminal state, so later responses for it are stale.
    fn apply(&self, site_id: &str, job_id: &str, lookup: JobLookup) -> Option<Applied> {
        self.store.patch_with(site_id, |site| {
            if site.job_id.as_deref() != Some(job_id) {
                return None;
            }
            let report = match lookup {
                JobLookup::NotFound => {
                    let patch = SitePatch {
                        status: Some(SiteStatus::Active),
                        job_id: Some(None),
                        ..Default::default()
                    };
                    return Some((patch, Applied::Vanished));
                }
                JobLookup::Found(report) => report,
            };

            let reconciled = reconcile(
                report.status.as_deref(),
                report.progress,
                site.status,
                site.progress,
            );
            let Reconciled {
                status, progress, ..
            } = reconciled;

            if reconciled.is_finished() {
                let patch = SitePatch {
                    status: Some(status),
                    progress: Some(progress),
                    job_id: Some(None),
                    ..Default::default()
                };
                Some((patch, Applied::Finished(status)))
            } else {
                let patch = SitePatch {
                    status: Some(status),
                    progress: Some(progress),
                    ..Default::default()
                };
                Some((patch, Applied::Running(progress)))
            }
        })
    }

    fn set_phase(&self, site_id: &str, phase: JobPhase) {
        lock(&self.phases).insert(site_id.to_string(), phase);
    }

    fn forget_removed_sites(&self) {
        let live: HashSet<String> = self.store.list().into_iter().map(|s| s.id).collect();
        lock(&self.phases).retain(|site_id, _| live.contains(site_id));
    }
}

/// Marks a job as having a status request outstanding until dropped.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl InFlight {
    fn claim(set: &Arc<Mutex<HashSet<String>>>, job_id: &str) -> Option<Self> {
        if !lock(set).insert(job_id.to_string()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            job_id: job_id.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.job_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::client::fakes::EmptyService;
    use crate::app::model::CrawlConfig;

    fn tracking(id: &str, job_id: &str) -> Site {
        Site {
            id: id.to_string(),
            name: id.to_string(),
            url: format!("https://{id}.example.com"),
            config: CrawlConfig::default(),
            status: SiteStatus::Crawling,
            pages_crawled: 0,
            last_crawled_at: None,
            progress: Some(10),
            job_id: Some(job_id.to_string()),
        }
    }

    fn tracker(store: &Arc<SiteStore>, max_concurrent_polls: usize) -> Arc<JobTracker> {
        let service: Arc<dyn CrawlService> = Arc::new(EmptyService);
        let refresher = Arc::new(Refresher::new(Arc::clone(store), Arc::clone(&service)));
        Arc::new(JobTracker::new(
            Arc::clone(store),
            service,
            refresher,
            Duration::from_millis(50),
            max_concurrent_polls,
            CancellationToken::new(),
        ))
    }

    #[test]
    fn claim_is_exclusive_and_released_on_drop() {
        let set = Arc::new(Mutex::new(HashSet::new()));
        let first = InFlight::claim(&set, "J1").unwrap();
        assert!(InFlight::claim(&set, "J1").is_none());
        assert!(InFlight::claim(&set, "J2").is_some());

        drop(first);
        assert!(lock(&set).is_empty());
        assert!(InFlight::claim(&set, "J1").is_some());
    }

    #[tokio::test]
    async fn requests_dropped_before_running_release_their_claim() {
        let store = Arc::new(SiteStore::new());
        store.upsert_many(vec![tracking("a", "J1"), tracking("b", "J2")]);
        let tracker = tracker(&store, 1);

        let handles = tracker.tick();
        assert_eq!(handles.len(), 2);
        assert_eq!(tracker.in_flight(), 2);

        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.tick().len(), 2);
    }

    #[tokio::test]
    async fn phases_of_removed_sites_are_forgotten() {
        let store = Arc::new(SiteStore::new());
        store.upsert_many(vec![tracking("a", "J1")]);
        let tracker = tracker(&store, 4);

        for handle in tracker.tick() {
            handle.await.unwrap();
        }
        assert_eq!(
            tracker.phase("a"),
            JobPhase::NotFound {
                job_id: "J1".to_string()
            }
        );

        store.remove("a");
        assert!(tracker.tick().is_empty());
        assert_eq!(tracker.phase("a"), JobPhase::Idle);
    }
}
