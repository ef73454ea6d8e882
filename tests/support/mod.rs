#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crawlsync::SyncError;
use crawlsync::app::client::CrawlService;
use crawlsync::app::model::{
    CrawlConfig, JobLookup, JobStatusReport, Site, SiteDraft, SiteStatus, StartedJob,
};

pub fn site(id: &str) -> Site {
    Site {
        id: id.to_owned(),
        name: format!("site {id}"),
        url: format!("https://{id}.example.com/"),
        config: CrawlConfig::default(),
        status: SiteStatus::Active,
        pages_crawled: 0,
        last_crawled_at: None,
        progress: None,
        job_id: None,
    }
}

pub fn tracking(id: &str, job_id: &str, progress: u8) -> Site {
    Site {
        status: SiteStatus::Crawling,
        progress: Some(progress),
        job_id: Some(job_id.to_owned()),
        ..site(id)
    }
}

pub fn report(status: &str, progress: f64) -> JobLookup {
    JobLookup::Found(JobStatusReport {
        status: Some(status.to_owned()),
        progress: Some(progress),
        pages_crawled: None,
    })
}

/// In-memory crawl service with scripted job status responses.
///
/// The list endpoint never echoes job ids unless `echo_job_ids` is set, which
/// reproduces the lag between a start call and the list catching up.
#[derive(Default)]
pub struct ScriptedService {
    sites: Mutex<Vec<Site>>,
    statuses: Mutex<HashMap<String, VecDeque<JobLookup>>>,
    status_gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    list_gate: Mutex<Option<Arc<Semaphore>>>,
    list_error: Mutex<Option<fn() -> SyncError>>,
    create_error: Mutex<Option<fn() -> SyncError>>,
    update_error: Mutex<Option<fn() -> SyncError>>,
    echo_job_ids: AtomicBool,
    next_id: AtomicU64,
    calls: Mutex<Calls>,
}

#[derive(Debug, Default, Clone)]
pub struct Calls {
    pub list: usize,
    pub create: usize,
    pub start: Vec<String>,
    pub get_site: Vec<String>,
    pub status: HashMap<String, usize>,
}

impl ScriptedService {
    pub fn with_sites(sites: Vec<Site>) -> Arc<Self> {
        let svc = Self::default();
        *svc.sites.lock().unwrap() = sites;
        Arc::new(svc)
    }

    pub fn set_sites(&self, sites: Vec<Site>) {
        *self.sites.lock().unwrap() = sites;
    }

    pub fn server_site(&self, id: &str) -> Option<Site> {
        self.sites.lock().unwrap().iter().find(|s| s.id == id).cloned()
    }

    pub fn update_server_site(&self, id: &str, f: impl FnOnce(&mut Site)) {
        let mut sites = self.sites.lock().unwrap();
        if let Some(site) = sites.iter_mut().find(|s| s.id == id) {
            f(site);
        }
    }

    /// Responses are served in order; the last one repeats.
    pub fn script(&self, job_id: &str, responses: Vec<JobLookup>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(job_id.to_owned(), responses.into());
    }

    /// Status requests for `job_id` block until permits are added to the returned semaphore.
    pub fn gate_status(&self, job_id: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.status_gates
            .lock()
            .unwrap()
            .insert(job_id.to_owned(), Arc::clone(&gate));
        gate
    }

    pub fn gate_list(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.list_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Every list call fails with `err` once it gets past the list gate.
    pub fn fail_list(&self, err: fn() -> SyncError) {
        *self.list_error.lock().unwrap() = Some(err);
    }

    pub fn fail_create(&self, err: fn() -> SyncError) {
        *self.create_error.lock().unwrap() = Some(err);
    }

    pub fn fail_update(&self, err: fn() -> SyncError) {
        *self.update_error.lock().unwrap() = Some(err);
    }

    pub fn echo_job_ids(&self, echo: bool) {
        self.echo_job_ids.store(echo, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    pub fn status_calls(&self, job_id: &str) -> usize {
        self.calls().status.get(job_id).copied().unwrap_or(0)
    }

    fn visible(&self, site: &Site) -> Site {
        let mut site = site.clone();
        if !self.echo_job_ids.load(Ordering::SeqCst) {
            site.job_id = None;
        }
        site
    }
}

#[async_trait]
impl CrawlService for ScriptedService {
    async fn create_site(&self, draft: &SiteDraft) -> Result<Site, SyncError> {
        self.calls.lock().unwrap().create += 1;
        tokio::task::yield_now().await;
        if let Some(err) = *self.create_error.lock().unwrap() {
            return Err(err());
        }
        let id = format!("site-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let site = Site {
            id,
            name: draft.name.clone(),
            url: draft.url.clone(),
            config: draft.config.clone(),
            status: SiteStatus::Inactive,
            pages_crawled: 0,
            last_crawled_at: None,
            progress: None,
            job_id: None,
        };
        self.sites.lock().unwrap().insert(0, site.clone());
        Ok(site)
    }

    async fn list_sites(&self) -> Result<Vec<Site>, SyncError> {
        self.calls.lock().unwrap().list += 1;
        let gate = self.list_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.expect("list gate closed");
            permit.forget();
        }
        if let Some(err) = *self.list_error.lock().unwrap() {
            return Err(err());
        }
        let sites = self.sites.lock().unwrap().clone();
        Ok(sites.iter().map(|s| self.visible(s)).collect())
    }

    async fn get_site(&self, site_id: &str) -> Result<Option<Site>, SyncError> {
        self.calls.lock().unwrap().get_site.push(site_id.to_owned());
        Ok(self.server_site(site_id).map(|s| self.visible(&s)))
    }

    async fn update_site(&self, site_id: &str, draft: &SiteDraft) -> Result<Site, SyncError> {
        if let Some(err) = *self.update_error.lock().unwrap() {
            return Err(err());
        }
        let mut sites = self.sites.lock().unwrap();
        let site = sites
            .iter_mut()
            .find(|s| s.id == site_id)
            .ok_or_else(|| SyncError::SiteNotFound(site_id.to_owned()))?;
        site.name = draft.name.clone();
        site.url = draft.url.clone();
        site.config = draft.config.clone();
        Ok(site.clone())
    }

    async fn delete_site(&self, site_id: &str) -> Result<(), SyncError> {
        let mut sites = self.sites.lock().unwrap();
        let before = sites.len();
        sites.retain(|s| s.id != site_id);
        if sites.len() == before {
            return Err(SyncError::SiteNotFound(site_id.to_owned()));
        }
        Ok(())
    }

    async fn start_job(&self, site_id: &str) -> Result<StartedJob, SyncError> {
        let job_id = format!("job-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.calls.lock().unwrap().start.push(site_id.to_owned());
        self.update_server_site(site_id, |site| {
            site.status = SiteStatus::Crawling;
            site.job_id = Some(job_id.clone());
        });
        Ok(StartedJob { job_id })
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobLookup, SyncError> {
        *self
            .calls
            .lock()
            .unwrap()
            .status
            .entry(job_id.to_owned())
            .or_default() += 1;

        let gate = self.status_gates.lock().unwrap().get(job_id).cloned();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.expect("status gate closed");
            permit.forget();
        }

        let mut statuses = self.statuses.lock().unwrap();
        let Some(queue) = statuses.get_mut(job_id) else {
            return Ok(JobLookup::NotFound);
        };
        if queue.len() > 1 {
            Ok(queue.pop_front().expect("non-empty queue"))
        } else {
            Ok(queue.front().cloned().unwrap_or(JobLookup::NotFound))
        }
    }
}
