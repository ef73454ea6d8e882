use std::collections::HashMap;

use crate::app::model::{Site, SiteStatus};
use crate::app::store::RetiredJobs;

/// Job tracking held locally for one site, captured before a refresh lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldJob {
    pub job_id: String,
    pub progress: Option<u8>,
}

pub type HeldJobs = HashMap<String, HeldJob>;

/// Collects `site id -> job` for every site currently holding a job id.
pub fn job_lookup(snapshot: &[Site]) -> HeldJobs {
    snapshot
        .iter()
        .filter_map(|site| {
            let job_id = site.job_id.clone()?;
            Some((
                site.id.clone(),
                HeldJob {
                    job_id,
                    progress: site.progress,
                },
            ))
        })
        .collect()
}

/// Re-applies locally held job ids to a freshly fetched list.
///
/// The list endpoint can lag a start-crawl call; a fresh record without a job id
/// keeps the local one and is forced back to `crawling`.
pub fn reattach_jobs(lookup: &HeldJobs, fresh: Vec<Site>) -> Vec<Site> {
    fresh
        .into_iter()
        .map(|site| reattach_one(lookup, site))
        .collect()
}

pub fn reattach_one(lookup: &HeldJobs, mut site: Site) -> Site {
    let Some(held) = lookup.get(&site.id) else {
        return site;
    };
    match site.job_id.as_deref() {
        None => {
            tracing::debug!(site_id = %site.id, job_id = %held.job_id, "reattaching in-flight job");
            site.job_id = Some(held.job_id.clone());
            site.status = SiteStatus::Crawling;
            // Any progress on the fresh record belongs to an earlier crawl.
            site.progress = held.progress;
        }
        Some(job_id) if job_id == held.job_id => {
            site.progress = max_progress(site.progress, held.progress);
        }
        // A different job id is newer information from the system of record.
        Some(_) => {}
    }
    site
}

/// Strips a job id the store already retired for this site. The service can keep
/// echoing it for a while after the job ended; `local` supplies what the tracker
/// settled on meanwhile.
pub fn drop_retired(retired: &RetiredJobs, local: Option<&Site>, mut site: Site) -> Site {
    let echoed = match (&site.job_id, retired.get(&site.id)) {
        (Some(job_id), Some(retired_id)) => job_id == retired_id,
        _ => false,
    };
    if !echoed {
        return site;
    }
    tracing::debug!(site_id = %site.id, job_id = ?site.job_id, "dropping retired job id from fresh record");
    site.job_id = None;
    if let Some(local) = local.filter(|l| l.job_id.is_none()) {
        settle(&mut site, local.status, local.progress);
    }
    site
}

/// Overrides an in-progress status on a record that holds no job, and fills in
/// progress the record lacks.
pub fn settle(site: &mut Site, status: SiteStatus, progress: Option<u8>) {
    let lagging = site.job_id.is_none()
        && matches!(site.status, SiteStatus::Crawling | SiteStatus::Pending);
    if lagging {
        site.status = status;
    }
    if site.progress.is_none() {
        site.progress = progress;
    }
}

fn max_progress(a: Option<u8>, b: Option<u8>) -> Option<u8> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
