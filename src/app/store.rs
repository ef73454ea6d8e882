use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::app::model::{Site, SitePatch};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// What a store write touched, so readers can tell a single-record patch from a list swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Patched(String),
    Upserted(Vec<String>),
    Removed(String),
    Replaced,
}

/// Last job retired for each site, `site id -> job id`.
pub type RetiredJobs = HashMap<String, String>;

/// In-memory keyed collection of sites; the only shared mutable state in the engine.
///
/// Every write replaces whole records by id while holding the lock, so a reader
/// never sees a half-applied patch. The lock is never held across an await.
///
/// A patch that clears a site's job id retires that job. The retirement lasts
/// until a patch sets a different job id on the site, and refreshes use it to
/// strip the id from records the service has not caught up on.
#[derive(Debug)]
pub struct SiteStore {
    sites: Mutex<Vec<Site>>,
    // Always locked after `sites`.
    retired: Mutex<RetiredJobs>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for SiteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteStore {
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            sites: Mutex::new(Vec::new()),
            retired: Mutex::new(HashMap::new()),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Site>> {
        // Writes are single replace operations; a poisoned guard still holds whole records.
        self.sites.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_retired(&self) -> MutexGuard<'_, RetiredJobs> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    pub fn list(&self) -> Vec<Site> {
        self.lock().clone()
    }

    /// Same as [`list`](Self::list); named for the rollback call sites.
    pub fn snapshot(&self) -> Vec<Site> {
        self.list()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Site> {
        self.lock().iter().find(|s| s.id == id).cloned()
    }

    /// The job most recently retired for `id`, if no job has replaced it since.
    pub fn retired_job(&self, id: &str) -> Option<String> {
        self.lock_retired().get(id).cloned()
    }

    pub fn insert_front(&self, site: Site) {
        let id = site.id.clone();
        {
            let mut sites = self.lock();
            sites.retain(|s| s.id != site.id);
            sites.insert(0, site);
        }
        self.notify(StoreChange::Upserted(vec![id]));
    }

    /// Puts `site` where `old_id` was (or at the head if it is gone), in one write.
    pub fn swap(&self, old_id: &str, site: Site) {
        let ids = vec![old_id.to_string(), site.id.clone()];
        {
            let mut sites = self.lock();
            let pos = sites.iter().position(|s| s.id == old_id);
            sites.retain(|s| s.id != old_id && s.id != site.id);
            let pos = pos.unwrap_or(0).min(sites.len());
            sites.insert(pos, site);
        }
        self.notify(StoreChange::Upserted(ids));
    }

    /// Replaces records with matching ids in place and appends unknown ones.
    pub fn upsert_many(&self, incoming: Vec<Site>) {
        if incoming.is_empty() {
            return;
        }
        let mut ids = Vec::with_capacity(incoming.len());
        {
            let mut sites = self.lock();
            for site in incoming {
                if site.id.trim().is_empty() {
                    tracing::warn!(name = %site.name, "dropping site without id");
                    continue;
                }
                ids.push(site.id.clone());
                match sites.iter_mut().find(|s| s.id == site.id) {
                    Some(slot) => *slot = site,
                    None => sites.push(site),
                }
            }
        }
        if !ids.is_empty() {
            self.notify(StoreChange::Upserted(ids));
        }
    }

    /// Applies `patch` to the record with `id`. Returns `false` if no such record exists.
    pub fn patch(&self, id: &str, patch: &SitePatch) -> bool {
        let applied = {
            let mut sites = self.lock();
            match sites.iter_mut().find(|s| s.id == id) {
                Some(slot) => {
                    apply_patch(slot, patch, &mut self.lock_retired());
                    true
                }
                None => false,
            }
        };
        if applied {
            self.notify(StoreChange::Patched(id.to_string()));
        }
        applied
    }

    /// Reads the current record and applies the patch `decide` returns, under one lock.
    ///
    /// `decide` may decline by returning `None`; nothing is written then.
    pub fn patch_with<T>(
        &self,
        id: &str,
        decide: impl FnOnce(&Site) -> Option<(SitePatch, T)>,
    ) -> Option<T> {
        let out = {
            let mut sites = self.lock();
            let slot = sites.iter_mut().find(|s| s.id == id)?;
            let (patch, out) = decide(slot)?;
            apply_patch(slot, &patch, &mut self.lock_retired());
            out
        };
        self.notify(StoreChange::Patched(id.to_string()));
        Some(out)
    }

    pub fn remove(&self, id: &str) -> Option<Site> {
        let removed = {
            let mut sites = self.lock();
            let pos = sites.iter().position(|s| s.id == id)?;
            self.lock_retired().remove(id);
            sites.remove(pos)
        };
        self.notify(StoreChange::Removed(id.to_string()));
        Some(removed)
    }

    /// Swaps in an authoritative list. Duplicate and id-less records are dropped.
    pub fn replace_all(&self, incoming: Vec<Site>) {
        self.replace_with(|_, _| incoming);
    }

    /// Builds the next list from the current one and swaps it in, under one lock.
    ///
    /// Writes from other tasks land either before `build` reads the list or after
    /// the result is stored, never in between.
    pub fn replace_with(&self, build: impl FnOnce(&[Site], &RetiredJobs) -> Vec<Site>) {
        {
            let mut sites = self.lock();
            let mut retired = self.lock_retired();
            let next = dedup_valid(build(&sites, &retired));
            retired.retain(|id, _| next.iter().any(|s| &s.id == id));
            *sites = next;
        }
        self.notify(StoreChange::Replaced);
    }

    /// Builds one record from the current list and upserts it, under one lock.
    pub fn upsert_with(&self, build: impl FnOnce(&[Site], &RetiredJobs) -> Site) {
        let id = {
            let mut sites = self.lock();
            let site = build(&sites, &self.lock_retired());
            if site.id.trim().is_empty() {
                tracing::warn!(name = %site.name, "dropping site without id");
                return;
            }
            let id = site.id.clone();
            match sites.iter_mut().find(|s| s.id == site.id) {
                Some(slot) => *slot = site,
                None => sites.push(site),
            }
            id
        };
        self.notify(StoreChange::Upserted(vec![id]));
    }

    pub fn restore(&self, snapshot: Vec<Site>) {
        self.replace_all(snapshot);
    }
}

fn apply_patch(slot: &mut Site, patch: &SitePatch, retired: &mut RetiredJobs) {
    let next = slot.patched(patch);
    match (&slot.job_id, &next.job_id) {
        (Some(old), None) => {
            retired.insert(slot.id.clone(), old.clone());
        }
        (old, Some(new)) if old.as_ref() != Some(new) => {
            retired.remove(&slot.id);
        }
        _ => {}
    }
    *slot = next;
}

fn dedup_valid(incoming: Vec<Site>) -> Vec<Site> {
    let mut next: Vec<Site> = Vec::with_capacity(incoming.len());
    for site in incoming {
        if site.id.trim().is_empty() {
            tracing::warn!(name = %site.name, "dropping site without id");
            continue;
        }
        match next.iter_mut().find(|s| s.id == site.id) {
            Some(slot) => *slot = site,
            None => next.push(site),
        }
    }
    next
}
