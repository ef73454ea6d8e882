use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app::model::{Site, SiteStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStats {
    pub total: usize,
    pub inactive: usize,
    pub pending: usize,
    pub crawling: usize,
    pub active: usize,
    pub error: usize,
    pub total_pages: u64,
    pub last_crawled_at: Option<DateTime<Utc>>,
}

impl SiteStats {
    pub fn from_sites(sites: &[Site]) -> Self {
        sites.iter().fold(Self::default(), |mut stats, site| {
            stats.total += 1;
            match site.status {
                SiteStatus::Inactive => stats.inactive += 1,
                SiteStatus::Pending => stats.pending += 1,
                SiteStatus::Crawling => stats.crawling += 1,
                SiteStatus::Active => stats.active += 1,
                SiteStatus::Error => stats.error += 1,
            }
            stats.total_pages = stats.total_pages.saturating_add(site.pages_crawled);
            stats.last_crawled_at = stats.last_crawled_at.max(site.last_crawled_at);
            stats
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;
    use crate::app::model::CrawlConfig;

    fn site(id: &str, status: SiteStatus, pages: u64, at: Option<DateTime<Utc>>) -> Site {
        Site {
            id: id.to_string(),
            name: id.to_string(),
            url: format!("https://{id}.example.com"),
            config: CrawlConfig::default(),
            status,
            pages_crawled: pages,
            last_crawled_at: at,
            progress: None,
            job_id: None,
        }
    }

    #[test]
    fn empty_list_yields_zeroes() {
        assert_eq!(SiteStats::from_sites(&[]), SiteStats::default());
    }

    #[test]
    fn counts_by_status_and_totals() {
        let older = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let stats = SiteStats::from_sites(&[
            site("a", SiteStatus::Active, 10, Some(older)),
            site("b", SiteStatus::Active, 5, Some(newer)),
            site("c", SiteStatus::Crawling, 0, None),
            site("d", SiteStatus::Error, 2, None),
        ]);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.crawling, 1);
        assert_eq!(stats.error, 1);
        assert_eq!(stats.inactive, 0);
        assert_eq!(stats.total_pages, 17);
        assert_eq!(stats.last_crawled_at, Some(newer));
    }
}
