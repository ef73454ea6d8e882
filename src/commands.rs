use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::app::client::HttpCrawlService;
use crate::app::engine::SiteSync;
use crate::app::model::Site;
use crate::app::store::StoreChange;
use crate::cli::{Cli, Command};
use crate::config::{SyncConfig, parse_poll_interval};

const WATCH_RECHECK: Duration = Duration::from_millis(200);

/// Environment config with command-line overrides applied.
pub fn load_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let api_url = cli.api_url.clone();
    let mut config = SyncConfig::from_lookup(|key| match (key, &api_url) {
        ("CRAWLSYNC_API_URL", Some(url)) => Some(url.clone()),
        _ => std::env::var(key).ok(),
    })?;
    if let Some(ms) = cli.poll_interval_ms {
        config.poll_interval =
            parse_poll_interval(&ms.to_string()).context("invalid --poll-interval-ms")?;
    }
    Ok(config)
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    tracing::debug!(?config, "loaded config");

    let service = HttpCrawlService::from_config(&config).context("build crawl service client")?;
    let cancel = CancellationToken::new();
    let sync = SiteSync::new(Arc::new(service), &config, cancel.clone());
    sync.load().await.context("load sites")?;

    let json = cli.json;
    match cli.command {
        Command::List => print_sites(&sync.sites(), json)?,
        Command::Stats => {
            let stats = sync.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "total={} inactive={} pending={} crawling={} active={} error={} pages={} last_crawled_at={}",
                    stats.total,
                    stats.inactive,
                    stats.pending,
                    stats.crawling,
                    stats.active,
                    stats.error,
                    stats.total_pages,
                    stats
                        .last_crawled_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }
        Command::Add(args) => {
            let site = sync.add(args.to_draft()).await.context("add site")?;
            print_site(&site, json)?;
        }
        Command::Update(args) => {
            let site = sync
                .update(&args.id, args.site.to_draft())
                .await
                .with_context(|| format!("update site {}", args.id))?;
            print_site(&site, json)?;
        }
        Command::Remove(args) => {
            sync.remove(&args.id)
                .await
                .with_context(|| format!("remove site {}", args.id))?;
            if !json {
                println!("removed {}", args.id);
            }
        }
        Command::Start(args) => {
            let job_id = sync
                .start_crawl(&args.id)
                .await
                .with_context(|| format!("start crawl for {}", args.id))?;
            if json {
                println!("{}", serde_json::json!({ "siteId": args.id, "jobId": job_id }));
            } else {
                println!("started {job_id} for {}", args.id);
            }
            if args.watch {
                watch(&sync, Some(&args.id), json).await?;
            }
        }
        Command::Watch => watch(&sync, None, json).await?,
    }

    cancel.cancel();
    Ok(())
}

/// Runs the tracker and prints every patched site until no job is left or Ctrl-C.
pub async fn watch(sync: &SiteSync, only: Option<&str>, json: bool) -> anyhow::Result<()> {
    let watching = |site: &Site| only.is_none_or(|id| site.id == id);
    if !sync.tracker().tracked().iter().any(watching) {
        tracing::info!("no running jobs to watch");
        return Ok(());
    }

    let mut changes = sync.store().subscribe();
    let handle = sync.start_tracking();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let pending = sync.tracker().tracked().iter().any(watching);
        if !pending && sync.tracker().in_flight() == 0 {
            break;
        }
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted");
                break;
            }
            _ = tokio::time::sleep(WATCH_RECHECK) => {}
            change = changes.recv() => match change {
                Ok(change) => print_change(sync, change, &watching, json)?,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "watch fell behind store changes");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    sync.stop_tracking();
    handle.await.context("join job tracker")?;

    // Changes that landed after the last wake-up, e.g. the final refresh.
    while let Ok(change) = changes.try_recv() {
        print_change(sync, change, &watching, json)?;
    }
    Ok(())
}

fn print_change(
    sync: &SiteSync,
    change: StoreChange,
    watching: &dyn Fn(&Site) -> bool,
    json: bool,
) -> anyhow::Result<()> {
    match change {
        StoreChange::Patched(id) => print_changed(sync, &[id], watching, json),
        StoreChange::Upserted(ids) => print_changed(sync, &ids, watching, json),
        StoreChange::Removed(_) | StoreChange::Replaced => Ok(()),
    }
}

fn print_changed(
    sync: &SiteSync,
    ids: &[String],
    watching: &dyn Fn(&Site) -> bool,
    json: bool,
) -> anyhow::Result<()> {
    for id in ids {
        if let Some(site) = sync.store().get(id).filter(|s| watching(s)) {
            print_site(&site, json)?;
        }
    }
    Ok(())
}

fn print_sites(sites: &[Site], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(sites)?);
        return Ok(());
    }
    for site in sites {
        print_site(site, false)?;
    }
    Ok(())
}

fn print_site(site: &Site, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(site)?);
        return Ok(());
    }
    let progress = site
        .progress
        .map(|p| format!("{p}%"))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}\t{}\t{}\t{} pages\t{}\t{}",
        site.id, site.status, progress, site.pages_crawled, site.name, site.url
    );
    Ok(())
}
