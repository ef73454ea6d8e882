use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::app::model::{Cadence, CrawlConfig, SiteDraft};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Crawl service base URL (overrides CRAWLSYNC_API_URL).
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Job status poll interval in milliseconds (overrides CRAWLSYNC_POLL_INTERVAL_MS).
    #[arg(long, global = true)]
    pub poll_interval_ms: Option<u64>,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List sites.
    List,
    /// Show counts by status, total pages and the latest crawl time.
    Stats,
    /// Register a new site.
    Add(SiteArgs),
    /// Replace a site's name, URL and crawl configuration.
    Update(UpdateArgs),
    /// Delete a site.
    Remove(SiteIdArgs),
    /// Start a crawl job for a site.
    Start(StartArgs),
    /// Track running jobs until they all finish.
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CadenceArg {
    Manual,
    Daily,
    Weekly,
    Monthly,
}

impl From<CadenceArg> for Cadence {
    fn from(value: CadenceArg) -> Self {
        match value {
            CadenceArg::Manual => Cadence::Manual,
            CadenceArg::Daily => Cadence::Daily,
            CadenceArg::Weekly => Cadence::Weekly,
            CadenceArg::Monthly => Cadence::Monthly,
        }
    }
}

#[derive(Debug, Args)]
pub struct SiteArgs {
    /// Display name.
    #[arg(long)]
    pub name: String,

    /// Start URL (must be http/https).
    #[arg(long)]
    pub url: String,

    /// Maximum link depth to traverse.
    #[arg(long, default_value_t = CrawlConfig::default_depth())]
    pub depth: u32,

    #[arg(long, value_enum, default_value_t = CadenceArg::Manual)]
    pub cadence: CadenceArg,

    /// URL pattern to include (repeatable).
    #[arg(long = "include")]
    pub include_patterns: Vec<String>,

    /// URL pattern to exclude (repeatable).
    #[arg(long = "exclude")]
    pub exclude_patterns: Vec<String>,
}

impl SiteArgs {
    pub fn to_draft(&self) -> SiteDraft {
        SiteDraft {
            name: self.name.clone(),
            url: self.url.clone(),
            config: CrawlConfig {
                depth: self.depth,
                cadence: self.cadence.into(),
                include_patterns: self.include_patterns.clone(),
                exclude_patterns: self.exclude_patterns.clone(),
            },
        }
    }
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Site id.
    pub id: String,

    #[command(flatten)]
    pub site: SiteArgs,
}

#[derive(Debug, Args)]
pub struct SiteIdArgs {
    /// Site id.
    pub id: String,
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Site id.
    pub id: String,

    /// Keep running and report progress until the job finishes.
    #[arg(long)]
    pub watch: bool,
}
