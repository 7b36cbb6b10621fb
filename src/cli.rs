use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "scrapeforge", about = "Scrape and crawl pipeline engine")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch and transform a single URL
    Scrape {
        url: String,

        /// Output formats to produce (markdown, html, rawHtml, links, extract)
        #[arg(short, long, value_delimiter = ',')]
        formats: Option<Vec<String>>,

        /// Keep the whole page instead of isolating the main content region
        #[arg(long)]
        keep_full_page: bool,

        /// CSS selectors to strip before conversion
        #[arg(long, value_delimiter = ',')]
        exclude_tags: Option<Vec<String>>,

        /// Per-fetch timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Start a crawl from a root URL and block until it finishes
    Crawl {
        url: String,

        /// Maximum link-following depth from the root
        #[arg(short, long)]
        max_depth: Option<u32>,

        /// Maximum number of pages to visit
        #[arg(short, long)]
        limit: Option<u32>,

        /// Follow links that leave the root's host
        #[arg(long)]
        allow_external_links: bool,

        /// Skip sitemap.xml seeding
        #[arg(long)]
        ignore_sitemap: bool,
    },
    /// Show progress and counts for a running or finished crawl
    Status {
        /// Crawl id printed by `crawl`
        crawl_id: String,
    },
    /// Request cancellation of a running crawl
    Cancel {
        /// Crawl id printed by `crawl`
        crawl_id: String,
    },
}
