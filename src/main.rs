use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use kbharvest::{
    cache,
    config::{parse_date, HarvestConfig, DEFAULT_LANGUAGE, DEFAULT_OAI_BASE, DEFAULT_RESOLVER_BASE},
    fetch::OaiClient,
    harvest, index, select,
};
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Incrementally harvest newspaper-archive metadata and OCR article text
/// from the KB (Dutch national library) collections.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Regex matched against publisher display names ("title" or
    /// "title | alternate title")
    publisher_pattern: String,

    /// Start of the issue date window, YYYY-MM-DD (inclusive)
    from_date: String,

    /// End of the issue date window, YYYY-MM-DD (inclusive; default today)
    #[arg(long)]
    to_date: Option<String>,

    /// API key, appended to the service endpoint path (needed for
    /// material after 1945)
    #[arg(long)]
    api_key: Option<String>,

    /// Directory for the index, cache and output tables
    #[arg(long, default_value = ".")]
    output_path: PathBuf,

    /// Collection set to harvest
    #[arg(long, default_value = "DDD")]
    set: String,

    /// Do not download raw records; reuse the existing cache file
    #[arg(long)]
    no_download: bool,

    /// Print per-publisher index coverage and which entries the pattern
    /// matches, then exit
    #[arg(long)]
    show_index: bool,

    /// Skip the incremental index scan (work from the index as-is)
    #[arg(long)]
    skip_index_update: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    // ─── 2) CLI → config (fails before any I/O) ──────────────────────
    let args = Cli::parse();
    let pattern = Regex::new(&args.publisher_pattern)
        .with_context(|| format!("invalid publisher pattern {:?}", args.publisher_pattern))?;
    let config = HarvestConfig {
        oai_base: DEFAULT_OAI_BASE.to_string(),
        resolver_base: DEFAULT_RESOLVER_BASE.to_string(),
        api_key: args.api_key,
        set: args.set,
        from_date: parse_date(&args.from_date)?,
        to_date: match &args.to_date {
            Some(s) => parse_date(s)?,
            None => Utc::now().date_naive(),
        },
        out_dir: args.output_path,
        language: DEFAULT_LANGUAGE.to_string(),
    };
    if config.to_date < config.from_date {
        bail!(
            "empty date window: {} is after {}",
            config.from_date,
            config.to_date
        );
    }
    fs::create_dir_all(&config.out_dir)
        .with_context(|| format!("creating output directory {:?}", config.out_dir))?;
    let client = OaiClient::new(&config)?;

    // ─── 3) update + load the identifier index ───────────────────────
    let index_path = index::index_path(&config);
    if args.skip_index_update {
        info!("skipping index update");
    } else {
        let added = index::update_index(&config, &client).await?;
        info!(added, "index updated");
    }
    if !index_path.exists() {
        bail!(
            "no index at {} (run without --skip-index-update first)",
            index_path.display()
        );
    }
    let entries = index::load_index(&index_path)?;

    // ─── 4) select publishers ────────────────────────────────────────
    if args.show_index {
        print!(
            "{}",
            select::render_summary(&select::summarize(&entries, &pattern))
        );
        return Ok(());
    }
    let publishers = select::select_publishers(&entries, &pattern);
    if publishers.is_empty() {
        error!(pattern = %args.publisher_pattern, "no publishers match");
        bail!("no publishers match {:?}", args.publisher_pattern);
    }
    info!(count = publishers.len(), ?publishers, "publishers selected");

    // ─── 5) fill the raw-record cache ────────────────────────────────
    let cache_path = if args.no_download {
        let scope = cache::QueryScope::new(&config, &publishers);
        let path = cache::cache_path(&config, &scope);
        if !path.exists() {
            bail!(
                "--no-download, but no cache at {} for this query",
                path.display()
            );
        }
        path
    } else {
        cache::ensure_cached(&config, &client, &entries, &publishers).await?
    };

    // ─── 6) extract articles + OCR text ──────────────────────────────
    let records = cache::selected_records(&cache_path)?;
    let output = harvest::output_path(&config);
    let appended = harvest::harvest_articles(&config, &client, records, &output).await?;

    info!(appended, output = %output.display(), "done");
    Ok(())
}
