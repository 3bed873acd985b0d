mod config;
mod discovery;
mod error;
mod fetcher;
mod openai;
mod portal;
mod stats;
mod summarizer;
mod tender;

use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::discovery::DiscoveryRun;
use crate::fetcher::FetchRun;
use crate::openai::OpenAIClient;
use crate::portal::PortalClient;
use crate::summarizer::Summarizer;
use crate::tender::TenderIndex;

#[derive(Parser)]
#[command(
    name = "tender_harvester",
    about = "Harvest e-Zamówienia tenders, download their documents and summarize them with an LLM"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search tenders and save their details to the results file
    Discover {
        #[command(flatten)]
        query: Query,
    },
    /// Download every tender's documents into the downloads directory
    Fetch,
    /// Summarize each downloaded tender into a response file
    Summarize,
    /// Discover + fetch + summarize in one go
    Run {
        #[command(flatten)]
        query: Query,
    },
    /// Show pipeline progress on disk
    Stats,
}

#[derive(clap::Args)]
struct Query {
    /// Search keyword (tender title)
    #[arg(short, long, env = "KEYWORD")]
    keyword: Option<String>,
    /// Earliest initiation date, e.g. 2025-01-01
    #[arg(short, long, env = "DATE")]
    date: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // `.env` first so KEYWORD/DATE defaults from it reach clap.
    config::load_dotenv();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    let t0 = Instant::now();

    let result = match cli.command {
        Commands::Discover { query } => discover(&settings, &query).await.map(|_| ()),
        Commands::Fetch => fetch(&settings).await,
        Commands::Summarize => summarize(&settings).await,
        Commands::Run { query } => {
            require_api_key()?;
            if discover(&settings, &query).await? {
                fetch(&settings).await?;
                summarize(&settings).await?;
            }
            Ok(())
        }
        Commands::Stats => {
            let s = stats::collect(
                &settings.results_file,
                &settings.downloads_dir,
                &settings.responses_dir,
            )?;
            s.print();
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Returns whether a results file was written.
async fn discover(settings: &Settings, query: &Query) -> Result<bool> {
    let portal = PortalClient::new(&settings.portal_url)?;
    let outcome = discovery::run(
        &portal,
        query.keyword.as_deref(),
        query.date.as_deref(),
        settings.page_size,
        &settings.results_file,
    )
    .await;

    match outcome {
        DiscoveryRun::MissingQuery => {
            println!("Error: KEYWORD or DATE is not set (use --keyword/--date or the environment).");
            Ok(false)
        }
        DiscoveryRun::SearchFailed(e) | DiscoveryRun::SaveFailed(e) => {
            println!("{:#}", e);
            Ok(false)
        }
        DiscoveryRun::Saved { records, stats } => {
            println!(
                "Saved {} procurement records to {} ({} found, {} fetched, {} failed).",
                records,
                settings.results_file.display(),
                stats.found,
                stats.fetched,
                stats.failed
            );
            Ok(true)
        }
    }
}

async fn fetch(settings: &Settings) -> Result<()> {
    let results = &settings.results_file;
    let portal = PortalClient::new(&settings.portal_url)?;
    let outcome = fetcher::run(
        &portal,
        results,
        &settings.downloads_dir,
        settings.download_delay(),
    )
    .await?;

    match outcome {
        FetchRun::MissingResults => {
            println!("File {} not found! Run 'discover' first.", results.display());
        }
        FetchRun::InvalidResults(e) => {
            println!("Error reading {}. Check if it is valid JSON. ({:#})", results.display(), e);
        }
        FetchRun::Done(s) => {
            println!(
                "\nSummary: Downloaded {} files ({} bytes), Failed {} files, {} already present.",
                s.downloaded, s.bytes, s.failed, s.skipped
            );
        }
    }
    Ok(())
}

fn require_api_key() -> Result<String> {
    match config::openai_api_key() {
        Some(key) => Ok(key),
        None => bail!("OPENAI_API_KEY environment variable not set"),
    }
}

async fn summarize(settings: &Settings) -> Result<()> {
    let api_key = require_api_key()?;
    let prompt = std::fs::read_to_string(&settings.prompt_file)
        .with_context(|| format!("Failed to read prompt file {}", settings.prompt_file.display()))?;

    println!("Downloads directory: {}", settings.downloads_dir.display());
    println!("Responses directory: {}", settings.responses_dir.display());
    if !settings.downloads_dir.is_dir() {
        println!("Downloads directory not found: {}", settings.downloads_dir.display());
        return Ok(());
    }

    let index = TenderIndex::load(&settings.results_file);
    tracing::info!(tenders = index.len(), "Loaded tender index");

    let client = OpenAIClient::new(api_key, &settings.model).with_base_url(&settings.openai_url);
    let summarizer = Summarizer {
        analyzer: Some(&client),
        prompt,
        index,
        delay: settings.request_delay(),
    };
    let s = summarizer
        .run(&settings.downloads_dir, &settings.responses_dir)
        .await?;
    println!(
        "\nProcessing complete: {} saved ({} errors), {} already done, {} empty folders.",
        s.processed, s.errors, s.skipped, s.empty
    );
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
