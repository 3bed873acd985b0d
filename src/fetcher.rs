use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::error::PortalError;
use crate::portal::PortalClient;
use crate::tender::{load_tenders, sanitize_filename, Tender};

/// Download stats returned after completion.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
}

/// What happened to a single attachment.
#[derive(Debug)]
pub enum DownloadOutcome {
    Downloaded(u64),
    AlreadyPresent,
    Failed(PortalError),
}

impl FetchStats {
    fn record(&mut self, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Downloaded(bytes) => {
                self.downloaded += 1;
                self.bytes += bytes;
            }
            DownloadOutcome::AlreadyPresent => self.skipped += 1,
            DownloadOutcome::Failed(e) => {
                warn!(error = %e, "Failed to download");
                self.failed += 1;
            }
        }
    }
}

/// How a `fetch` invocation ended.
#[derive(Debug)]
pub enum FetchRun {
    /// No results file yet; nothing was requested.
    MissingResults,
    /// The results file could not be read as a tender list.
    InvalidResults(anyhow::Error),
    Done(FetchStats),
}

/// Load the discovery file and download everything it lists. The portal is
/// not contacted unless the file exists and parses.
pub async fn run(
    portal: &PortalClient,
    results_file: &Path,
    downloads_dir: &Path,
    delay: Duration,
) -> Result<FetchRun> {
    if !results_file.exists() {
        return Ok(FetchRun::MissingResults);
    }
    let tenders = match load_tenders(results_file) {
        Ok(t) => t,
        Err(e) => return Ok(FetchRun::InvalidResults(e)),
    };
    println!("Found {} tenders to process.", tenders.len());
    let stats = fetch_all(portal, &tenders, downloads_dir, delay).await?;
    Ok(FetchRun::Done(stats))
}

/// Make sure every attachment of every tender exists under `downloads_dir`.
///
/// Files already on disk are never requested again; `delay` is slept after
/// each attempted download.
pub async fn fetch_all(
    portal: &PortalClient,
    tenders: &[Tender],
    downloads_dir: &Path,
    delay: Duration,
) -> Result<FetchStats> {
    let mut stats = FetchStats::default();

    for tender in tenders {
        let (Some(tender_id), Some(dir_name)) = (tender.object_id.as_deref(), tender.dir_name())
        else {
            continue;
        };
        let docs = tender.documents();
        if docs.is_empty() {
            continue;
        }

        let title = tender.title.as_deref().unwrap_or("Untitled");
        println!("\nProcessing Tender: {} ({})", title, tender_id);

        let tender_dir = downloads_dir.join(&dir_name);
        std::fs::create_dir_all(&tender_dir)
            .with_context(|| format!("Failed to create {}", tender_dir.display()))?;

        for doc in docs {
            let Some((doc_id, file_name)) = doc.download_target() else {
                continue;
            };
            let safe_name = sanitize_filename(file_name);
            let dest = tender_dir.join(&safe_name);

            if dest.exists() {
                info!(file = %safe_name, "Skipping (already exists)");
                stats.record(&DownloadOutcome::AlreadyPresent);
                continue;
            }

            info!(file = %safe_name, "Downloading");
            let url = portal.document_url(tender_id, doc_id);
            let outcome = match portal.download(&url, &dest).await {
                Ok(bytes) => DownloadOutcome::Downloaded(bytes),
                Err(e) => DownloadOutcome::Failed(e),
            };
            stats.record(&outcome);

            tokio::time::sleep(delay).await;
        }
    }

    Ok(stats)
}
