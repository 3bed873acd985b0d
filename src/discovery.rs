use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::portal::PortalClient;

/// Counts from one discovery run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub found: usize,
    pub fetched: usize,
    pub failed: usize,
}

/// How a `discover` invocation ended. Only `Saved` leaves a fresh results
/// file behind; every other outcome leaves an existing one untouched.
#[derive(Debug)]
pub enum DiscoveryRun {
    /// Keyword or date missing; nothing was requested.
    MissingQuery,
    SearchFailed(anyhow::Error),
    SaveFailed(anyhow::Error),
    Saved { records: usize, stats: DiscoveryStats },
}

/// Discover tenders for `keyword`/`date_from` and overwrite `results_file`
/// with their details.
pub async fn run(
    portal: &PortalClient,
    keyword: Option<&str>,
    date_from: Option<&str>,
    page_size: u32,
    results_file: &Path,
) -> DiscoveryRun {
    let (Some(keyword), Some(date_from)) = (
        keyword.filter(|k| !k.is_empty()),
        date_from.filter(|d| !d.is_empty()),
    ) else {
        return DiscoveryRun::MissingQuery;
    };

    println!("Searching for tenders with keyword '{}' since '{}'...", keyword, date_from);
    let (tenders, stats) = match discover(portal, keyword, date_from, page_size).await {
        Ok(found) => found,
        Err(e) => return DiscoveryRun::SearchFailed(e),
    };
    match save_results(results_file, &tenders) {
        Ok(()) => DiscoveryRun::Saved {
            records: tenders.len(),
            stats,
        },
        Err(e) => DiscoveryRun::SaveFailed(e),
    }
}

/// Search for tenders and fetch details for each hit, in search order.
///
/// Summaries without an `objectId` are ignored; a failed detail request is
/// logged and that tender left out.
pub async fn discover(
    portal: &PortalClient,
    keyword: &str,
    date_from: &str,
    page_size: u32,
) -> Result<(Vec<Value>, DiscoveryStats)> {
    info!(keyword, date_from, "Searching for tenders");
    let summaries = portal
        .search(keyword, date_from, page_size)
        .await
        .context("Error searching tenders")?;

    let mut stats = DiscoveryStats {
        found: summaries.len(),
        ..Default::default()
    };
    println!("Found {} tenders. Fetching details...", summaries.len());

    let mut details = Vec::with_capacity(summaries.len());
    for summary in &summaries {
        let Some(object_id) = summary.get("objectId").and_then(Value::as_str) else {
            continue;
        };
        match portal.tender_details(object_id).await {
            Ok(tender) => {
                info!(object_id, "Fetched tender details");
                details.push(tender);
                stats.fetched += 1;
            }
            Err(e) => {
                warn!(object_id, error = %e, "Error fetching tender details");
                stats.failed += 1;
            }
        }
    }

    Ok((details, stats))
}

/// Overwrite `path` with the tender list, indented by four spaces. Non-ASCII
/// text is written as-is.
pub fn save_results(path: &Path, tenders: &[Value]) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    tenders.serialize(&mut ser)?;
    std::fs::write(path, buf).with_context(|| format!("Error saving results to {}", path.display()))
}
