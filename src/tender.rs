//! Tender records as stored in the discovery file, plus the naming rules that
//! map a tender onto its download directory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

const SHORT_ID_LEN: usize = 8;
const TITLE_MAX_CHARS: usize = 50;
pub const UNKNOWN_YEAR: &str = "Unknown";

/// The subset of an upstream tender detail object the pipeline reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tender {
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub initiation_date: Option<String>,
    #[serde(default)]
    pub tender_documents: Option<Vec<TenderDocument>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenderDocument {
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Tender {
    /// Directory name for this tender, `None` without an id.
    pub fn dir_name(&self) -> Option<String> {
        let id = non_empty(self.object_id.as_deref())?;
        Some(tender_dir_name(id, self.title.as_deref().unwrap_or("Untitled")))
    }

    pub fn documents(&self) -> &[TenderDocument] {
        self.tender_documents.as_deref().unwrap_or_default()
    }

    /// Year part of `initiationDate` (its first four characters).
    pub fn year(&self) -> Option<String> {
        let date = non_empty(self.initiation_date.as_deref())?;
        Some(date.chars().take(4).collect())
    }
}

impl TenderDocument {
    /// Document id and original file name, when both are present.
    pub fn download_target(&self) -> Option<(&str, &str)> {
        let file_name = non_empty(self.attachment.as_ref()?.file_name.as_deref())?;
        let doc_id = non_empty(self.object_id.as_deref())?;
        Some((doc_id, file_name))
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

/// Replace the characters `<>:"/\|?*` with `_`, leaving everything else alone.
pub fn sanitize_filename(name: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());
    re.replace_all(name, "_").into_owned()
}

pub fn short_id(object_id: &str) -> String {
    object_id.chars().take(SHORT_ID_LEN).collect()
}

/// `{short id}_{sanitized title, at most 50 chars, trimmed}`.
pub fn tender_dir_name(object_id: &str, title: &str) -> String {
    let safe_title: String = sanitize_filename(title).chars().take(TITLE_MAX_CHARS).collect();
    format!("{}_{}", short_id(object_id), safe_title.trim())
}

/// Read the discovery file as typed tender records.
pub fn load_tenders(path: &Path) -> Result<Vec<Tender>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Short id -> tender lookup used to recover ids and years from folder names.
///
/// Two tenders sharing a short id collide; the later one wins.
#[derive(Debug, Default)]
pub struct TenderIndex {
    by_short_id: HashMap<String, Tender>,
}

/// Identifier and year a tender folder resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub procurement_id: String,
    pub year: String,
}

impl TenderIndex {
    pub fn from_tenders(tenders: Vec<Tender>) -> Self {
        let by_short_id = tenders
            .into_iter()
            .filter_map(|t| {
                let key = short_id(non_empty(t.object_id.as_deref())?);
                Some((key, t))
            })
            .collect();
        Self { by_short_id }
    }

    /// Build from the discovery file. A missing file gives an empty index, and
    /// so does an unparsable one (after a warning).
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match load_tenders(path) {
            Ok(tenders) => Self::from_tenders(tenders),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Error parsing results file");
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_short_id.len()
    }

    pub fn short_id_of(folder_name: &str) -> &str {
        folder_name.split('_').next().unwrap_or(folder_name)
    }

    pub fn resolve(&self, folder_name: &str) -> Resolved {
        let mut resolved = Resolved {
            procurement_id: folder_name.to_string(),
            year: UNKNOWN_YEAR.to_string(),
        };
        if let Some(tender) = self.by_short_id.get(Self::short_id_of(folder_name)) {
            if let Some(id) = non_empty(tender.object_id.as_deref()) {
                resolved.procurement_id = id.to_string();
            }
            if let Some(year) = tender.year() {
                resolved.year = year;
            }
        }
        resolved
    }
}
