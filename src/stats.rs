use std::path::Path;

use anyhow::Result;
use serde_json::Value;

use crate::tender::load_tenders;

/// Progress of the pipeline as seen on disk.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub tenders: Option<usize>,
    pub tender_dirs: usize,
    pub documents: usize,
    pub responses: usize,
    pub error_responses: usize,
}

pub fn collect(results_file: &Path, downloads_dir: &Path, responses_dir: &Path) -> Result<PipelineStats> {
    let mut s = PipelineStats {
        tenders: results_file
            .exists()
            .then(|| load_tenders(results_file).map(|t| t.len()).ok())
            .flatten(),
        ..Default::default()
    };

    if downloads_dir.is_dir() {
        for entry in std::fs::read_dir(downloads_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            s.tender_dirs += 1;
            for file in std::fs::read_dir(&path)? {
                let file = file?;
                let hidden = file.file_name().to_string_lossy().starts_with('.');
                if !hidden && file.path().is_file() {
                    s.documents += 1;
                }
            }
        }
    }

    if responses_dir.is_dir() {
        for entry in std::fs::read_dir(responses_dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            s.responses += 1;
            let is_error = std::fs::read_to_string(&path)
                .ok()
                .and_then(|t| serde_json::from_str::<Value>(&t).ok())
                .is_some_and(|v| is_error_record(&v));
            if is_error {
                s.error_responses += 1;
            }
        }
    }

    Ok(s)
}

/// Whether a response file holds one of the pipeline's own error records,
/// `{"error", "procurement_id", "year"}` and nothing else. Model output that
/// happens to carry an `error` field is a normal response.
fn is_error_record(v: &Value) -> bool {
    let Some(obj) = v.as_object() else {
        return false;
    };
    obj.len() == 3
        && obj.get("error").is_some_and(Value::is_string)
        && obj.contains_key("procurement_id")
        && obj.contains_key("year")
}

impl PipelineStats {
    pub fn print(&self) {
        match self.tenders {
            Some(n) => println!("Tenders:     {}", n),
            None => println!("Tenders:     - (no results file)"),
        }
        println!("Folders:     {}", self.tender_dirs);
        println!("Documents:   {}", self.documents);
        println!("Responses:   {}", self.responses);
        println!("  errors:    {}", self.error_responses);
    }
}
