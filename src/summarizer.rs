//! Per-tender AI summaries: `downloads/{folder}/*` -> `responses/{folder}.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::AiError;
use crate::openai::DocumentAnalyzer;
use crate::tender::TenderIndex;

pub const NO_CLIENT: &str = "OpenAI client not initialized - OPENAI_API_KEY missing";
pub const NO_UPLOADS: &str = "No files could be uploaded for this procurement";

/// Extension of generated report files, which are never uploaded.
const REPORT_EXTENSION: &str = "md";

/// Everything one summarize run needs, built once at startup.
pub struct Summarizer<'a> {
    /// `None` when no credential is configured: every tender then gets an
    /// error record and nothing touches the network.
    pub analyzer: Option<&'a dyn DocumentAnalyzer>,
    pub prompt: String,
    pub index: TenderIndex,
    pub delay: Duration,
}

/// Result of one extraction, as written to the response file.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Model text that parsed as JSON.
    Parsed(Value),
    /// Model text that did not parse, kept verbatim.
    Raw(String),
    Failed {
        error: String,
        procurement_id: String,
        year: String,
    },
}

impl Extraction {
    /// Trimmed model text: JSON if it parses, otherwise wrapped raw.
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        match serde_json::from_str(text) {
            Ok(value) => Extraction::Parsed(value),
            Err(_) => Extraction::Raw(text.to_string()),
        }
    }

    fn failed(error: impl ToString, procurement_id: &str, year: &str) -> Self {
        Extraction::Failed {
            error: error.to_string(),
            procurement_id: procurement_id.to_string(),
            year: year.to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Extraction::Parsed(v) => v.clone(),
            Extraction::Raw(text) => json!({ "text": text }),
            Extraction::Failed {
                error,
                procurement_id,
                year,
            } => json!({
                "error": error,
                "procurement_id": procurement_id,
                "year": year,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Extraction::Failed { .. })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SummarizeStats {
    pub processed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub empty: usize,
}

/// Upload candidates: hidden files and report files are left out.
pub fn is_uploadable(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    path.extension().map_or(true, |ext| ext != REPORT_EXTENSION)
}

pub fn build_prompt(system_prompt: &str, procurement_id: &str, year: &str) -> String {
    format!(
        "{system_prompt}\n\nNow analyze the following tender documents for procurement ID \
         {procurement_id} in year {year}. Use all attached files as context and return ONLY \
         the JSON object as specified in the instructions (no extra text, no explanations)."
    )
}

/// Regular files directly inside `dir`, sorted by name.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Write `value` pretty-printed with non-ASCII text as-is.
pub fn write_json(path: &Path, value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

impl Summarizer<'_> {
    /// Upload `files` and run one extraction over them. Never fails: every
    /// problem becomes an [`Extraction::Failed`].
    pub async fn summarize_tender(
        &self,
        procurement_id: &str,
        year: &str,
        files: &[PathBuf],
    ) -> Extraction {
        info!(procurement_id, files = files.len(), "Calling model");

        let Some(analyzer) = self.analyzer else {
            warn!(procurement_id, "{}", NO_CLIENT);
            return Extraction::failed(AiError::Config(NO_CLIENT.into()), procurement_id, year);
        };

        let mut file_ids = Vec::new();
        for path in files.iter().filter(|p| is_uploadable(p)) {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            match analyzer.upload(path).await {
                Ok(id) => {
                    info!(file = %name, file_id = %id, "Uploaded");
                    file_ids.push(id);
                }
                Err(e) => warn!(file = %name, error = %e, "Skipping (upload failed)"),
            }
        }

        if file_ids.is_empty() {
            warn!(procurement_id, "{}", NO_UPLOADS);
            return Extraction::failed(NO_UPLOADS, procurement_id, year);
        }

        let prompt = build_prompt(&self.prompt, procurement_id, year);
        match analyzer.analyze(&prompt, &file_ids).await {
            Ok(text) => {
                info!(procurement_id, "Successfully processed");
                Extraction::from_text(&text)
            }
            Err(e) => {
                warn!(procurement_id, error = %e, "Error calling model");
                Extraction::failed(e, procurement_id, year)
            }
        }
    }

    /// Summarize every tender folder under `downloads_dir` that has no
    /// response file yet.
    pub async fn run(&self, downloads_dir: &Path, responses_dir: &Path) -> Result<SummarizeStats> {
        std::fs::create_dir_all(responses_dir)
            .with_context(|| format!("Failed to create {}", responses_dir.display()))?;

        let mut stats = SummarizeStats::default();
        for dir in list_dirs(downloads_dir)? {
            let folder_name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let resolved = self.index.resolve(&folder_name);
            println!(
                "\nProcessing: {} (ID: {}, Year: {})",
                folder_name,
                TenderIndex::short_id_of(&folder_name),
                resolved.year
            );

            let response_file = responses_dir.join(format!("{folder_name}.json"));
            if response_file.exists() {
                info!(folder = %folder_name, "Skipping (already processed)");
                stats.skipped += 1;
                continue;
            }

            let files = list_files(&dir)?;
            if files.is_empty() {
                warn!(folder = %folder_name, "No files found in directory");
                stats.empty += 1;
                continue;
            }

            let extraction = self
                .summarize_tender(&resolved.procurement_id, &resolved.year, &files)
                .await;
            write_json(&response_file, &extraction.to_json())?;
            info!(path = %response_file.display(), "Saved response");

            stats.processed += 1;
            if extraction.is_error() {
                stats.errors += 1;
            }

            tokio::time::sleep(self.delay).await;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tender::Tender;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records calls; uploads fail for names containing "broken".
    struct FakeAnalyzer {
        reply: std::result::Result<String, String>,
        uploads: Mutex<Vec<String>>,
        prompts: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeAnalyzer {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                uploads: Mutex::new(Vec::new()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing(msg: &str) -> Self {
            Self {
                reply: Err(msg.to_string()),
                ..Self::replying("")
            }
        }

        fn analyze_calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DocumentAnalyzer for FakeAnalyzer {
        async fn upload(&self, path: &Path) -> crate::openai::Result<String> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            if name.contains("broken") {
                return Err(AiError::Api("upload rejected".into()));
            }
            let mut uploads = self.uploads.lock().unwrap();
            uploads.push(name);
            Ok(format!("file-{}", uploads.len()))
        }

        async fn analyze(&self, prompt: &str, file_ids: &[String]) -> crate::openai::Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), file_ids.to_vec()));
            self.reply.clone().map_err(AiError::Network)
        }
    }

    fn index() -> TenderIndex {
        TenderIndex::from_tenders(vec![Tender {
            object_id: Some("ocds-148610-0001".into()),
            initiation_date: Some("2025-03-14T10:00:00".into()),
            ..Default::default()
        }])
    }

    fn summarizer(analyzer: Option<&dyn DocumentAnalyzer>) -> Summarizer<'_> {
        Summarizer {
            analyzer,
            prompt: "You are a procurement analyst.".into(),
            index: index(),
            delay: Duration::ZERO,
        }
    }

    fn setup(files: &[(&str, &[&str])]) -> tempfile::TempDir {
        let tmp = tempfile::TempDir::new().unwrap();
        for (folder, names) in files {
            let dir = tmp.path().join("downloads").join(folder);
            std::fs::create_dir_all(&dir).unwrap();
            for name in *names {
                std::fs::write(dir.join(name), b"content").unwrap();
            }
        }
        tmp
    }

    fn read(tmp: &tempfile::TempDir, folder: &str) -> Value {
        let path = tmp.path().join("responses").join(format!("{folder}.json"));
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn extraction_parses_json_or_wraps_text() {
        assert_eq!(
            Extraction::from_text("{\"risk\": \"low\"}").to_json(),
            json!({"risk": "low"})
        );
        assert_eq!(Extraction::from_text("N/A").to_json(), json!({"text": "N/A"}));
        assert_eq!(
            Extraction::from_text("  \n{\"a\": [1, 2]}\n ").to_json(),
            json!({"a": [1, 2]})
        );
    }

    #[test]
    fn upload_filter() {
        assert!(is_uploadable(Path::new("d/SWZ.pdf")));
        assert!(is_uploadable(Path::new("d/README")));
        assert!(!is_uploadable(Path::new("d/.DS_Store")));
        assert!(!is_uploadable(Path::new("d/report.md")));
        assert!(is_uploadable(Path::new("d/report.MD")));
    }

    #[test]
    fn prompt_names_id_and_year() {
        let p = build_prompt("SYSTEM", "ocds-1", "2025");
        assert!(p.starts_with("SYSTEM\n\nNow analyze the following tender documents for procurement ID ocds-1 in year 2025."));
        assert!(p.ends_with("(no extra text, no explanations)."));
    }

    #[tokio::test]
    async fn parsed_response_is_saved() {
        let tmp = setup(&[("ocds-148_Dostawa", &["SWZ.pdf", "notes.md", ".hidden"])]);
        let fake = FakeAnalyzer::replying("{\"risk\": \"low\"}");
        let s = summarizer(Some(&fake));

        let stats = s
            .run(&tmp.path().join("downloads"), &tmp.path().join("responses"))
            .await
            .unwrap();

        assert_eq!(stats, SummarizeStats { processed: 1, errors: 0, skipped: 0, empty: 0 });
        assert_eq!(read(&tmp, "ocds-148_Dostawa"), json!({"risk": "low"}));
        assert_eq!(*fake.uploads.lock().unwrap(), vec!["SWZ.pdf".to_string()]);

        let prompts = fake.prompts.lock().unwrap();
        let (prompt, ids) = &prompts[0];
        assert!(prompt.contains("procurement ID ocds-148610-0001 in year 2025"));
        assert_eq!(ids, &vec!["file-1".to_string()]);
    }

    #[tokio::test]
    async fn non_json_response_is_wrapped() {
        let tmp = setup(&[("zzzzzzzz_Other", &["a.pdf"])]);
        let fake = FakeAnalyzer::replying("N/A");
        summarizer(Some(&fake))
            .run(&tmp.path().join("downloads"), &tmp.path().join("responses"))
            .await
            .unwrap();

        assert_eq!(read(&tmp, "zzzzzzzz_Other"), json!({"text": "N/A"}));
        let prompts = fake.prompts.lock().unwrap();
        assert!(prompts[0].0.contains("procurement ID zzzzzzzz_Other in year Unknown"));
    }

    #[tokio::test]
    async fn no_uploadable_files_skips_model() {
        let tmp = setup(&[("ocds-148_Dostawa", &["summary.md", ".keep", "broken.pdf"])]);
        let fake = FakeAnalyzer::replying("{}");
        let stats = summarizer(Some(&fake))
            .run(&tmp.path().join("downloads"), &tmp.path().join("responses"))
            .await
            .unwrap();

        assert_eq!(stats.errors, 1);
        assert_eq!(fake.analyze_calls(), 0);
        assert_eq!(
            read(&tmp, "ocds-148_Dostawa"),
            json!({
                "error": "No files could be uploaded for this procurement",
                "procurement_id": "ocds-148610-0001",
                "year": "2025"
            })
        );
    }

    #[tokio::test]
    async fn failed_upload_is_left_out_of_the_request() {
        let tmp = setup(&[("ocds-148_Dostawa", &["broken.pdf", "ok.pdf", ".ok.pdf.part"])]);
        let fake = FakeAnalyzer::replying("{\"risk\": \"medium\"}");
        let stats = summarizer(Some(&fake))
            .run(&tmp.path().join("downloads"), &tmp.path().join("responses"))
            .await
            .unwrap();

        assert_eq!(stats, SummarizeStats { processed: 1, errors: 0, skipped: 0, empty: 0 });
        assert_eq!(*fake.uploads.lock().unwrap(), vec!["ok.pdf".to_string()]);
        let prompts = fake.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].1, vec!["file-1".to_string()]);
        assert_eq!(read(&tmp, "ocds-148_Dostawa"), json!({"risk": "medium"}));
    }

    #[tokio::test]
    async fn missing_client_writes_error_for_every_tender() {
        let tmp = setup(&[("aaaaaaaa_One", &["a.pdf"]), ("bbbbbbbb_Two", &["b.pdf"])]);
        let stats = summarizer(None)
            .run(&tmp.path().join("downloads"), &tmp.path().join("responses"))
            .await
            .unwrap();

        assert_eq!(stats, SummarizeStats { processed: 2, errors: 2, skipped: 0, empty: 0 });
        for folder in ["aaaaaaaa_One", "bbbbbbbb_Two"] {
            let v = read(&tmp, folder);
            assert!(v["error"].as_str().unwrap().contains("client not initialized"));
            assert_eq!(v["procurement_id"], folder);
            assert_eq!(v["year"], "Unknown");
        }
    }

    #[tokio::test]
    async fn model_failure_becomes_error_record() {
        let tmp = setup(&[("ocds-148_Dostawa", &["a.pdf"])]);
        let fake = FakeAnalyzer::failing("connection reset");
        summarizer(Some(&fake))
            .run(&tmp.path().join("downloads"), &tmp.path().join("responses"))
            .await
            .unwrap();

        let v = read(&tmp, "ocds-148_Dostawa");
        assert_eq!(v["error"], "Network error: connection reset");
        assert_eq!(v["procurement_id"], "ocds-148610-0001");
        assert_eq!(v["year"], "2025");
    }

    #[tokio::test]
    async fn rerun_makes_no_calls_and_skips_empty_dirs() {
        let tmp = setup(&[("ocds-148_Dostawa", &["a.pdf"]), ("cccccccc_Empty", &[])]);
        let responses = tmp.path().join("responses");
        std::fs::create_dir_all(&responses).unwrap();
        std::fs::write(responses.join("ocds-148_Dostawa.json"), "{\"done\": true}").unwrap();

        let fake = FakeAnalyzer::replying("{}");
        let stats = summarizer(Some(&fake))
            .run(&tmp.path().join("downloads"), &responses)
            .await
            .unwrap();

        assert_eq!(stats, SummarizeStats { processed: 0, errors: 0, skipped: 1, empty: 1 });
        assert_eq!(fake.analyze_calls(), 0);
        assert!(fake.uploads.lock().unwrap().is_empty());
        assert_eq!(read(&tmp, "ocds-148_Dostawa"), json!({"done": true}));
        assert!(!responses.join("cccccccc_Empty.json").exists());
    }
}
