use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_PORTAL_URL: &str = "https://ezamowienia.gov.pl/mp-readmodels/api";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-5-mini";

/// Paths, endpoints and pacing. Every field can be overridden with a
/// `TENDERS_`-prefixed environment variable, e.g. `TENDERS_DOWNLOADS_DIR`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub portal_url: String,
    pub openai_url: String,
    pub model: String,
    pub results_file: PathBuf,
    pub downloads_dir: PathBuf,
    pub responses_dir: PathBuf,
    pub prompt_file: PathBuf,
    pub page_size: u32,
    pub download_delay_ms: u64,
    pub request_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            portal_url: DEFAULT_PORTAL_URL.into(),
            openai_url: DEFAULT_OPENAI_URL.into(),
            model: DEFAULT_MODEL.into(),
            results_file: "procurement_results.json".into(),
            downloads_dir: "downloads".into(),
            responses_dir: "responses".into(),
            prompt_file: "Prompt.md".into(),
            page_size: 10,
            download_delay_ms: 500,
            request_delay_ms: 2000,
        }
    }
}

/// Export `.env` (if any) into the process environment. Variables already
/// set win over the file.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

impl Settings {
    /// Layer `TENDERS_*` variables over the defaults.
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("TENDERS").try_parsing(true))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let d = Settings::default();
        config::Config::builder()
            .set_default("portal_url", d.portal_url)?
            .set_default("openai_url", d.openai_url)?
            .set_default("model", d.model)?
            .set_default("results_file", d.results_file.to_string_lossy().into_owned())?
            .set_default("downloads_dir", d.downloads_dir.to_string_lossy().into_owned())?
            .set_default("responses_dir", d.responses_dir.to_string_lossy().into_owned())?
            .set_default("prompt_file", d.prompt_file.to_string_lossy().into_owned())?
            .set_default("page_size", i64::from(d.page_size))?
            .set_default("download_delay_ms", d.download_delay_ms as i64)?
            .set_default("request_delay_ms", d.request_delay_ms as i64)?
            .add_source(source)
            .build()
            .context("Failed to load settings")?
            .try_deserialize()
            .context("Invalid TENDERS_* setting")
    }

    pub fn download_delay(&self) -> Duration {
        Duration::from_millis(self.download_delay_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// The AI credential, read from `OPENAI_API_KEY`. Empty counts as missing.
pub fn openai_api_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())
}
