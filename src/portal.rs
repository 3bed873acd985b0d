//! HTTP client for the e-Zamówienia read-model API: tender search, tender
//! details and document downloads.

use std::error::Error as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::PortalError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
/// Longest gap between two reads of a response before the request fails.
/// A large document that keeps arriving is never cut off.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct PortalClient {
    http: Client,
    base_url: String,
    read_timeout: Duration,
}

impl PortalClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, PortalError> {
        Self::with_read_timeout(base_url, READ_TIMEOUT)
    }

    pub fn with_read_timeout(
        base_url: impl Into<String>,
        read_timeout: Duration,
    ) -> Result<Self, PortalError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| PortalError::network(&base_url, error_chain(&e)))?;
        Ok(Self {
            http,
            base_url,
            read_timeout,
        })
    }

    pub fn search_url(
        &self,
        keyword: &str,
        date_from: &str,
        page_size: u32,
    ) -> Result<Url, PortalError> {
        let base = format!("{}/Search/SearchTenders", self.base_url);
        let page_size = page_size.to_string();
        Url::parse_with_params(
            &base,
            [
                ("title", keyword),
                ("initiationDateFrom", date_from),
                ("SortingColumnName", "InitiationDate"),
                ("SortingDirection", "DESC"),
                ("PageNumber", "1"),
                ("PageSize", page_size.as_str()),
            ],
        )
        .map_err(|e| PortalError::Parse {
            url: base,
            message: e.to_string(),
        })
    }

    pub fn details_url(&self, object_id: &str) -> String {
        format!("{}/Search/GetTender?id={}", self.base_url, object_id)
    }

    pub fn document_url(&self, tender_id: &str, doc_id: &str) -> String {
        format!(
            "{}/Tender/DownloadDocument/{}/{}",
            self.base_url, tender_id, doc_id
        )
    }

    /// First page of tender summaries matching `keyword`, newest first.
    pub async fn search(
        &self,
        keyword: &str,
        date_from: &str,
        page_size: u32,
    ) -> Result<Vec<Value>, PortalError> {
        let url = self.search_url(keyword, date_from, page_size)?.to_string();
        match self.get_json(&url).await? {
            Value::Array(items) => Ok(items),
            other => Err(PortalError::Parse {
                url,
                message: format!("expected a JSON array, got {}", type_name(&other)),
            }),
        }
    }

    /// Full detail object for one tender, as returned upstream.
    pub async fn tender_details(&self, object_id: &str) -> Result<Value, PortalError> {
        self.get_json(&self.details_url(object_id)).await
    }

    async fn get_json(&self, url: &str) -> Result<Value, PortalError> {
        debug!(url, "GET");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PortalError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.json().await.map_err(|e| PortalError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Stream `url` into `dest`. Anything but a 200 is a failure.
    ///
    /// The body goes to a hidden `.{name}.part` file next to `dest` and is
    /// renamed into place once complete, so `dest` only ever exists as a
    /// whole file. A failed download removes its part file.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, PortalError> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        if response.status() != StatusCode::OK {
            return Err(PortalError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let part = part_path(dest);
        let pb = download_bar(response.content_length(), dest);
        let result = async {
            let mut file = tokio::fs::File::create(&part)
                .await
                .map_err(|e| PortalError::io(&part, e))?;
            let mut written = 0u64;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| self.request_error(url, e))?
            {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| PortalError::io(&part, e))?;
                written += chunk.len() as u64;
                pb.inc(chunk.len() as u64);
            }
            file.flush().await.map_err(|e| PortalError::io(&part, e))?;
            drop(file);
            tokio::fs::rename(&part, dest)
                .await
                .map_err(|e| PortalError::io(dest, e))?;
            Ok::<u64, PortalError>(written)
        }
        .await;
        pb.finish_and_clear();

        if result.is_err() {
            let _ = tokio::fs::remove_file(&part).await;
        }
        result
    }

    fn request_error(&self, url: &str, err: reqwest::Error) -> PortalError {
        if is_timeout(&err) {
            PortalError::Timeout {
                url: url.to_string(),
                after: self.read_timeout,
            }
        } else {
            PortalError::network(url, error_chain(&err))
        }
    }
}

/// `dir/.{name}.part` for `dir/{name}`.
pub fn part_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.part", name))
}

fn is_timeout(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = e.source();
    }
    false
}

/// `err` followed by each of its causes, so the log says why a request
/// failed and not only that it did.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        message.push_str(": ");
        message.push_str(&e.to_string());
        source = e.source();
    }
    message
}

fn download_bar(total: Option<u64>, dest: &Path) -> ProgressBar {
    let pb = ProgressBar::new(total.unwrap_or(0));
    let style = ProgressStyle::default_bar()
        .template("{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);
    if let Some(name) = dest.file_name() {
        pb.set_message(name.to_string_lossy().into_owned());
    }
    pb
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
