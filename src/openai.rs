//! Minimal OpenAI client: file upload and the Responses API.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AiError;

pub type Result<T> = std::result::Result<T, AiError>;

/// What the summarizer needs from an AI service.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Upload one file and return its remote id.
    async fn upload(&self, path: &Path) -> Result<String>;

    /// Run one request over the prompt and uploaded files; returns the
    /// model's text output.
    async fn analyze(&self, prompt: &str, file_ids: &[String]) -> Result<String>;
}

#[derive(Clone)]
pub struct OpenAIClient {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: crate::config::DEFAULT_OPENAI_URL.to_string(),
            model: model.into(),
        }
    }

    /// Set a custom base URL (for proxies or tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response.text().await.unwrap_or_default();
        warn!(status = %status, error = %error_text, "OpenAI API error");
        Err(AiError::Api(format!("{}: {}", status, error_text)))
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ResponseRequest<'a> {
    pub model: &'a str,
    pub input: Vec<InputMessage<'a>>,
}

#[derive(Debug, Serialize)]
pub struct InputMessage<'a> {
    pub role: &'static str,
    pub content: Vec<InputContent<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContent<'a> {
    InputText { text: &'a str },
    InputFile { file_id: &'a str },
}

impl<'a> ResponseRequest<'a> {
    /// One user message: the prompt text, then every file reference.
    pub fn new(model: &'a str, prompt: &'a str, file_ids: &'a [String]) -> Self {
        let mut content = vec![InputContent::InputText { text: prompt }];
        content.extend(
            file_ids
                .iter()
                .map(|id| InputContent::InputFile { file_id: id }),
        );
        Self {
            model,
            input: vec![InputMessage {
                role: "user",
                content,
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

/// Text of a Responses API body: `output_text` when present, otherwise every
/// `output_text` content item concatenated in order.
pub fn extract_output_text(body: &Value) -> Option<String> {
    if let Some(text) = body.get("output_text").and_then(Value::as_str) {
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }

    let mut out = String::new();
    for item in body.get("output").and_then(Value::as_array).into_iter().flatten() {
        let Some(content) = item.get("content").and_then(Value::as_array) else {
            continue;
        };
        for c in content {
            if c.get("type").and_then(Value::as_str) != Some("output_text") {
                continue;
            }
            match c.get("text") {
                Some(Value::String(s)) => out.push_str(s),
                Some(obj) => {
                    if let Some(v) = obj.get("value").and_then(Value::as_str) {
                        out.push_str(v);
                    }
                }
                None => {}
            }
        }
    }
    (!out.is_empty()).then_some(out)
}

#[async_trait]
impl DocumentAnalyzer for OpenAIClient {
    async fn upload(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await.map_err(|e| AiError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let form = Form::new()
            .text("purpose", "user_data")
            .part("file", Part::bytes(bytes).file_name(file_name));

        let response = self
            .http_client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AiError::Network(e.to_string()))?;

        let file: FileObject = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;
        Ok(file.id)
    }

    async fn analyze(&self, prompt: &str, file_ids: &[String]) -> Result<String> {
        let start = std::time::Instant::now();
        let request = ResponseRequest::new(&self.model, prompt, file_ids);

        let response = self
            .http_client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "OpenAI request failed");
                AiError::Network(e.to_string())
            })?;

        let body: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;

        debug!(
            model = %self.model,
            files = file_ids.len(),
            duration_ms = start.elapsed().as_millis(),
            "OpenAI response"
        );

        extract_output_text(&body).ok_or(AiError::NoText)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn request_shape() {
        let ids = vec!["file-a".to_string(), "file-b".to_string()];
        let req = ResponseRequest::new("gpt-5-mini", "Analyze", &ids);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "model": "gpt-5-mini",
                "input": [{
                    "role": "user",
                    "content": [
                        {"type": "input_text", "text": "Analyze"},
                        {"type": "input_file", "file_id": "file-a"},
                        {"type": "input_file", "file_id": "file-b"}
                    ]
                }]
            })
        );
    }

    #[test]
    fn output_text_preferred() {
        let body = json!({"output_text": "{\"a\":1}", "output": []});
        assert_eq!(extract_output_text(&body).as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn output_items_concatenated() {
        let body = json!({
            "output_text": "",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "{\"risk\": "},
                    {"type": "refusal", "refusal": "no"},
                    {"type": "output_text", "text": {"value": "\"low\"}"}}
                ]}
            ]
        });
        assert_eq!(extract_output_text(&body).as_deref(), Some("{\"risk\": \"low\"}"));
    }

    #[test]
    fn no_text_is_none() {
        assert!(extract_output_text(&json!({"output": [{"content": []}]})).is_none());
        assert!(extract_output_text(&json!({})).is_none());
    }

    #[tokio::test]
    async fn upload_returns_file_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "file-123", "object": "file"})))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("SWZ.pdf");
        std::fs::write(&file, b"%PDF").unwrap();

        let client = OpenAIClient::new("sk-test", "gpt-5-mini").with_base_url(server.uri());
        assert_eq!(client.upload(&file).await.unwrap(), "file-123");
    }

    #[tokio::test]
    async fn analyze_posts_request_and_reads_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .and(body_partial_json(json!({"model": "gpt-5-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": [{"type": "message", "content": [{"type": "output_text", "text": "N/A"}]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAIClient::new("sk-test", "gpt-5-mini").with_base_url(server.uri());
        let text = client.analyze("prompt", &["file-1".to_string()]).await.unwrap();
        assert_eq!(text, "N/A");
    }

    #[tokio::test]
    async fn api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = OpenAIClient::new("sk-test", "gpt-5-mini").with_base_url(server.uri());
        let err = client.analyze("prompt", &[]).await.unwrap_err();
        assert!(matches!(err, AiError::Api(ref m) if m.contains("rate limited")));
    }
}
