//! Ollama backend for `LlmClient` (`/api/generate`).

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::{ChunkStream, LlmClient, LlmRequest};

/// Chunks buffered between the HTTP reader and the consuming stage
const STREAM_BUFFER: usize = 16;

pub struct OllamaClient {
    http_client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.model.clone(),
        })
    }

    /// Check if the Ollama service answers
    pub async fn is_running(&self) -> bool {
        self.http_client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn body(&self, request: &LlmRequest, stream: bool) -> Value {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let mut body = serde_json::json!({
            "model": model,
            "system": request.system,
            "prompt": request.prompt,
            "stream": stream,
        });
        if request.json {
            body["format"] = Value::String("json".to_string());
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LlmError::Status(response.status().as_u16()));
        }
        Ok(response)
    }
}

/// Parse one NDJSON line. Returns the text fragment and whether generation is done.
fn parse_stream_line(line: &str) -> Result<(String, bool), LlmError> {
    let json: Value =
        serde_json::from_str(line).map_err(|e| LlmError::Stream(format!("bad chunk: {}", e)))?;
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        return Err(LlmError::Stream(err.to_string()));
    }
    let text = json
        .get("response")
        .and_then(|r| r.as_str())
        .unwrap_or("")
        .to_string();
    let done = json.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    Ok((text, done))
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        debug!("[llm] {} request ({} chars)", request.purpose, request.prompt.len());
        let response = self.post(&self.body(request, false)).await?;
        let json: Value = response.json().await?;
        Ok(json
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string())
    }

    async fn stream(&self, request: &LlmRequest) -> Result<ChunkStream, LlmError> {
        debug!("[llm] {} stream ({} chars)", request.purpose, request.prompt.len());
        let mut response = self.post(&self.body(request, true)).await?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let mut pending = String::new();
            loop {
                let chunk = match response.chunk().await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Http(e))).await;
                        return;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = pending.find('\n') {
                    let line: String = pending.drain(..=newline).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match parse_stream_line(line) {
                        Ok((text, done)) => {
                            if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                                // Consumer went away
                                return;
                            }
                            if done {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("[llm] stream aborted: {}", e);
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
            // Trailing line without newline
            let tail = pending.trim();
            if !tail.is_empty() {
                if let Ok((text, _)) = parse_stream_line(tail) {
                    if !text.is_empty() {
                        let _ = tx.send(Ok(text)).await;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_line() {
        let (text, done) = parse_stream_line(r#"{"response":"Hel","done":false}"#).unwrap();
        assert_eq!(text, "Hel");
        assert!(!done);

        let (text, done) = parse_stream_line(r#"{"response":"","done":true}"#).unwrap();
        assert!(text.is_empty());
        assert!(done);
    }

    #[test]
    fn test_parse_stream_error_line() {
        assert!(parse_stream_line(r#"{"error":"model not found"}"#).is_err());
        assert!(parse_stream_line("not json").is_err());
    }

    #[test]
    fn test_body_uses_default_model_and_json_format() {
        let client = OllamaClient::new(&LlmConfig::default()).unwrap();
        let req = LlmRequest::new(crate::llm::Purpose::Plan, "sys", "prompt").expect_json();
        let body = client.body(&req, false);
        assert_eq!(body["model"], "qwen2.5:7b-instruct");
        assert_eq!(body["format"], "json");
        assert_eq!(body["stream"], false);
    }
}
