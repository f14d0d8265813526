//! Retrieval and file extraction collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CollabError;

/// One retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveRequest<'a> {
    query: &'a str,
    top_k: usize,
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    chunks: Vec<RetrievedChunk>,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        session_id: &str,
    ) -> Result<Vec<RetrievedChunk>, CollabError>;
}

/// Client for an external `/retrieve` endpoint.
pub struct HttpRetriever {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpRetriever {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollabError> {
        Ok(Self {
            http_client: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        session_id: &str,
    ) -> Result<Vec<RetrievedChunk>, CollabError> {
        let response = self
            .http_client
            .post(format!("{}/retrieve", self.base_url))
            .json(&RetrieveRequest {
                query,
                top_k,
                session_id,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CollabError::Status(response.status().as_u16()));
        }
        let body: RetrieveResponse = response.json().await?;
        let mut chunks = body.chunks;
        chunks.truncate(top_k);
        Ok(chunks)
    }
}

/// Text pulled from one attached file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileText {
    pub url: String,
    pub text: String,
    pub truncated: bool,
}

#[async_trait]
pub trait FileExtractor: Send + Sync {
    async fn extract(&self, url: &str, max_bytes: usize) -> Result<FileText, CollabError>;
}

/// Fetches the file over HTTP and keeps its text body.
pub struct HttpFileExtractor {
    http_client: reqwest::Client,
}

impl HttpFileExtractor {
    pub fn new(timeout: Duration) -> Result<Self, CollabError> {
        Ok(Self {
            http_client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

/// Cut `text` to at most `max_bytes` on a char boundary.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> (&str, bool) {
    if text.len() <= max_bytes {
        return (text, false);
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (&text[..end], true)
}

#[async_trait]
impl FileExtractor for HttpFileExtractor {
    async fn extract(&self, url: &str, max_bytes: usize) -> Result<FileText, CollabError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CollabError::Other(format!("unsupported file URL '{}'", url)));
        }
        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(CollabError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;
        let (text, truncated) = truncate_utf8(&body, max_bytes);
        Ok(FileText {
            url: url.to_string(),
            text: text.to_string(),
            truncated,
        })
    }
}
