//! Attached file extraction.

use async_trait::async_trait;
use sage_shared::StageName;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::FilesConfig;
use crate::error::StageError;
use crate::pipeline::memory::keys;
use crate::pipeline::{PipelineContext, Stage};
use crate::retrieval::FileExtractor;

/// Pulls text out of the request's files. Partial success keeps what was
/// extracted; the stage only fails when every file failed.
pub struct FileExtractStage {
    extractor: Arc<dyn FileExtractor>,
    limits: FilesConfig,
    timeout: Duration,
}

impl FileExtractStage {
    pub fn new(extractor: Arc<dyn FileExtractor>, limits: FilesConfig, timeout: Duration) -> Self {
        Self {
            extractor,
            limits,
            timeout,
        }
    }
}

#[async_trait]
impl Stage for FileExtractStage {
    fn name(&self) -> &'static str {
        "file_extract"
    }

    fn is_enabled(&self, ctx: &PipelineContext) -> bool {
        ctx.policy.allow_file && !ctx.request.file_urls.is_empty()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let urls: Vec<String> = ctx
            .request
            .file_urls
            .iter()
            .take(self.limits.max_files)
            .cloned()
            .collect();
        let skipped = ctx.request.file_urls.len().saturating_sub(urls.len());

        let mut extracted = Vec::new();
        let mut failed = Vec::new();
        for url in &urls {
            match self.extractor.extract(url, self.limits.max_bytes).await {
                Ok(file) => extracted.push(file),
                Err(e) => {
                    warn!("[files] {} failed: {}", url, e);
                    failed.push(serde_json::json!({ "url": url, "reason": e.to_string() }));
                }
            }
        }

        if extracted.is_empty() {
            return Err(StageError::FileExtract(format!(
                "none of {} file(s) could be read",
                urls.len()
            )));
        }

        let files: Vec<_> = extracted
            .iter()
            .map(|f| {
                serde_json::json!({
                    "url": f.url,
                    "bytes": f.text.len(),
                    "truncated": f.truncated,
                })
            })
            .collect();
        let message = format!("extracted {} of {} file(s)", extracted.len(), urls.len());
        ctx.extend(keys::FILES, extracted);
        ctx.emit(
            StageName::FileExtract,
            message,
            serde_json::json!({ "files": files, "failed": failed, "skipped": skipped }),
        )
        .await
    }
}
