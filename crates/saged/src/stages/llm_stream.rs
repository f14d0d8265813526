//! FAST answer generation, streamed as `answer_delta` envelopes.

use async_trait::async_trait;
use sage_shared::StageName;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::error::StageError;
use crate::llm::{LlmClient, LlmRequest, Purpose};
use crate::pipeline::memory::keys;
use crate::pipeline::{PipelineContext, Stage};
use crate::prompts::{self, AnswerContext};

const LEADING_LABELS: &[&str] = &["answer:", "assistant:"];

/// Drops what a model sometimes prepends before the first real token:
/// whitespace, a byte order mark, an `Answer:` or `Assistant:` label.
/// Everything after the first real token passes through unchanged.
#[derive(Debug, Default)]
pub struct LeadingArtifactFilter {
    pending: String,
    label_checked: bool,
    started: bool,
}

fn trim_leading(text: &str) -> &str {
    text.trim_start_matches(|c: char| c == '\u{feff}' || c.is_whitespace())
}

fn starts_with_label(text: &str, label: &str) -> bool {
    text.len() >= label.len() && text.as_bytes()[..label.len()].eq_ignore_ascii_case(label.as_bytes())
}

fn could_be_label(text: &str) -> bool {
    LEADING_LABELS.iter().any(|label| {
        text.len() < label.len()
            && label.as_bytes()[..text.len()].eq_ignore_ascii_case(text.as_bytes())
    })
}

impl LeadingArtifactFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to forward for this chunk, if any.
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        if self.started {
            return Some(chunk.to_string());
        }
        self.pending.push_str(chunk);

        loop {
            let trimmed = trim_leading(&self.pending);
            if trimmed.is_empty() {
                self.pending.clear();
                return None;
            }
            if self.label_checked {
                break;
            }
            if let Some(label) = LEADING_LABELS.iter().find(|l| starts_with_label(trimmed, l)) {
                self.pending = trimmed[label.len()..].to_string();
                self.label_checked = true;
                continue;
            }
            if could_be_label(trimmed) {
                return None;
            }
            self.label_checked = true;
        }

        self.started = true;
        let text = trim_leading(&self.pending).to_string();
        self.pending.clear();
        Some(text)
    }

    /// Flush a held-back prefix once the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.started {
            return None;
        }
        let text = trim_leading(&self.pending).to_string();
        self.pending.clear();
        if text.is_empty() {
            None
        } else {
            self.started = true;
            Some(text)
        }
    }
}

pub struct LlmStreamStage {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmStreamStage {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }
}

#[async_trait]
impl Stage for LlmStreamStage {
    fn name(&self) -> &'static str {
        "llm_stream"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let prompt = prompts::answer_prompt(
            &ctx.request.question,
            &AnswerContext {
                history: ctx.list(keys::HISTORY),
                files: ctx.list(keys::FILES),
                passages: ctx.list(keys::RAG_CHUNKS),
                tool_calls: ctx.list(keys::TOOL_CALLS),
            },
        );
        let request = LlmRequest::new(Purpose::Answer, prompts::ANSWER_SYSTEM, prompt)
            .with_model(ctx.request.model.clone());

        let mut stream = self.llm.stream(&request).await?;
        let mut filter = LeadingArtifactFilter::new();
        let mut answer = String::new();
        let mut failure = None;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            if let Some(text) = filter.push(&chunk) {
                if text.is_empty() {
                    continue;
                }
                answer.push_str(&text);
                ctx.emit(StageName::AnswerDelta, "", serde_json::json!({ "text": text }))
                    .await?;
            }
        }
        if let Some(text) = filter.finish() {
            answer.push_str(&text);
            ctx.emit(StageName::AnswerDelta, "", serde_json::json!({ "text": text }))
                .await?;
        }

        debug!("[llm] streamed {} chars", answer.len());
        if !answer.is_empty() {
            ctx.put(keys::ANSWER, answer)?;
        }
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&str]) -> Vec<String> {
        let mut filter = LeadingArtifactFilter::new();
        let mut out: Vec<String> = chunks.iter().filter_map(|c| filter.push(c)).collect();
        out.extend(filter.finish());
        out
    }

    #[test]
    fn test_strips_whitespace_and_bom() {
        assert_eq!(run(&["\u{feff}", "  \n", "Hello", " world"]), vec!["Hello", " world"]);
    }

    #[test]
    fn test_strips_label_split_across_chunks() {
        assert_eq!(run(&["Ans", "wer:", " Pong", "!"]), vec!["Pong", "!"]);
        assert_eq!(run(&["assistant: hi"]), vec!["hi"]);
    }

    #[test]
    fn test_later_text_is_verbatim() {
        assert_eq!(run(&["Hi", "  Answer: keep"]), vec!["Hi", "  Answer: keep"]);
    }

    #[test]
    fn test_short_answer_resembling_label_is_flushed() {
        assert_eq!(run(&["Ans"]), vec!["Ans"]);
    }

    #[test]
    fn test_non_label_word_passes() {
        assert_eq!(run(&["Answering your question"]), vec!["Answering your question"]);
    }
}
