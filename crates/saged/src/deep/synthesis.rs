//! SYNTHESIZE: compose and stream the deep answer.
//!
//! Runs once per deep run, whether or not the loop completed a round. Text
//! comes from the model when it answers in time, else from the last
//! hypothesis, else the placeholder.

use async_trait::async_trait;
use sage_shared::StageName;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::error::StageError;
use crate::llm::{LlmClient, LlmRequest, Purpose};
use crate::pipeline::memory::keys;
use crate::pipeline::runner::PLACEHOLDER_ANSWER;
use crate::pipeline::{PipelineContext, Stage};
use crate::prompts::{self, DeepState};

pub const UNRESOLVED_HEADER: &str = "The following issues are unresolved:";

pub fn append_unresolved(text: &str, claims: &[String]) -> String {
    if claims.is_empty() {
        return text.to_string();
    }
    let mut out = text.trim_end().to_string();
    out.push_str("\n\n");
    out.push_str(UNRESOLVED_HEADER);
    for claim in claims {
        out.push_str("\n- ");
        out.push_str(claim);
    }
    out
}

/// Split into pieces of at most `max_chars` characters.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|piece| piece.iter().collect())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Llm,
    Hypothesis,
    Placeholder,
}

impl Source {
    fn as_str(&self) -> &'static str {
        match self {
            Source::Llm => "llm",
            Source::Hypothesis => "hypothesis",
            Source::Placeholder => "placeholder",
        }
    }
}

pub struct SynthesisStage {
    llm: Arc<dyn LlmClient>,
    chunk_chars: usize,
    timeout: Duration,
}

impl SynthesisStage {
    pub fn new(llm: Arc<dyn LlmClient>, chunk_chars: usize, timeout: Duration) -> Self {
        Self {
            llm,
            chunk_chars,
            timeout,
        }
    }

    /// The model gets half the stage budget so the fallback can still stream.
    fn llm_timeout(&self) -> Duration {
        self.timeout / 2
    }

    async fn compose(&self, ctx: &PipelineContext) -> (String, Source) {
        let last_hypothesis = ctx
            .list(keys::REASONING)
            .iter()
            .rev()
            .find(|s| s.has_output())
            .map(|s| s.hypothesis.clone());
        let last_hypothesis = match last_hypothesis {
            Some(h) => h,
            None => return (PLACEHOLDER_ANSWER.to_string(), Source::Placeholder),
        };

        let prompt = prompts::synthesize_prompt(
            &ctx.request.question,
            &DeepState {
                plan: ctx.get(keys::PLAN),
                steps: ctx.list(keys::REASONING),
                notes: ctx.list(keys::REFLECTIONS),
                tool_calls: ctx.list(keys::TOOL_CALLS),
            },
        );
        let request = LlmRequest::new(Purpose::Synthesize, prompts::SYNTHESIZE_SYSTEM, prompt)
            .with_model(ctx.request.model.clone());

        match timeout(self.llm_timeout(), self.llm.complete(&request)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => (text.trim().to_string(), Source::Llm),
            Ok(Ok(_)) => (last_hypothesis, Source::Hypothesis),
            Ok(Err(e)) => {
                warn!("[deep] synthesis call failed, using last hypothesis: {}", e);
                (last_hypothesis, Source::Hypothesis)
            }
            Err(_) => {
                warn!("[deep] synthesis call timed out, using last hypothesis");
                (last_hypothesis, Source::Hypothesis)
            }
        }
    }
}

#[async_trait]
impl Stage for SynthesisStage {
    fn name(&self) -> &'static str {
        "synthesis"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let (text, source) = self.compose(ctx).await;

        let claims: Vec<String> = match ctx.get(keys::VERIFICATION) {
            Some(report) => report.unresolved_claims.clone(),
            None => {
                let mut claims: Vec<String> = Vec::new();
                for claim in ctx
                    .list(keys::REFLECTIONS)
                    .iter()
                    .flat_map(|n| n.unresolved_claims.iter())
                {
                    if !claims.contains(claim) {
                        claims.push(claim.clone());
                    }
                }
                claims
            }
        };
        let answer = append_unresolved(&text, &claims);

        let chunks = chunk_text(&answer, self.chunk_chars);
        for chunk in &chunks {
            ctx.emit(StageName::AnswerDelta, "", serde_json::json!({ "text": chunk }))
                .await?;
        }

        let payload = serde_json::json!({
            "source": source.as_str(),
            "chars": answer.chars().count(),
            "chunks": chunks.len(),
            "unresolved": claims.len(),
            "verified": ctx.get(keys::VERIFICATION).map(|r| r.verified),
        });
        ctx.put(keys::ANSWER, answer)?;
        ctx.emit(
            StageName::Synthesis,
            format!("answer composed from {}", source.as_str()),
            payload,
        )
        .await
    }
}
