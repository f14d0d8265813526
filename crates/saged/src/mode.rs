//! FAST / DEEP mode decision.
//!
//! Rule order is fixed: explicit deep hint, then complexity, then the
//! policy's preferred mode. Both DEEP rules require enough tool rounds for
//! the loop to be worth running. Complexity scoring is pluggable; neither
//! shipped scorer's thresholds are load-bearing for correctness.

use sage_shared::{AnswerRequest, ExecutionPolicy, Mode, ModeHint};
use std::sync::Arc;

use crate::config::DeepConfig;

/// Minimum `max_tool_rounds` for a DEEP run.
pub const DEEP_MIN_ROUNDS: u32 = 3;

/// Shortest question the keyword heuristic considers complex.
pub const COMPLEX_MIN_CHARS: usize = 20;

/// Comparative and analytical cue words.
pub const ANALYTICAL_KEYWORDS: &[&str] = &[
    "compare",
    "comparison",
    "versus",
    " vs ",
    " vs. ",
    "difference between",
    "differences",
    "trade-off",
    "tradeoff",
    "pros and cons",
    "analyze",
    "analyse",
    "analysis",
    "evaluate",
    "assess",
    "implications",
    "impact of",
    "why does",
    "why do",
    "explain how",
    "step by step",
    "root cause",
];

/// Complexity scoring strategy. Implementations must be pure.
pub trait ComplexityScorer: Send + Sync {
    /// Score in [0, 1]
    fn score(&self, question: &str) -> f64;

    fn is_complex(&self, question: &str) -> bool;

    fn name(&self) -> &'static str;
}

fn keyword_hits(lower: &str) -> usize {
    ANALYTICAL_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .count()
}

/// Length, then keyword or question-mark count.
#[derive(Debug, Clone, Default)]
pub struct KeywordScorer;

impl ComplexityScorer for KeywordScorer {
    fn score(&self, question: &str) -> f64 {
        if self.is_complex(question) {
            1.0
        } else {
            0.0
        }
    }

    fn is_complex(&self, question: &str) -> bool {
        let trimmed = question.trim();
        if trimmed.chars().count() < COMPLEX_MIN_CHARS {
            return false;
        }
        // Pad so " vs " matches at either end
        let lower = format!(" {} ", trimmed.to_lowercase());
        keyword_hits(&lower) > 0 || trimmed.matches('?').count() >= 2
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

/// Weighted 0..1 score compared against a threshold.
#[derive(Debug, Clone)]
pub struct WeightedScorer {
    pub threshold: f64,
}

impl WeightedScorer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for WeightedScorer {
    fn default() -> Self {
        Self::new(0.62)
    }
}

impl ComplexityScorer for WeightedScorer {
    fn score(&self, question: &str) -> f64 {
        let trimmed = question.trim();
        let lower = format!(" {} ", trimmed.to_lowercase());
        let chars = trimmed.chars().count() as f64;

        let length = (chars / 200.0).min(1.0) * 0.25;
        let keywords = (keyword_hits(&lower) as f64 / 2.0).min(1.0) * 0.35;
        let questions = (trimmed.matches('?').count() as f64 / 3.0).min(1.0) * 0.15;
        let clauses = [" and ", " but ", " while ", " whereas ", " however ", ";"]
            .iter()
            .map(|c| lower.matches(c).count())
            .sum::<usize>();
        let structure = (clauses as f64 / 3.0).min(1.0) * 0.15;
        let depth = if ["in detail", "thoroughly", "in depth", "comprehensive"]
            .iter()
            .any(|c| lower.contains(c))
        {
            0.10
        } else {
            0.0
        };

        (length + keywords + questions + structure + depth).clamp(0.0, 1.0)
    }

    fn is_complex(&self, question: &str) -> bool {
        self.score(question) >= self.threshold
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

/// Pure mode decision over (request, policy).
#[derive(Clone)]
pub struct ModeDecider {
    scorer: Arc<dyn ComplexityScorer>,
}

impl ModeDecider {
    pub fn new(scorer: Arc<dyn ComplexityScorer>) -> Self {
        Self { scorer }
    }

    pub fn from_config(config: &DeepConfig) -> Self {
        let scorer: Arc<dyn ComplexityScorer> = match config.scorer.as_str() {
            "weighted" => Arc::new(WeightedScorer::new(config.complexity_threshold)),
            _ => Arc::new(KeywordScorer),
        };
        Self::new(scorer)
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    pub fn complexity(&self, request: &AnswerRequest) -> f64 {
        self.scorer.score(&request.question)
    }

    pub fn decide(&self, request: &AnswerRequest, policy: &ExecutionPolicy) -> Mode {
        let deep_allowed = policy.max_tool_rounds >= DEEP_MIN_ROUNDS;

        if request.mode_hint == ModeHint::Deep && deep_allowed {
            return Mode::Deep;
        }
        if deep_allowed && self.scorer.is_complex(&request.question) {
            return Mode::Deep;
        }
        policy.preferred_mode
    }
}

impl Default for ModeDecider {
    fn default() -> Self {
        Self::new(Arc::new(KeywordScorer))
    }
}
