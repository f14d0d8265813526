//! Prompt building for the answer and deep reasoning calls.
//!
//! Context sections are added in priority order and cut to
//! `MAX_PROMPT_CHARS`; the question and the instructions always survive.

use sage_shared::{Plan, ReasoningStep, ReflectionNote, ToolCallRecord, ToolDescriptor};

use crate::conversation::{ChatTurn, Role};
use crate::retrieval::{FileText, RetrievedChunk};

/// Upper bound on context characters in one prompt.
pub const MAX_PROMPT_CHARS: usize = 24_000;

/// Result characters shown per tool call.
const TOOL_RESULT_CHARS: usize = 1_500;

pub const ANSWER_SYSTEM: &str = "You are Sage, a precise assistant. Answer the user's question \
directly. Use the provided context when it is relevant and say plainly when it is missing.";

pub const PLAN_SYSTEM: &str = "Decompose the question into a plan. Reply with one JSON object: \
{\"objective\": string, \"constraints\": [string], \"subtasks\": [string], \
\"successCriteria\": [string]}.";

pub const REASON_SYSTEM: &str = "Work on the plan one round at a time. Reply with one JSON object: \
{\"hypothesis\": string, \"confidence\": number between 0 and 1, \"evidenceRefs\": [string], \
\"evidenceGap\": boolean, \"toolCalls\": [{\"tool\": string, \"args\": object}]}. \
Set evidenceGap and list toolCalls only when a tool result is needed to conclude.";

pub const REFLECT_SYSTEM: &str = "Critique the latest reasoning round against the evidence. \
Reply with one JSON object: {\"contradiction\": boolean, \"followupAction\": \
\"continue\" | \"retry\" | \"proceed\", \"observation\": string, \"unresolvedClaims\": [string]}.";

pub const SYNTHESIZE_SYSTEM: &str = "Write the final answer for the user from the reasoning \
below. Do not mention the reasoning process, rounds or confidence values.";

/// Context gathered by the FAST stages.
#[derive(Debug, Default)]
pub struct AnswerContext<'a> {
    pub history: &'a [ChatTurn],
    pub files: &'a [FileText],
    pub passages: &'a [RetrievedChunk],
    pub tool_calls: &'a [ToolCallRecord],
}

struct Budget {
    out: String,
    remaining: usize,
}

impl Budget {
    fn new() -> Self {
        Self {
            out: String::new(),
            remaining: MAX_PROMPT_CHARS,
        }
    }

    fn section(&mut self, title: &str, body: &str) {
        if body.trim().is_empty() || self.remaining == 0 {
            return;
        }
        let text: String = body.chars().take(self.remaining).collect();
        self.remaining -= text.chars().count();
        self.out.push_str(&format!("=== {} ===\n{}\n\n", title, text));
    }

    fn finish(mut self, question: &str) -> String {
        self.out.push_str(&format!("=== QUESTION ===\n{}\n", question));
        self.out
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str(" …");
    cut
}

fn render_tool_calls(calls: &[ToolCallRecord]) -> String {
    calls
        .iter()
        .map(|call| match (&call.result, &call.error) {
            (Some(result), _) => format!(
                "[{} attempt {}] ok: {}",
                call.tool_name,
                call.attempt,
                truncate_chars(&result.to_string(), TOOL_RESULT_CHARS)
            ),
            (None, Some(error)) => {
                format!("[{} attempt {}] failed: {}", call.tool_name, call.attempt, error)
            }
            (None, None) => format!("[{}] no result", call.tool_name),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn answer_prompt(question: &str, context: &AnswerContext<'_>) -> String {
    let mut budget = Budget::new();

    budget.section("TOOL RESULTS", &render_tool_calls(context.tool_calls));

    let files = context
        .files
        .iter()
        .map(|f| format!("--- {} ---\n{}", f.url, f.text))
        .collect::<Vec<_>>()
        .join("\n");
    budget.section("ATTACHED FILES", &files);

    let passages = context
        .passages
        .iter()
        .map(|c| format!("[{}] {}", c.id, c.text))
        .collect::<Vec<_>>()
        .join("\n");
    budget.section("RETRIEVED PASSAGES", &passages);

    let history = context
        .history
        .iter()
        .map(|t| match t.role {
            Role::User => format!("User: {}", t.content),
            Role::Assistant => format!("Sage: {}", t.content),
        })
        .collect::<Vec<_>>()
        .join("\n");
    budget.section("CONVERSATION SO FAR", &history);

    budget.finish(question)
}

pub fn plan_prompt(question: &str, context: &AnswerContext<'_>) -> String {
    answer_prompt(question, context)
}

fn render_plan(plan: &Plan) -> String {
    let mut text = format!("Objective: {}", plan.objective);
    for (i, subtask) in plan.subtasks.iter().enumerate() {
        text.push_str(&format!("\n{}. {}", i + 1, subtask));
    }
    if !plan.constraints.is_empty() {
        text.push_str(&format!("\nConstraints: {}", plan.constraints.join("; ")));
    }
    text
}

fn render_steps(steps: &[ReasoningStep]) -> String {
    steps
        .iter()
        .filter(|s| s.has_output())
        .map(|s| {
            format!(
                "Round {} (confidence {:.2}): {}",
                s.round, s.confidence, s.hypothesis
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_notes(notes: &[ReflectionNote]) -> String {
    notes
        .iter()
        .map(|n| format!("Round {} [{}]: {}", n.round, n.followup_action, n.observation))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Everything the deep stages show the model about the run so far.
pub struct DeepState<'a> {
    pub plan: Option<&'a Plan>,
    pub steps: &'a [ReasoningStep],
    pub notes: &'a [ReflectionNote],
    pub tool_calls: &'a [ToolCallRecord],
}

pub fn reason_prompt(
    question: &str,
    round: u32,
    state: &DeepState<'_>,
    tools: &[ToolDescriptor],
) -> String {
    let mut budget = Budget::new();
    if let Some(plan) = state.plan {
        budget.section("PLAN", &render_plan(plan));
    }
    let tool_list = tools
        .iter()
        .map(|t| format!("{}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");
    budget.section("AVAILABLE TOOLS", &tool_list);
    budget.section("TOOL EVIDENCE", &render_tool_calls(state.tool_calls));
    budget.section("PREVIOUS ROUNDS", &render_steps(state.steps));
    budget.section("REFLECTIONS", &render_notes(state.notes));
    budget.section("ROUND", &format!("This is round {}.", round));
    budget.finish(question)
}

pub fn reflect_prompt(question: &str, state: &DeepState<'_>) -> String {
    let mut budget = Budget::new();
    if let Some(plan) = state.plan {
        budget.section("PLAN", &render_plan(plan));
    }
    budget.section("REASONING", &render_steps(state.steps));
    budget.section("TOOL EVIDENCE", &render_tool_calls(state.tool_calls));
    budget.section("EARLIER REFLECTIONS", &render_notes(state.notes));
    budget.finish(question)
}

pub fn synthesize_prompt(question: &str, state: &DeepState<'_>) -> String {
    let mut budget = Budget::new();
    if let Some(plan) = state.plan {
        budget.section("PLAN", &render_plan(plan));
    }
    budget.section("REASONING", &render_steps(state.steps));
    budget.section("TOOL EVIDENCE", &render_tool_calls(state.tool_calls));
    budget.finish(question)
}
