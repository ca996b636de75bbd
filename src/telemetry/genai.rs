//! GenAI semantic convention spans for LLM-backed collaborators.
//!
//! - `gen_ai.operation.name`
//! - `gen_ai.request.model`
//! - `gen_ai.provider.name`
//! - `docq.step` (which job step issued the call)
//! - `error.type` (set on failure)

use tracing::Span;

/// Start a span for a chat completion issued on behalf of `step`.
pub fn start_chat_span(model: &str, provider: &str, step: &str) -> Span {
    tracing::info_span!(
        "gen_ai.chat",
        "gen_ai.operation.name" = "chat",
        "gen_ai.request.model" = model,
        "gen_ai.provider.name" = provider,
        "docq.step" = step,
        "gen_ai.response.chars" = tracing::field::Empty,
        "error.type" = tracing::field::Empty,
    )
}

pub fn record_response(span: &Span, text: &str) {
    span.record("gen_ai.response.chars", text.chars().count() as u64);
}

pub fn record_error(span: &Span, error: &str) {
    span.record("error.type", error);
}
