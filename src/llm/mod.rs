//! LLM-backed generators via rig-core.
//!
//! [`AnthropicNarrator`] writes the technical narrative and
//! [`AnthropicComplianceAnalyst`] produces the compliance report. Both build
//! a fresh agent per call; the client is cheap to share.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use secrecy::{ExposeSecret, SecretString};
use tracing::Instrument;

use crate::error::GenerationError;
use crate::model::{CompanyContext, ExpenseContext, GenerationOptions, ProjectContext};
use crate::service::{ComplianceGenerator, ComplianceReport, NarrativeGenerator};
use crate::telemetry::genai;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const PROVIDER: &str = "anthropic";
const MAX_TOKENS: u64 = 4096;

const NARRATIVE_PREAMBLE: &str = "You write technical narratives documenting qualified \
research activities for R&D tax credit filings. Describe the technical uncertainty, the \
process of experimentation, and the technological nature of the work. Be factual and \
specific; never invent figures that were not provided.";

const COMPLIANCE_PREAMBLE: &str = "You review R&D tax credit claims for compliance risk. \
Respond with a single JSON object and nothing else, with keys: \"score\" (number 0-100), \
\"risk_level\" (\"low\" | \"medium\" | \"high\"), \"findings\" (array of objects with \
\"area\", \"risk\", \"detail\"), \"recommendations\" (array of strings), \"memo\" (string).";

/// Create an Anthropic client from a secret API key.
///
/// # Errors
/// Returns an error if the underlying HTTP client cannot be constructed.
pub fn anthropic_client(
    api_key: &SecretString,
) -> Result<rig::providers::anthropic::Client, rig::http_client::Error> {
    rig::providers::anthropic::Client::new(api_key.expose_secret())
}

/// Narrative generator backed by an Anthropic model.
pub struct AnthropicNarrator {
    client: rig::providers::anthropic::Client,
    model: String,
}

impl AnthropicNarrator {
    pub fn new(client: rig::providers::anthropic::Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl NarrativeGenerator for AnthropicNarrator {
    async fn generate(
        &self,
        template_id: &str,
        company: &CompanyContext,
        project: &ProjectContext,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let prompt = narrative_prompt(template_id, company, project, options);
        let span = genai::start_chat_span(&self.model, PROVIDER, "narrative");
        let agent = self
            .client
            .agent(self.model.as_str())
            .preamble(NARRATIVE_PREAMBLE)
            .max_tokens(MAX_TOKENS)
            .build();

        match async { agent.prompt(prompt).await }
            .instrument(span.clone())
            .await
        {
            Ok(text) => {
                genai::record_response(&span, &text);
                Ok(text)
            }
            Err(e) => {
                genai::record_error(&span, &e.to_string());
                Err(GenerationError::new(e.to_string()))
            }
        }
    }
}

/// Compliance generator backed by an Anthropic model that answers in JSON.
pub struct AnthropicComplianceAnalyst {
    client: rig::providers::anthropic::Client,
    model: String,
}

impl AnthropicComplianceAnalyst {
    pub fn new(client: rig::providers::anthropic::Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ComplianceGenerator for AnthropicComplianceAnalyst {
    async fn generate(
        &self,
        company: &CompanyContext,
        project: &ProjectContext,
        expenses: &ExpenseContext,
        options: &GenerationOptions,
    ) -> Result<ComplianceReport, GenerationError> {
        let prompt = compliance_prompt(company, project, expenses, options);
        let span = genai::start_chat_span(&self.model, PROVIDER, "compliance_memo");
        let agent = self
            .client
            .agent(self.model.as_str())
            .preamble(COMPLIANCE_PREAMBLE)
            .max_tokens(MAX_TOKENS)
            .build();

        let text = async { agent.prompt(prompt).await }
            .instrument(span.clone())
            .await
            .map_err(|e| {
                genai::record_error(&span, &e.to_string());
                GenerationError::new(e.to_string())
            })?;
        genai::record_response(&span, &text);
        parse_report(&text)
    }
}

fn narrative_prompt(
    template_id: &str,
    company: &CompanyContext,
    project: &ProjectContext,
    options: &GenerationOptions,
) -> String {
    let mut prompt = format!(
        "Template: {template_id}\n\
         Company: {} ({}, {} employees)\n\
         Project: {}\n\
         Description: {}\n\
         Technical uncertainty: {}\n",
        company.name,
        company.industry,
        company.employee_count,
        project.name,
        project.description,
        project.technical_uncertainty,
    );
    if let Some(process) = &project.experimentation_process {
        prompt.push_str(&format!("Experimentation process: {process}\n"));
    }
    if let (Some(start), Some(end)) = (project.start_date, project.end_date) {
        prompt.push_str(&format!("Period: {start} to {end}\n"));
    }
    push_options(&mut prompt, options);
    prompt
}

fn compliance_prompt(
    company: &CompanyContext,
    project: &ProjectContext,
    expenses: &ExpenseContext,
    options: &GenerationOptions,
) -> String {
    let mut prompt = format!(
        "Company: {} ({}), state: {}\n\
         Project: {}\n\
         Description: {}\n\
         Technical uncertainty: {}\n\
         Wages: {:.2}\nContractor costs: {:.2}\nSupplies: {:.2}\nCloud computing: {:.2}\n\
         Total qualified expenses: {:.2}\n",
        company.name,
        company.industry,
        company.state.as_deref().unwrap_or("unknown"),
        project.name,
        project.description,
        project.technical_uncertainty,
        expenses.wages,
        expenses.contractor_costs,
        expenses.supplies,
        expenses.cloud_computing,
        expenses.total(),
    );
    push_options(&mut prompt, options);
    prompt
}

fn push_options(prompt: &mut String, options: &GenerationOptions) {
    if let Some(tone) = &options.tone {
        prompt.push_str(&format!("Tone: {tone}\n"));
    }
    if let Some(words) = options.max_words {
        prompt.push_str(&format!("Keep it under {words} words.\n"));
    }
}

/// Parse a model answer into a report, tolerating a fenced code block.
fn parse_report(text: &str) -> Result<ComplianceReport, GenerationError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body)
        .map_err(|e| GenerationError::new(format!("malformed compliance report: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::RiskLevel;

    #[test]
    fn parses_fenced_report() {
        let text = "```json\n{\"score\": 82, \"risk_level\": \"low\", \"memo\": \"ok\"}\n```";
        let report = parse_report(text).unwrap();
        assert_eq!(report.score, Some(82.0));
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn malformed_report_is_not_retryable() {
        let err = parse_report("I cannot help with that").unwrap_err();
        assert!(err.0.starts_with("malformed compliance report"));
        assert!(!crate::engine::is_retryable(&err.0));
    }

    #[test]
    fn narrative_prompt_includes_options() {
        let req = crate::model::request::tests::valid_request();
        let options = GenerationOptions {
            tone: Some("formal".into()),
            max_words: Some(500),
        };
        let prompt = narrative_prompt("tpl", &req.company, &req.project, &options);
        assert!(prompt.contains("Template: tpl"));
        assert!(prompt.contains("Tone: formal"));
        assert!(prompt.contains("under 500 words"));
    }
}
