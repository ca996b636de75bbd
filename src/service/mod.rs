//! Contracts for the external generation collaborators.
//!
//! The orchestrator never knows how text is written, risk is scored, or files
//! are produced. It only awaits these calls and interprets failures by message.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::model::{CompanyContext, ExpenseContext, GenerationOptions, ProjectContext};

/// Writes the technical narrative.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(
        &self,
        template_id: &str,
        company: &CompanyContext,
        project: &ProjectContext,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError>;
}

/// Produces the compliance/risk report.
#[async_trait]
pub trait ComplianceGenerator: Send + Sync {
    async fn generate(
        &self,
        company: &CompanyContext,
        project: &ProjectContext,
        expenses: &ExpenseContext,
        options: &GenerationOptions,
    ) -> Result<ComplianceReport, GenerationError>;
}

/// Turns structured form data into a downloadable artifact.
#[async_trait]
pub trait FileRenderer: Send + Sync {
    async fn render(
        &self,
        template_id: &str,
        data: &RenderData,
        options: &RenderOptions,
    ) -> Result<RenderedFile, GenerationError>;
}

/// The three collaborators a job needs.
#[derive(Clone)]
pub struct Services {
    pub narrative: Arc<dyn NarrativeGenerator>,
    pub compliance: Arc<dyn ComplianceGenerator>,
    pub renderer: Arc<dyn FileRenderer>,
}

impl Services {
    pub fn new(
        narrative: Arc<dyn NarrativeGenerator>,
        compliance: Arc<dyn ComplianceGenerator>,
        renderer: Arc<dyn FileRenderer>,
    ) -> Self {
        Self {
            narrative,
            compliance,
            renderer,
        }
    }
}

// ---------------------------------------------------------------------------
// Compliance report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub area: String,
    pub risk: RiskLevel,
    pub detail: String,
}

/// Structured risk/compliance analysis of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    /// Overall score, 0-100. Copied into the job summary when present.
    #[serde(default)]
    pub score: Option<f64>,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// The memo body.
    #[serde(default)]
    pub memo: String,
}

// ---------------------------------------------------------------------------
// File rendering
// ---------------------------------------------------------------------------

/// Everything the renderer fills into the form. Later steps' inputs are the
/// earlier steps' outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderData {
    pub company: CompanyContext,
    pub project: ProjectContext,
    pub expenses: ExpenseContext,
    pub total_expenses: f64,
    pub narrative: Option<String>,
    /// JSON-serialized compliance report.
    pub compliance_report: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderFormat {
    #[default]
    Pdf,
    Docx,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub format: RenderFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Handle to a rendered artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedFile {
    pub id: String,
    pub status: RenderStatus,
    pub download_url: Option<String>,
}
