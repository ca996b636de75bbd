//! Submission payload: the structured input a caller hands to the orchestrator.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{Priority, StepKind};
use crate::error::ValidationError;

pub const MIN_DESCRIPTION_LEN: usize = 50;
pub const MIN_UNCERTAINTY_LEN: usize = 20;

/// A request to build a document deliverable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    /// Who is asking. Owns the resulting job.
    pub requester: String,
    pub company: CompanyContext,
    pub project: ProjectContext,
    pub expenses: ExpenseContext,
    pub deliverables: Deliverables,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub templates: Templates,
    #[serde(default)]
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyContext {
    pub name: String,
    pub industry: String,
    #[serde(default)]
    pub employee_count: u32,
    #[serde(default)]
    pub annual_revenue: f64,
    #[serde(default)]
    pub founded_year: Option<u16>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub name: String,
    pub description: String,
    pub technical_uncertainty: String,
    #[serde(default)]
    pub experimentation_process: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

/// Qualified research expenses, in dollars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpenseContext {
    #[serde(default)]
    pub wages: f64,
    #[serde(default)]
    pub contractor_costs: f64,
    #[serde(default)]
    pub supplies: f64,
    #[serde(default)]
    pub cloud_computing: f64,
}

impl ExpenseContext {
    pub fn total(&self) -> f64 {
        self.wages + self.contractor_costs + self.supplies + self.cloud_computing
    }

    fn fields(&self) -> [(&'static str, f64); 4] {
        [
            ("expenses.wages", self.wages),
            ("expenses.contractor_costs", self.contractor_costs),
            ("expenses.supplies", self.supplies),
            ("expenses.cloud_computing", self.cloud_computing),
        ]
    }
}

/// Which of the three outputs the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverables {
    #[serde(default)]
    pub narrative: bool,
    #[serde(default)]
    pub compliance_memo: bool,
    #[serde(default)]
    pub file_render: bool,
}

impl Default for Deliverables {
    fn default() -> Self {
        Self {
            narrative: true,
            compliance_memo: true,
            file_render: true,
        }
    }
}

impl Deliverables {
    pub fn requested(&self, step: StepKind) -> bool {
        match step {
            StepKind::Narrative => self.narrative,
            StepKind::ComplianceMemo => self.compliance_memo,
            StepKind::FileRender => self.file_render,
        }
    }

    /// Requested steps in execution order.
    pub fn steps(&self) -> Vec<StepKind> {
        StepKind::ORDER
            .into_iter()
            .filter(|s| self.requested(*s))
            .collect()
    }

    pub fn count(&self) -> u32 {
        self.steps().len() as u32
    }
}

/// Template identifiers handed to the collaborators. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Templates {
    #[serde(default = "default_narrative_template")]
    pub narrative: String,
    #[serde(default = "default_render_template")]
    pub render: String,
}

fn default_narrative_template() -> String {
    "technical-narrative".to_string()
}

fn default_render_template() -> String {
    "form-6765".to_string()
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            narrative: default_narrative_template(),
            render: default_render_template(),
        }
    }
}

/// Free-form knobs forwarded to the generators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub max_words: Option<u32>,
}

impl DocumentRequest {
    /// Check structural constraints. Collects every issue before failing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut err = ValidationError::default();

        if self.requester.trim().is_empty() {
            err.push("requester", "must not be empty");
        }
        if self.company.name.trim().is_empty() {
            err.push("company.name", "must not be empty");
        }
        if self.company.industry.trim().is_empty() {
            err.push("company.industry", "must not be empty");
        }
        if !is_amount(self.company.annual_revenue) {
            err.push("company.annual_revenue", "must be a non-negative amount");
        }
        if self.project.name.trim().is_empty() {
            err.push("project.name", "must not be empty");
        }
        let description = self.project.description.trim().chars().count();
        if description < MIN_DESCRIPTION_LEN {
            err.push(
                "project.description",
                format!("must be at least {MIN_DESCRIPTION_LEN} characters (got {description})"),
            );
        }
        let uncertainty = self.project.technical_uncertainty.trim().chars().count();
        if uncertainty < MIN_UNCERTAINTY_LEN {
            err.push(
                "project.technical_uncertainty",
                format!("must be at least {MIN_UNCERTAINTY_LEN} characters (got {uncertainty})"),
            );
        }
        if let (Some(start), Some(end)) = (self.project.start_date, self.project.end_date)
            && end < start
        {
            err.push("project.end_date", "must not precede start_date");
        }
        for (field, amount) in self.expenses.fields() {
            if !is_amount(amount) {
                err.push(field, "must be a non-negative amount");
            }
        }
        if self.deliverables.count() == 0 {
            err.push("deliverables", "at least one output must be requested");
        }

        if err.is_empty() { Ok(()) } else { Err(err) }
    }
}

fn is_amount(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn valid_request() -> DocumentRequest {
        DocumentRequest {
            requester: "user-1".to_string(),
            company: CompanyContext {
                name: "Acme Robotics".to_string(),
                industry: "Manufacturing".to_string(),
                employee_count: 40,
                annual_revenue: 5_000_000.0,
                founded_year: Some(2015),
                state: Some("CA".to_string()),
            },
            project: ProjectContext {
                name: "Adaptive Gripper".to_string(),
                description: "Designing a compliant robotic gripper that adapts grip force to \
                              fragile produce in real time."
                    .to_string(),
                technical_uncertainty: "Unknown whether sensor latency permits closed-loop control."
                    .to_string(),
                experimentation_process: None,
                start_date: None,
                end_date: None,
            },
            expenses: ExpenseContext {
                wages: 200_000.0,
                contractor_costs: 50_000.0,
                supplies: 30_000.0,
                cloud_computing: 20_000.0,
            },
            deliverables: Deliverables::default(),
            priority: Priority::Normal,
            templates: Templates::default(),
            options: GenerationOptions::default(),
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(valid_request().validate().is_ok());
    }

    #[test]
    fn short_description_and_negative_wages_are_both_reported() {
        let mut req = valid_request();
        req.project.description = "too short".to_string();
        req.expenses.wages = -1.0;

        let err = req.validate().unwrap_err();
        assert!(err.mentions("project.description"));
        assert!(err.mentions("expenses.wages"));
        assert_eq!(err.issues.len(), 2);
    }

    #[test]
    fn nan_amount_is_rejected() {
        let mut req = valid_request();
        req.expenses.supplies = f64::NAN;
        assert!(req.validate().unwrap_err().mentions("expenses.supplies"));
    }

    #[test]
    fn empty_deliverables_are_rejected() {
        let mut req = valid_request();
        req.deliverables = Deliverables {
            narrative: false,
            compliance_memo: false,
            file_render: false,
        };
        assert!(req.validate().unwrap_err().mentions("deliverables"));
    }

    #[test]
    fn end_before_start_is_rejected() {
        let mut req = valid_request();
        req.project.start_date = NaiveDate::from_ymd_opt(2024, 6, 1);
        req.project.end_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(req.validate().unwrap_err().mentions("project.end_date"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let req: DocumentRequest = serde_json::from_value(serde_json::json!({
            "requester": "u",
            "company": {"name": "Acme", "industry": "Software"},
            "project": {
                "name": "P",
                "description": "d",
                "technical_uncertainty": "t"
            },
            "expenses": {"wages": 10.0},
            "deliverables": {"narrative": true}
        }))
        .unwrap();
        assert_eq!(req.priority, Priority::Normal);
        assert_eq!(req.templates, Templates::default());
        assert_eq!(req.deliverables.steps(), vec![StepKind::Narrative]);
        assert_eq!(req.expenses.total(), 10.0);
    }
}
