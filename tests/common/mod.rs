//! Scripted in-memory collaborators for orchestrator tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use docq::engine::{Orchestrator, OrchestratorConfig, Submission};
use docq::error::GenerationError;
use docq::model::{
    CompanyContext, Deliverables, DocumentRequest, ExpenseContext, GenerationOptions, Job,
    Priority, ProjectContext, Templates,
};
use docq::service::{
    ComplianceGenerator, ComplianceReport, FileRenderer, NarrativeGenerator, RenderData,
    RenderOptions, RenderStatus, RenderedFile, RiskLevel, Services,
};

/// How a scripted collaborator answers one call.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Ok,
    Fail(&'static str),
    /// Answers, but the renderer reports the file as failed.
    Rejected,
    /// Never answers.
    Hang,
}

/// A queue of replies plus call accounting. Once the queue is empty every
/// call succeeds.
#[derive(Default)]
pub struct Script {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Script {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn replies(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        })
    }

    /// Every call blocks until the test hands out a permit via [`Script::release`].
    pub fn gated() -> Arc<Self> {
        Self::gated_replies([])
    }

    /// Gated, answering from `replies` once let through.
    pub fn gated_replies(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        })
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Project names seen, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Returns `false` for [`Reply::Rejected`].
    async fn answer(&self, project: &str) -> Result<bool, GenerationError> {
        self.calls.lock().unwrap().push(project.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Ok);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        match reply {
            Reply::Ok => Ok(true),
            Reply::Rejected => Ok(false),
            Reply::Fail(message) => Err(GenerationError::new(message)),
            Reply::Hang => std::future::pending().await,
        }
    }
}

pub struct FakeNarrative(pub Arc<Script>);

#[async_trait]
impl NarrativeGenerator for FakeNarrative {
    async fn generate(
        &self,
        _template_id: &str,
        _company: &CompanyContext,
        project: &ProjectContext,
        _options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        self.0.answer(&project.name).await?;
        Ok(format!("Narrative for {}", project.name))
    }
}

pub struct FakeCompliance(pub Arc<Script>);

pub const COMPLIANCE_SCORE: f64 = 87.5;

#[async_trait]
impl ComplianceGenerator for FakeCompliance {
    async fn generate(
        &self,
        _company: &CompanyContext,
        project: &ProjectContext,
        _expenses: &ExpenseContext,
        _options: &GenerationOptions,
    ) -> Result<ComplianceReport, GenerationError> {
        self.0.answer(&project.name).await?;
        Ok(ComplianceReport {
            score: Some(COMPLIANCE_SCORE),
            risk_level: RiskLevel::Low,
            findings: Vec::new(),
            recommendations: vec!["Keep contemporaneous time records".to_string()],
            memo: format!("Compliance memo for {}", project.name),
        })
    }
}

pub struct FakeRenderer {
    pub script: Arc<Script>,
    pub last: Arc<Mutex<Option<RenderData>>>,
}

#[async_trait]
impl FileRenderer for FakeRenderer {
    async fn render(
        &self,
        _template_id: &str,
        data: &RenderData,
        _options: &RenderOptions,
    ) -> Result<RenderedFile, GenerationError> {
        let accepted = self.script.answer(&data.project.name).await?;
        *self.last.lock().unwrap() = Some(data.clone());
        Ok(RenderedFile {
            id: format!("file-{}", data.project.name),
            status: if accepted {
                RenderStatus::Completed
            } else {
                RenderStatus::Failed
            },
            download_url: Some(format!("https://files.test/{}.pdf", data.project.name)),
        })
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub narrative: Arc<Script>,
    pub compliance: Arc<Script>,
    pub render: Arc<Script>,
    pub last_render: Arc<Mutex<Option<RenderData>>>,
}

impl Harness {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with(Script::ok(), Script::ok(), Script::ok(), config)
    }

    pub fn with(
        narrative: Arc<Script>,
        compliance: Arc<Script>,
        render: Arc<Script>,
        config: OrchestratorConfig,
    ) -> Self {
        let last_render = Arc::new(Mutex::new(None));
        let services = Services::new(
            Arc::new(FakeNarrative(Arc::clone(&narrative))),
            Arc::new(FakeCompliance(Arc::clone(&compliance))),
            Arc::new(FakeRenderer {
                script: Arc::clone(&render),
                last: Arc::clone(&last_render),
            }),
        );
        Self {
            orchestrator: Orchestrator::new(services, config),
            narrative,
            compliance,
            render,
            last_render,
        }
    }

    pub fn submit(&self, request: DocumentRequest) -> Submission {
        self.orchestrator.submit(request).expect("valid request")
    }
}

pub const ALL: Deliverables = Deliverables {
    narrative: true,
    compliance_memo: true,
    file_render: true,
};

pub const NARRATIVE_ONLY: Deliverables = Deliverables {
    narrative: true,
    compliance_memo: false,
    file_render: false,
};

pub fn request(requester: &str, project: &str, deliverables: Deliverables) -> DocumentRequest {
    DocumentRequest {
        requester: requester.to_string(),
        company: CompanyContext {
            name: "Acme Robotics".to_string(),
            industry: "Manufacturing".to_string(),
            employee_count: 40,
            annual_revenue: 5_000_000.0,
            founded_year: Some(2015),
            state: Some("CA".to_string()),
        },
        project: ProjectContext {
            name: project.to_string(),
            description: "Designing a compliant robotic gripper that adapts grip force to \
                          fragile produce in real time."
                .to_string(),
            technical_uncertainty: "Unknown whether sensor latency permits closed-loop control."
                .to_string(),
            experimentation_process: Some("Iterative prototyping with force sensors".to_string()),
            start_date: None,
            end_date: None,
        },
        expenses: ExpenseContext {
            wages: 200_000.0,
            contractor_costs: 50_000.0,
            supplies: 30_000.0,
            cloud_computing: 20_000.0,
        },
        deliverables,
        priority: Priority::Normal,
        templates: Templates::default(),
        options: GenerationOptions::default(),
    }
}

/// Wait until the submitted job reaches a terminal status.
pub async fn finished(submission: &mut Submission) -> Job {
    submission
        .updates
        .wait_for(|job| job.status.is_terminal())
        .await
        .expect("job watch closed")
        .clone()
}

/// Let spawned tasks run without advancing virtual time meaningfully.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
}
