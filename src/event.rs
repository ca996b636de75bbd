//! Structured notifications emitted by the orchestrator on every job transition.
//!
//! Consumers subscribe to the broadcast stream to persist jobs, notify users,
//! or build dashboards. A slow or absent subscriber never stalls the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{JobId, Priority, StepKind};

/// A structured event emitted by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match &self.kind {
            EventKind::Queued { id, .. }
            | EventKind::Started { id, .. }
            | EventKind::Progress { id, .. }
            | EventKind::Completed { id, .. }
            | EventKind::Failed { id, .. }
            | EventKind::TimedOut { id, .. }
            | EventKind::Cancelled { id }
            | EventKind::Retried { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Queued {
        id: JobId,
        priority: Priority,
        estimated_duration_ms: u64,
    },
    Started {
        id: JobId,
        attempt: u32,
    },
    Progress {
        id: JobId,
        step: StepKind,
        percentage: u8,
        message: String,
    },
    Completed {
        id: JobId,
        duration_ms: u64,
        document_count: u32,
    },
    Failed {
        id: JobId,
        error: String,
        retry_count: u32,
    },
    TimedOut {
        id: JobId,
        timeout_ms: u64,
    },
    Cancelled {
        id: JobId,
    },
    Retried {
        id: JobId,
        retry_count: u32,
        delay_ms: u64,
    },
}

/// Sender half of the notification stream. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
    seq: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, kind: EventKind) {
        let event = JobEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Utc::now(),
            kind,
        };
        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}
