// src/notify.rs

//! Job completion notifications.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::info;

use crate::job::{JobStatus, UnifiedJob};
use crate::types::JobId;

/// Emitted when a job reaches `successful`, `failed` or `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEvent {
    pub job_id: JobId,
    pub name: String,
    /// Job type name (`job`, `workflow_job`, ...).
    pub kind: &'static str,
    pub status: JobStatus,
}

impl NotificationEvent {
    /// Event for a job that just finished, if its status notifies.
    pub fn for_job(job: &UnifiedJob) -> Option<Self> {
        matches!(
            job.status,
            JobStatus::Successful | JobStatus::Failed | JobStatus::Error
        )
        .then(|| Self {
            job_id: job.id,
            name: job.name.clone(),
            kind: job.kind.type_name(),
            status: job.status,
        })
    }
}

/// Fire-and-forget delivery of notification events.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &NotificationEvent);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, event: &NotificationEvent) {
        info!(
            job_id = %event.job_id,
            name = %event.name,
            kind = event.kind,
            status = %event.status,
            "job notification"
        );
    }
}

/// Keeps every event it receives; useful for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, event: &NotificationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
