// src/engine/queue.rs

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::types::JobId;
use crate::workflow::LaunchSnapshot;

/// A workflow job that was created while another job of the same template
/// was active. It sits in `pending` until it reaches the front of its
/// template's queue.
#[derive(Debug, Clone)]
pub struct QueuedLaunch {
    pub job_id: JobId,
    pub snapshot: LaunchSnapshot,
}

/// Per-template FIFO of held-back workflow launches.
///
/// Semantics:
/// - Templates with `allow_simultaneous = false` run one workflow job at a
///   time; later launches are recorded here in arrival order.
/// - When the active job finishes, the core pops the next launch for that
///   template and starts it.
/// - Canceling a queued launch removes it without ever starting it.
#[derive(Debug, Default)]
pub struct LaunchQueue {
    by_template: HashMap<String, VecDeque<QueuedLaunch>>,
}

impl LaunchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing is queued for any template.
    pub fn is_empty(&self) -> bool {
        self.by_template.values().all(VecDeque::is_empty)
    }

    pub fn len(&self) -> usize {
        self.by_template.values().map(VecDeque::len).sum()
    }

    pub fn has_queued(&self, template: &str) -> bool {
        self.by_template
            .get(template)
            .is_some_and(|q| !q.is_empty())
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.by_template
            .values()
            .any(|q| q.iter().any(|l| l.job_id == job_id))
    }

    pub fn push(&mut self, launch: QueuedLaunch) {
        let queue = self
            .by_template
            .entry(launch.snapshot.name.clone())
            .or_default();
        debug!(
            workflow = %launch.snapshot.name,
            job_id = %launch.job_id,
            position = queue.len(),
            "queued workflow launch behind active job"
        );
        queue.push_back(launch);
    }

    /// Next launch for `template`, if any.
    pub fn pop(&mut self, template: &str) -> Option<QueuedLaunch> {
        let queue = self.by_template.get_mut(template)?;
        let next = queue.pop_front();
        if queue.is_empty() {
            self.by_template.remove(template);
        }
        next
    }

    /// Drop a queued launch. Returns whether it was queued.
    pub fn remove(&mut self, job_id: JobId) -> bool {
        let mut removed = false;
        for queue in self.by_template.values_mut() {
            let before = queue.len();
            queue.retain(|l| l.job_id != job_id);
            removed |= queue.len() != before;
        }
        self.by_template.retain(|_, q| !q.is_empty());
        removed
    }
}
