//! Background job execution with pollable status.
//!
//! `JobOrchestrator::enqueue` validates, records the job as `Queued` and
//! returns its id straight away. A bounded pool of permits decides how many
//! jobs run at once. Whatever happens inside a job (error, cancellation,
//! panic) ends up as that job's terminal state and never escapes.

use crate::error::{PipelineError, Result};
use crate::models::MoveRequest;
use crate::progress::{ProgressChannel, ProgressPayload, Topic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub type JobId = Uuid;

const WAIT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    Refresh,
    Move,
    ForceCategorize,
    Train,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobKind::Refresh => "refresh",
            JobKind::Move => "move",
            JobKind::ForceCategorize => "forceCategorize",
            JobKind::Train => "train",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// Position in the Queued → Running → terminal order.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Running => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum JobRequest {
    Refresh,
    Move(MoveRequest),
    ForceCategorize,
    Train,
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Refresh => JobKind::Refresh,
            JobRequest::Move(_) => JobKind::Move,
            JobRequest::ForceCategorize => JobKind::ForceCategorize,
            JobRequest::Train => JobKind::Train,
        }
    }

    /// Rejects malformed input before any job exists.
    pub fn validate(&self) -> Result<()> {
        let JobRequest::Move(req) = self else {
            return Ok(());
        };
        for (idx, item) in req.items.iter().enumerate() {
            if item.file_id.trim().is_empty() {
                return Err(PipelineError::Validation(format!(
                    "item {}: file id is empty",
                    idx
                )));
            }
            let category = item.target_category.trim();
            if category.is_empty() {
                return Err(PipelineError::Validation(format!(
                    "item {}: target category is empty",
                    idx
                )));
            }
            if category == "." || category == ".." || category.contains(['/', '\\']) {
                return Err(PipelineError::Validation(format!(
                    "item {}: target category {:?} is not a plain folder name",
                    idx, item.target_category
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processed_items: usize,
    pub total_items: usize,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub error: Option<String>,
}

impl JobStatus {
    fn queued(id: JobId, kind: JobKind) -> Self {
        Self {
            id,
            kind,
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processed_items: 0,
            total_items: 0,
            metadata: serde_json::Map::new(),
            error: None,
        }
    }
}

struct JobEntry {
    status: JobStatus,
    cancel: CancellationToken,
}

/// Job id → status map. Locks are held only for the copy-in/copy-out.
#[derive(Default)]
struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
}

impl JobRegistry {
    fn insert(&self, status: JobStatus, cancel: CancellationToken) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(status.id, JobEntry { status, cancel });
    }

    fn snapshot(&self, id: &JobId) -> Option<JobStatus> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id).map(|e| e.status.clone())
    }

    fn all(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.values().map(|e| e.status.clone()).collect()
    }

    fn cancel_token(&self, id: &JobId) -> Option<CancellationToken> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id).map(|e| e.cancel.clone())
    }

    /// Applies `f` unless the job is already terminal.
    fn update(&self, id: &JobId, f: impl FnOnce(&mut JobStatus)) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = jobs.get_mut(id) {
            if !entry.status.state.is_terminal() {
                f(&mut entry.status);
            }
        }
    }

    /// Moves the job forward. Returns false when the move would go backwards
    /// or leave a terminal state.
    fn transition(&self, id: &JobId, next: JobState, error: Option<String>) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = jobs.get_mut(id) else {
            return false;
        };
        let status = &mut entry.status;
        if status.state.is_terminal() || next.rank() <= status.state.rank() {
            return false;
        }
        status.state = next;
        let now = Utc::now();
        if next == JobState::Running {
            status.started_at = Some(now);
        }
        if next.is_terminal() {
            status.completed_at = Some(now);
            status.error = error;
        }
        true
    }

    fn prune(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, e| {
            !(e.status.state.is_terminal() && e.status.completed_at.map_or(false, |t| t < cutoff))
        });
        before - jobs.len()
    }
}

/// Handle a running operation uses to report progress and observe
/// cancellation.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    kind: JobKind,
    cancel: CancellationToken,
    progress: ProgressChannel,
    processed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
    registry: Option<Arc<JobRegistry>>,
}

impl JobContext {
    /// A context not tracked by any orchestrator, for running an operation
    /// inline.
    pub fn detached(kind: JobKind, progress: ProgressChannel) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            kind,
            cancel: CancellationToken::new(),
            progress,
            processed: Arc::default(),
            total: Arc::default(),
            registry: None,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Batch-boundary cancellation check.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        if let Some(registry) = &self.registry {
            registry.update(&self.job_id, |s| s.total_items = total);
        }
    }

    /// Counts `n` more processed items and publishes the new percentage.
    pub fn advance(&self, n: usize) {
        let processed = self.processed.fetch_add(n, Ordering::Relaxed) + n;
        let total = self.total.load(Ordering::Relaxed);
        if let Some(registry) = &self.registry {
            registry.update(&self.job_id, |s| s.processed_items = processed);
        }
        self.publish(ProgressPayload::batch(processed, total));
    }

    pub fn set_metadata(&self, key: &str, value: serde_json::Value) {
        if let Some(registry) = &self.registry {
            registry.update(&self.job_id, |s| {
                s.metadata.insert(key.to_string(), value);
            });
        }
    }

    pub fn publish(&self, payload: ProgressPayload) {
        self.progress
            .publish(Topic::for_kind(self.kind), Some(self.job_id), payload);
    }
}

/// Executes one job request. Implemented by the catalog pipeline; tests
/// substitute their own.
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, request: JobRequest, ctx: JobContext) -> Result<serde_json::Value>;
}

#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<JobRegistry>,
    runner: Arc<dyn JobRunner>,
    permits: Arc<Semaphore>,
    progress: ProgressChannel,
}

impl JobOrchestrator {
    pub fn new(runner: Arc<dyn JobRunner>, progress: ProgressChannel, workers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Arc::default(),
                runner,
                permits: Arc::new(Semaphore::new(workers.max(1))),
                progress,
            }),
        }
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.inner.progress
    }

    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, request: JobRequest) -> Result<JobId> {
        request.validate()?;
        let id = Uuid::new_v4();
        let kind = request.kind();
        let cancel = CancellationToken::new();
        self.inner
            .registry
            .insert(JobStatus::queued(id, kind), cancel.clone());
        self.inner.publish_state(id, kind, JobState::Queued, None);
        info!(job_id = %id, %kind, "job queued");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.execute(id, request, cancel));
        Ok(id)
    }

    pub fn status(&self, id: &JobId) -> Result<JobStatus> {
        self.inner
            .registry
            .snapshot(id)
            .ok_or_else(|| PipelineError::NotFound(format!("job {}", id)))
    }

    /// Every known job, newest first.
    pub fn list(&self) -> Vec<JobStatus> {
        let mut all = self.inner.registry.all();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Signals cancellation. The job stops at its next batch boundary, or
    /// immediately if it is still queued. Terminal jobs are unaffected.
    pub fn cancel(&self, id: &JobId) -> Result<()> {
        let token = self
            .inner
            .registry
            .cancel_token(id)
            .ok_or_else(|| PipelineError::NotFound(format!("job {}", id)))?;
        token.cancel();
        info!(job_id = %id, "cancellation requested");
        Ok(())
    }

    /// Polls until the job reaches a terminal state.
    pub async fn wait(&self, id: &JobId) -> Result<JobStatus> {
        loop {
            let status = self.status(id)?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    /// Forgets terminal jobs that completed more than `older_than` ago.
    pub fn prune_finished(&self, older_than: chrono::Duration) -> usize {
        self.inner.registry.prune(Utc::now() - older_than)
    }
}

impl Inner {
    async fn execute(self: Arc<Self>, id: JobId, request: JobRequest, cancel: CancellationToken) {
        let kind = request.kind();
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.finish(id, kind, JobState::Cancelled, None);
                return;
            }
            permit = Arc::clone(&self.permits).acquire_owned() => permit,
        };
        let _permit = match permit {
            Ok(p) => p,
            Err(e) => {
                self.finish(id, kind, JobState::Failed, Some(e.to_string()));
                return;
            }
        };
        if !self.registry.transition(&id, JobState::Running, None) {
            return;
        }
        self.publish_state(id, kind, JobState::Running, None);
        info!(job_id = %id, %kind, "job started");

        let ctx = JobContext {
            job_id: id,
            kind,
            cancel,
            progress: self.progress.clone(),
            processed: Arc::default(),
            total: Arc::default(),
            registry: Some(Arc::clone(&self.registry)),
        };
        let runner = Arc::clone(&self.runner);
        // nested task so a panic stays inside this job
        let task = tokio::spawn(async move { runner.run(request, ctx).await });

        let (state, error) = match task.await {
            Ok(Ok(result)) => {
                self.registry.update(&id, |s| {
                    s.metadata.insert("result".to_string(), result);
                });
                (JobState::Succeeded, None)
            }
            Ok(Err(PipelineError::Cancelled)) => (JobState::Cancelled, None),
            Ok(Err(e)) => (JobState::Failed, Some(e.to_string())),
            Err(join) if join.is_panic() => (
                JobState::Failed,
                Some(format!("worker panicked: {}", panic_message(join.into_panic()))),
            ),
            Err(join) => (JobState::Failed, Some(join.to_string())),
        };
        self.finish(id, kind, state, error);
    }

    fn finish(&self, id: JobId, kind: JobKind, state: JobState, error: Option<String>) {
        if !self.registry.transition(&id, state, error.clone()) {
            return;
        }
        match &error {
            Some(e) => warn!(job_id = %id, %kind, %state, error = %e, "job finished"),
            None => info!(job_id = %id, %kind, %state, "job finished"),
        }
        self.publish_state(id, kind, state, error);
    }

    fn publish_state(&self, id: JobId, kind: JobKind, state: JobState, error: Option<String>) {
        self.progress.publish(
            Topic::Jobs,
            Some(id),
            ProgressPayload::JobState { kind, state, error },
        );
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
