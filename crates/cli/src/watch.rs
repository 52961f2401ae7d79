use anyhow::{Context, Result};
use catalog_core::jobs::{JobId, JobOrchestrator, JobRequest, JobState};
use notify::event::EventKind;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Finished refresh jobs older than this are dropped from the registry.
const RETENTION_MINUTES: i64 = 10;

/// True for events that can change what a refresh would find: a visible
/// file being created, renamed or written.
pub fn is_relevant(event: &Event) -> bool {
    let kind_matters = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    );
    kind_matters
        && event.paths.iter().any(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with('.'))
                .unwrap_or(false)
        })
}

/// Decides when the watcher enqueues a refresh. At most one refresh is in
/// flight; bursts that land while it runs collapse into one follow-up.
#[derive(Debug, Default)]
pub struct RefreshGate {
    current: Option<JobId>,
    pending: bool,
}

impl RefreshGate {
    /// Job the gate is waiting on, if a burst is parked behind it.
    pub fn waiting_on(&self) -> Option<JobId> {
        if self.pending {
            self.current
        } else {
            None
        }
    }

    pub fn current(&self) -> Option<JobId> {
        self.current
    }

    /// A burst settled. `current_state` is the state of the last refresh
    /// (None when there is none or it was forgotten). Returns true when a
    /// refresh should be enqueued now.
    pub fn on_burst(&mut self, current_state: Option<JobState>) -> bool {
        match current_state {
            Some(state) if !state.is_terminal() => {
                self.pending = true;
                false
            }
            _ => true,
        }
    }

    /// The awaited refresh finished. Returns true when a parked burst needs
    /// its own refresh.
    pub fn on_finished(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    pub fn started(&mut self, id: JobId) {
        self.current = Some(id);
        self.pending = false;
    }
}

async fn wait_for(orchestrator: &JobOrchestrator, id: Option<JobId>) {
    match id {
        Some(id) => {
            if let Err(e) = orchestrator.wait(&id).await {
                debug!(job_id = %id, error = %e, "refresh no longer tracked");
            }
        }
        None => std::future::pending().await,
    }
}

fn enqueue_refresh(orchestrator: &JobOrchestrator, gate: &mut RefreshGate) -> Result<()> {
    let pruned = orchestrator.prune_finished(chrono::Duration::minutes(RETENTION_MINUTES));
    if pruned > 0 {
        debug!(pruned, "forgot finished jobs");
    }
    let id = orchestrator.enqueue(JobRequest::Refresh)?;
    println!("refresh queued: {}", id);
    gate.started(id);
    Ok(())
}

/// Enqueues a refresh whenever files appear in `origin`, batching bursts of
/// events that arrive within `debounce` of each other. Never returns unless
/// the watcher fails.
pub async fn watch_origin(
    orchestrator: &JobOrchestrator,
    origin: &Path,
    recursive: bool,
    debounce: Duration,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher
        .watch(origin, mode)
        .with_context(|| format!("watch {}", origin.display()))?;
    info!(origin = %origin.display(), "watching for new files");

    let mut gate = RefreshGate::default();
    loop {
        let parked = gate.waiting_on();
        tokio::select! {
            res = rx.recv() => {
                let Some(res) = res else { break };
                match res {
                    Ok(event) if is_relevant(&event) => {}
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "watch error");
                        continue;
                    }
                }
                // swallow the rest of the burst
                while let Ok(Some(_)) = tokio::time::timeout(debounce, rx.recv()).await {}

                let state = gate
                    .current()
                    .and_then(|id| orchestrator.status(&id).ok())
                    .map(|s| s.state);
                if gate.on_burst(state) {
                    enqueue_refresh(orchestrator, &mut gate)?;
                } else {
                    debug!("refresh running, follow-up parked");
                }
            }
            _ = wait_for(orchestrator, parked), if parked.is_some() => {
                if gate.on_finished() {
                    enqueue_refresh(orchestrator, &mut gate)?;
                }
            }
        }
    }
    Ok(())
}
