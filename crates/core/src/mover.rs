//! Batch file mover.
//!
//! Ids are resolved in one lookup, files are moved one by one, and the
//! resulting record updates and training log lines are written in one batch
//! each after the loop. A failed move only fails its own item.

use crate::config::{keys, ConfigProvider};
use crate::error::Result;
use crate::fs_move;
use crate::jobs::JobContext;
use crate::models::{MoveOutcome, MoveReport, MoveRequest, MoveRequestItem, MoveStatus};
use crate::progress::ProgressPayload;
use crate::training_log::{TrainingLog, TrainingLogEntry};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{BatchGateway, FileRecord};
use tracing::{info, warn};

pub struct BatchMover {
    gateway: Arc<dyn BatchGateway>,
    config: Arc<dyn ConfigProvider>,
    batch_size: usize,
}

impl BatchMover {
    pub fn new(
        gateway: Arc<dyn BatchGateway>,
        config: Arc<dyn ConfigProvider>,
        batch_size: usize,
    ) -> Self {
        Self {
            gateway,
            config,
            batch_size: batch_size.max(1),
        }
    }

    /// Runs the move. Outcomes come back in input order, one per item.
    ///
    /// Infrastructure failures after the moves (batch update, log append)
    /// are returned as errors; the report built so far is stored in the job
    /// metadata under `"report"` first.
    pub async fn run(&self, request: &MoveRequest, ctx: &JobContext) -> Result<MoveReport> {
        let started = Instant::now();
        let mut report = MoveReport::default();
        if request.items.is_empty() {
            return Ok(report);
        }
        ctx.set_total(request.items.len());

        let destination_root = PathBuf::from(self.config.require(keys::DESTINATION_ROOT)?);
        let training_log = TrainingLog::from_config(self.config.as_ref())?;

        let mut unique = HashSet::new();
        let ids: Vec<String> = request
            .items
            .iter()
            .filter(|i| unique.insert(i.file_id.as_str()))
            .map(|i| i.file_id.clone())
            .collect();
        let mut records = self.gateway.get_by_ids(&ids).await?;
        report.missing_ids = ids
            .into_iter()
            .filter(|id| !records.contains_key(id))
            .collect();

        if !report.missing_ids.is_empty() && !request.continue_on_error {
            warn!(missing = ?report.missing_ids, "aborting move, ids not present");
            report.aborted = true;
            for item in &request.items {
                let outcome = if records.contains_key(&item.file_id) {
                    skipped(item, "not attempted: request has missing ids")
                } else {
                    not_present(item)
                };
                self.record(&mut report, outcome, ctx);
            }
            self.finalize(&mut report, started, ctx);
            return Ok(report);
        }

        let mut updated: Vec<FileRecord> = Vec::new();
        let mut log_lines: Vec<TrainingLogEntry> = Vec::new();
        let mut done = 0usize;

        for batch in request.items.chunks(self.batch_size) {
            if ctx.is_cancelled() {
                report.cancelled = true;
                break;
            }
            for item in batch {
                let outcome = match records.get_mut(&item.file_id) {
                    None => not_present(item),
                    Some(record) => {
                        let item_started = Instant::now();
                        let category = item.target_category.trim();
                        match move_one(
                            record,
                            category,
                            &destination_root,
                            request.create_missing_directories,
                        )
                        .await
                        {
                            Ok(()) => {
                                updated.push(record.clone());
                                log_lines.push(TrainingLogEntry::new(
                                    record.id.clone(),
                                    category,
                                    record.name.clone(),
                                ));
                                MoveOutcome {
                                    file_id: item.file_id.clone(),
                                    file_name: record.name.clone(),
                                    status: MoveStatus::Completed,
                                    message: format!("moved to {}", record.path),
                                    elapsed: item_started.elapsed(),
                                }
                            }
                            Err(e) => {
                                warn!(file_id = %item.file_id, error = %e, "move failed");
                                MoveOutcome {
                                    file_id: item.file_id.clone(),
                                    file_name: record.name.clone(),
                                    status: MoveStatus::Failed,
                                    message: e.to_string(),
                                    elapsed: item_started.elapsed(),
                                }
                            }
                        }
                    }
                };
                self.record(&mut report, outcome, ctx);
            }
            done += batch.len();
            ctx.advance(batch.len());
        }

        if report.cancelled {
            for item in &request.items[done..] {
                self.record(&mut report, skipped(item, "cancelled before processing"), ctx);
            }
        }

        if !updated.is_empty() {
            if let Err(e) = self.gateway.batch_update(&updated).await {
                self.fail_with_report(&mut report, started, ctx);
                return Err(e.into());
            }
        }
        if let Err(e) = training_log.append(&log_lines).await {
            self.fail_with_report(&mut report, started, ctx);
            return Err(e);
        }

        self.finalize(&mut report, started, ctx);
        info!(
            moved = report.moved,
            failed = report.failed,
            missing = report.missing_ids.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "move batch complete"
        );
        Ok(report)
    }

    fn record(&self, report: &mut MoveReport, outcome: MoveOutcome, ctx: &JobContext) {
        ctx.publish(ProgressPayload::MoveOutcome(outcome.clone()));
        report.outcomes.push(outcome);
    }

    fn finalize(&self, report: &mut MoveReport, started: Instant, ctx: &JobContext) {
        report.moved = report.count(MoveStatus::Completed);
        report.failed = report.count(MoveStatus::Failed);
        report.elapsed = started.elapsed();
        ctx.publish(ProgressPayload::MoveSummary {
            moved: report.moved,
            failed: report.failed,
            missing: report.count(MoveStatus::IdNotPresent),
            elapsed_ms: report.elapsed.as_millis() as u64,
        });
    }

    fn fail_with_report(&self, report: &mut MoveReport, started: Instant, ctx: &JobContext) {
        self.finalize(report, started, ctx);
        if let Ok(value) = serde_json::to_value(&*report) {
            ctx.set_metadata("report", value);
        }
    }
}

fn not_present(item: &MoveRequestItem) -> MoveOutcome {
    MoveOutcome {
        file_id: item.file_id.clone(),
        file_name: String::new(),
        status: MoveStatus::IdNotPresent,
        message: "file id not present in the store".to_string(),
        elapsed: Duration::ZERO,
    }
}

fn skipped(item: &MoveRequestItem, why: &str) -> MoveOutcome {
    MoveOutcome {
        file_id: item.file_id.clone(),
        file_name: String::new(),
        status: MoveStatus::Failed,
        message: why.to_string(),
        elapsed: Duration::ZERO,
    }
}

/// Moves one file into `root/category/` and updates the record in place on
/// success. The record is untouched on failure.
async fn move_one(
    record: &mut FileRecord,
    category: &str,
    root: &Path,
    create_dirs: bool,
) -> io::Result<()> {
    let source = PathBuf::from(&record.path);
    if !tokio::fs::try_exists(&source).await? {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source file not found: {}", source.display()),
        ));
    }

    let dest_dir = root.join(category);
    if !tokio::fs::try_exists(&dest_dir).await? {
        if !create_dirs {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("destination directory missing: {}", dest_dir.display()),
            ));
        }
        tokio::fs::create_dir_all(&dest_dir).await?;
    }

    let mut target = dest_dir.join(&record.name);
    if target != source {
        if tokio::fs::try_exists(&target).await? {
            target = fs_move::resolve_conflict(&target).await?;
        }
        fs_move::move_file(&source, &target).await?;
    }

    record.path = target.to_string_lossy().into_owned();
    if let Some(name) = target.file_name() {
        record.name = name.to_string_lossy().into_owned();
    }
    record.set_category(category);
    record.is_new = false;
    record.excluded_from_move = false;
    Ok(())
}
