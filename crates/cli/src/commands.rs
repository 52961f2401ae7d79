use anyhow::{bail, Context, Result};
use catalog_core::classifier::ModelInfo;
use catalog_core::jobs::{JobOrchestrator, JobRequest, JobState, JobStatus};
use catalog_core::models::{MoveRequest, MoveRequestItem};
use catalog_core::progress::Topic;
use std::path::Path;

/// Parses a `FILE_ID=CATEGORY` pair.
pub fn parse_item(raw: &str) -> Result<MoveRequestItem> {
    let Some((id, category)) = raw.split_once('=') else {
        bail!("expected FILE_ID=CATEGORY, got {:?}", raw);
    };
    Ok(MoveRequestItem::new(id.trim(), category.trim()))
}

/// Reads a JSON array of `{"file_id": .., "target_category": ..}` objects.
pub fn load_items_file(path: &Path) -> Result<Vec<MoveRequestItem>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read items file {}", path.display()))?;
    let items: Vec<MoveRequestItem> = serde_json::from_str(&text)
        .with_context(|| format!("parse items file {}", path.display()))?;
    Ok(items)
}

pub fn build_move_request(
    items: &[String],
    items_file: Option<&Path>,
    continue_on_error: bool,
    create_missing_directories: bool,
) -> Result<MoveRequest> {
    let mut all = Vec::new();
    if let Some(path) = items_file {
        all.extend(load_items_file(path)?);
    }
    for raw in items {
        all.push(parse_item(raw)?);
    }
    let mut request = MoveRequest::new(all);
    request.continue_on_error = continue_on_error;
    request.create_missing_directories = create_missing_directories;
    Ok(request)
}

/// Enqueues `request`, echoes its progress to stderr (unless `json`) and
/// waits for it to finish.
pub async fn run_job(
    orchestrator: &JobOrchestrator,
    request: JobRequest,
    json: bool,
) -> Result<JobStatus> {
    let mut events = orchestrator.progress().subscribe();
    let id = orchestrator.enqueue(request)?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if event.job_id != Some(id) || json {
                continue;
            }
            // state changes are summarized at the end
            if event.topic == Topic::Jobs {
                continue;
            }
            eprintln!("{}", event);
        }
    });
    let status = orchestrator.wait(&id).await;
    printer.abort();
    Ok(status?)
}

pub fn print_status(status: &JobStatus, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }
    let elapsed = match (status.started_at, status.completed_at) {
        (Some(start), Some(end)) => format!(" in {}ms", (end - start).num_milliseconds()),
        _ => String::new(),
    };
    println!(
        "{} job {}: {}{} ({}/{} items)",
        status.kind, status.id, status.state, elapsed, status.processed_items, status.total_items
    );
    if let Some(error) = &status.error {
        println!("error: {}", error);
    }
    if let Some(result) = status.metadata.get("result") {
        println!("result: {}", result);
    }
    if status.state != JobState::Succeeded {
        if let Some(report) = status.metadata.get("report") {
            println!("report: {}", report);
        }
    }
    Ok(())
}

pub fn print_model_info(info: &ModelInfo, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(info)?);
        return Ok(());
    }
    println!("artifact: {}", info.artifact_path.display());
    if !info.exists {
        println!("not trained yet");
        return Ok(());
    }
    println!("size: {} bytes", info.size_bytes.unwrap_or_default());
    if let Some(modified) = info.modified_at {
        println!("modified: {}", modified.to_rfc3339());
    }
    if let Some(checksum) = &info.checksum {
        println!("blake3: {}", checksum);
    }
    Ok(())
}
