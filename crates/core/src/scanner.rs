//! Scans the origin directory and registers files the store has not seen,
//! classifying them in batches on the way in.

use crate::classifier::ClassifierCache;
use crate::error::{PipelineError, Result};
use crate::jobs::JobContext;
use crate::progress::ProgressPayload;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use storage::{BatchGateway, FileRecord};
use tokio::task;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub exclude: Vec<String>,
    pub recursive: bool,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct ScannedItem {
    pub path: PathBuf,
    pub name: String,
    pub size: i64,
    pub mtime: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    pub scanned: usize,
    pub inserted: usize,
    pub skipped_existing: usize,
    /// False when the classifier was unavailable and records were stored
    /// uncategorized.
    pub classified: bool,
}

/// Lists regular, non-hidden files under `root` (one level unless
/// `recursive`), sorted by name.
pub async fn list_files(root: &Path, options: &ScanOptions) -> Result<Vec<ScannedItem>> {
    let exclude_set = build_globset(&options.exclude)?;
    let root = root.to_path_buf();
    let max_depth = if options.recursive { usize::MAX } else { 1 };

    let items = task::spawn_blocking(move || {
        if !root.is_dir() {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("origin directory {} does not exist", root.display()),
            )));
        }
        let mut items = Vec::new();
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || should_descend(e.path(), &exclude_set))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let meta = match fs::metadata(path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or_default();
            items.push(ScannedItem {
                path: path.to_path_buf(),
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len() as i64,
                mtime,
            });
        }
        items.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
        Ok(items)
    })
    .await??;
    Ok(items)
}

/// The `refresh` operation.
pub async fn refresh(
    gateway: &dyn BatchGateway,
    classifier: &ClassifierCache,
    origin: &Path,
    options: &ScanOptions,
    ctx: &JobContext,
) -> Result<RefreshSummary> {
    info!(origin = %origin.display(), "starting refresh scan");
    let items = list_files(origin, options).await?;
    ctx.set_total(items.len());

    let mut summary = RefreshSummary {
        scanned: items.len(),
        classified: true,
        ..Default::default()
    };
    let mut seen: HashSet<String> = HashSet::new();

    for batch in items.chunks(options.batch_size.max(1)) {
        ctx.checkpoint()?;
        let names: Vec<String> = batch.iter().map(|i| i.name.clone()).collect();
        let existing = gateway.get_existing_names(&names).await?;

        let fresh: Vec<FileRecord> = batch
            .iter()
            .filter(|item| !existing.contains(&item.name) && seen.insert(item.name.clone()))
            .map(|item| {
                FileRecord::discovered(
                    Uuid::new_v4().to_string(),
                    item.name.clone(),
                    item.path.to_string_lossy().into_owned(),
                    item.size,
                    item.mtime,
                )
            })
            .collect();
        summary.skipped_existing += batch.len() - fresh.len();

        let records = if summary.classified {
            match classifier.predict_batch(fresh.clone()).await {
                Ok(records) => records,
                Err(PipelineError::ModelUnavailable(reason)) => {
                    warn!(%reason, "classifier unavailable, storing files uncategorized");
                    summary.classified = false;
                    ctx.publish(ProgressPayload::message(format!(
                        "classifier unavailable, files left uncategorized: {}",
                        reason
                    )));
                    fresh
                }
                Err(e) => return Err(e),
            }
        } else {
            fresh
        };

        summary.inserted += gateway.batch_insert(&records).await?;
        ctx.advance(batch.len());
    }

    info!(
        scanned = summary.scanned,
        inserted = summary.inserted,
        skipped = summary.skipped_existing,
        "refresh complete"
    );
    Ok(summary)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)
            .map_err(|e| PipelineError::Validation(format!("bad exclude pattern {:?}: {}", pat, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| PipelineError::Validation(e.to_string()))
}

fn should_descend(path: &Path, excludes: &GlobSet) -> bool {
    !is_excluded(path, excludes) && !is_hidden(path)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_excluded(path: &Path, excludes: &GlobSet) -> bool {
    excludes.is_match(path)
        || path
            .file_name()
            .map(|n| excludes.is_match(Path::new(n)))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_visible_top_level_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.mp4"), "aaaa").unwrap();
        fs::write(dir.path().join(".secret"), "x").unwrap();
        fs::write(dir.path().join("skip.tmp"), "x").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("deep.txt"), "x").unwrap();

        let opts = ScanOptions {
            exclude: vec!["*.tmp".into()],
            recursive: false,
            batch_size: 10,
        };
        let items = list_files(dir.path(), &opts).await.unwrap();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.mp4", "b.txt"]);
        assert_eq!(items[0].size, 4);

        let recursive = ScanOptions {
            recursive: true,
            ..opts
        };
        let items = list_files(dir.path(), &recursive).await.unwrap();
        assert_eq!(items.len(), 3);
    }

    #[tokio::test]
    async fn missing_origin_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let res = list_files(&dir.path().join("nope"), &ScanOptions::default()).await;
        assert!(res.is_err());
    }
}
