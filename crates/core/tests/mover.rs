use catalog_core::config::{keys, ConfigProvider};
use catalog_core::jobs::{JobContext, JobKind};
use catalog_core::models::{MoveRequest, MoveRequestItem, MoveStatus};
use catalog_core::mover::BatchMover;
use catalog_core::progress::{ProgressChannel, ProgressPayload, Topic};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use storage::{FileRecord, MemoryGateway};
use tempfile::tempdir;

fn settings(root: &Path) -> Arc<dyn ConfigProvider> {
    let mut map = HashMap::new();
    map.insert(
        keys::DESTINATION_ROOT.to_string(),
        root.join("dest").to_string_lossy().into_owned(),
    );
    map.insert(
        keys::TRAINING_LOG_PATH.to_string(),
        root.join("logs").to_string_lossy().into_owned(),
    );
    map.insert(keys::TRAINING_LOG_NAME.to_string(), "training.csv".to_string());
    Arc::new(map)
}

/// Five files in `origin/`, ids "1" to "5".
fn seed(root: &Path) -> Vec<FileRecord> {
    seed_n(root, 5)
}

fn seed_n(root: &Path, count: usize) -> Vec<FileRecord> {
    let origin = root.join("origin");
    fs::create_dir_all(&origin).unwrap();
    (1..=count)
        .map(|i| {
            let name = format!("clip{}.mp4", i);
            let path = origin.join(&name);
            fs::write(&path, format!("data{}", i)).unwrap();
            FileRecord::discovered(i.to_string(), name, path.to_string_lossy().into_owned(), 5, 0)
        })
        .collect()
}

fn request(ids: &[&str], category: &str) -> MoveRequest {
    MoveRequest::new(
        ids.iter()
            .map(|id| MoveRequestItem::new(*id, category))
            .collect(),
    )
}

fn ctx(progress: &ProgressChannel) -> JobContext {
    JobContext::detached(JobKind::Move, progress.clone())
}

#[tokio::test]
async fn one_missing_source_fails_only_that_item() {
    let temp = tempdir().unwrap();
    let records = seed(temp.path());
    fs::remove_file(&records[1].path).unwrap();
    let gateway = Arc::new(MemoryGateway::with_records(records));
    let mover = BatchMover::new(gateway.clone(), settings(temp.path()), 2);
    let progress = ProgressChannel::default();
    let mut sub = progress.subscribe();

    let report = mover
        .run(&request(&["1", "2", "3", "4", "5"], "Video"), &ctx(&progress))
        .await
        .unwrap();

    let statuses: Vec<_> = report.outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            MoveStatus::Completed,
            MoveStatus::Failed,
            MoveStatus::Completed,
            MoveStatus::Completed,
            MoveStatus::Completed,
        ]
    );
    assert_eq!(report.moved, 4);
    assert_eq!(report.failed, 1);
    assert!(report.outcomes[1].message.contains("source file not found"));
    assert_eq!(gateway.update_batches(), vec![4]);

    let moved = gateway.get("3").unwrap();
    assert_eq!(moved.category.as_deref(), Some("Video"));
    assert!(!moved.needs_categorization);
    assert!(!moved.is_new);
    assert!(Path::new(&moved.path).exists());
    assert!(moved.path.contains("dest"));
    assert!(gateway.get("2").unwrap().needs_categorization);

    let log = fs::read_to_string(temp.path().join("logs").join("training.csv")).unwrap();
    let lines: Vec<_> = log.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "1;Video;clip1.mp4");

    let events = sub.drain();
    let outcomes = events
        .iter()
        .filter(|e| matches!(e.payload, ProgressPayload::MoveOutcome(_)))
        .count();
    assert_eq!(outcomes, 5);
    assert!(events.iter().all(|e| e.topic == Topic::Move));
    assert!(matches!(
        events.last().map(|e| &e.payload),
        Some(ProgressPayload::MoveSummary { moved: 4, failed: 1, missing: 0, .. })
    ));
}

#[tokio::test]
async fn missing_id_aborts_everything_when_not_continuing() {
    let temp = tempdir().unwrap();
    let records = seed(temp.path());
    let gateway = Arc::new(MemoryGateway::with_records(records.clone()));
    let mover = BatchMover::new(gateway.clone(), settings(temp.path()), 10);

    let report = mover
        .run(
            &request(&["1", "2", "999", "4"], "Video").all_or_nothing(),
            &ctx(&ProgressChannel::default()),
        )
        .await
        .unwrap();

    assert!(report.aborted);
    assert_eq!(report.missing_ids, vec!["999".to_string()]);
    assert_eq!(report.moved, 0);
    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.outcomes[2].status, MoveStatus::IdNotPresent);
    assert_eq!(report.outcomes[0].status, MoveStatus::Failed);
    for record in &records {
        assert!(Path::new(&record.path).exists());
    }
    assert!(!temp.path().join("dest").exists());
    assert!(gateway.update_batches().is_empty());
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn missing_id_is_reported_per_item_when_continuing() {
    let temp = tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::with_records(seed(temp.path())));
    let mover = BatchMover::new(gateway.clone(), settings(temp.path()), 10);

    let report = mover
        .run(&request(&["1", "999"], "Docs"), &ctx(&ProgressChannel::default()))
        .await
        .unwrap();

    assert!(!report.aborted);
    assert_eq!(report.moved, 1);
    assert_eq!(report.outcomes[1].status, MoveStatus::IdNotPresent);
    assert_eq!(report.missing_ids, vec!["999".to_string()]);
}

#[tokio::test]
async fn empty_request_touches_nothing() {
    let gateway = Arc::new(MemoryGateway::new());
    let mover = BatchMover::new(gateway.clone(), Arc::new(HashMap::new()), 10);
    let report = mover
        .run(&MoveRequest::new(vec![]), &ctx(&ProgressChannel::default()))
        .await
        .unwrap();
    assert!(report.outcomes.is_empty());
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
async fn name_collision_gets_numbered_suffix() {
    let temp = tempdir().unwrap();
    let records = seed(temp.path());
    let taken = temp.path().join("dest").join("Video");
    fs::create_dir_all(&taken).unwrap();
    fs::write(taken.join("clip1.mp4"), "already here").unwrap();
    let gateway = Arc::new(MemoryGateway::with_records(records));
    let mover = BatchMover::new(gateway.clone(), settings(temp.path()), 10);

    let report = mover
        .run(&request(&["1"], "Video"), &ctx(&ProgressChannel::default()))
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].status, MoveStatus::Completed);
    assert_eq!(report.outcomes[0].file_name, "clip1_1.mp4");
    assert_eq!(fs::read_to_string(taken.join("clip1.mp4")).unwrap(), "already here");
    assert_eq!(fs::read_to_string(taken.join("clip1_1.mp4")).unwrap(), "data1");
    assert_eq!(gateway.get("1").unwrap().name, "clip1_1.mp4");
}

#[tokio::test]
async fn missing_destination_fails_when_creation_disabled() {
    let temp = tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::with_records(seed(temp.path())));
    let mover = BatchMover::new(gateway.clone(), settings(temp.path()), 10);
    let mut req = request(&["1"], "Archive");
    req.create_missing_directories = false;

    let report = mover
        .run(&req, &ctx(&ProgressChannel::default()))
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].status, MoveStatus::Failed);
    assert!(report.outcomes[0].message.contains("destination directory missing"));
    assert!(gateway.update_batches().is_empty());
}

#[tokio::test]
async fn store_failure_after_moves_is_an_error() {
    let temp = tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::with_records(seed(temp.path())));
    let mover = BatchMover::new(gateway.clone(), settings(temp.path()), 1);
    let progress = ProgressChannel::default();
    let mut sub = progress.subscribe();
    let context = ctx(&progress);

    // lookup succeeds, then the store goes away before the batch update
    let gw = gateway.clone();
    let watcher = tokio::spawn(async move {
        while let Some(event) = sub.recv().await {
            if matches!(event.payload, ProgressPayload::MoveOutcome(_)) {
                gw.set_unavailable(true);
                break;
            }
        }
    });
    let req = request(&["1", "2"], "Video");
    let result = mover.run(&req, &context).await;
    watcher.await.unwrap();

    assert!(result.is_err());
    assert!(temp.path().join("dest").join("Video").join("clip1.mp4").exists());
}

#[tokio::test]
async fn cancel_before_start_moves_nothing() {
    let temp = tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::with_records(seed(temp.path())));
    let mover = BatchMover::new(gateway.clone(), settings(temp.path()), 2);
    let context = ctx(&ProgressChannel::default());
    context.cancel_token().cancel();

    let report = mover
        .run(&request(&["1", "2", "3"], "Video"), &context)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.outcomes.len(), 3);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.status == MoveStatus::Failed && o.message.contains("cancelled")));
    assert!(gateway.update_batches().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_mid_move_persists_completed_items() {
    let temp = tempdir().unwrap();
    let total = 20;
    let gateway = Arc::new(MemoryGateway::with_records(seed_n(temp.path(), total)));
    let mover = BatchMover::new(gateway.clone(), settings(temp.path()), 1);
    let progress = ProgressChannel::default();
    let mut sub = progress.subscribe();
    let context = ctx(&progress);

    let token = context.cancel_token().clone();
    let canceller = tokio::spawn(async move {
        while let Some(event) = sub.recv().await {
            if matches!(event.payload, ProgressPayload::MoveOutcome(_)) {
                token.cancel();
                break;
            }
        }
    });
    let ids: Vec<String> = (1..=total).map(|i| i.to_string()).collect();
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let report = mover.run(&request(&ids, "Video"), &context).await.unwrap();
    canceller.await.unwrap();

    assert!(report.cancelled);
    let moved = report.moved;
    assert!(moved >= 1 && moved < total, "moved {}", moved);
    assert_eq!(report.outcomes.len(), total);
    assert!(report.outcomes[..moved]
        .iter()
        .all(|o| o.status == MoveStatus::Completed));
    assert!(report.outcomes[moved..]
        .iter()
        .all(|o| o.status == MoveStatus::Failed && o.message.contains("cancelled")));

    // one store update and one log line per completed move
    assert_eq!(gateway.update_batches(), vec![moved]);
    let log = fs::read_to_string(temp.path().join("logs").join("training.csv")).unwrap();
    assert_eq!(log.lines().count(), moved);
    assert_eq!(gateway.get("1").unwrap().category.as_deref(), Some("Video"));
    assert!(gateway.get(&total.to_string()).unwrap().needs_categorization);
    assert!(temp
        .path()
        .join("origin")
        .join(format!("clip{}.mp4", total))
        .exists());
}
