use catalog_core::classifier::ClassifierCache;
use catalog_core::config::{keys, ConfigProvider};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

fn settings(dir: &Path) -> Arc<dyn ConfigProvider> {
    let mut map = HashMap::new();
    let dir = dir.to_string_lossy().into_owned();
    map.insert(keys::MODEL_PATH.to_string(), dir.clone());
    map.insert(keys::MODEL_NAME.to_string(), "model.json".to_string());
    map.insert(keys::TRAINING_LOG_PATH.to_string(), dir);
    map.insert(keys::TRAINING_LOG_NAME.to_string(), "training.log".to_string());
    Arc::new(map)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_trainings_serialize_and_all_succeed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("training.log"),
        "1;Video;movie.mp4\n2;Music;song.mp3\n3;Docs;taxes.pdf\n",
    )
    .unwrap();
    let cache = Arc::new(ClassifierCache::new(settings(dir.path())));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.train_and_save().await })
        })
        .collect();
    for h in handles {
        let descriptor = h.await.unwrap().unwrap();
        assert_eq!(descriptor.samples, 3);
    }

    assert_eq!(cache.train_count(), 8);
    assert_eq!(cache.peak_gate_holders(), 1);
    assert_eq!(cache.predict("holiday.mp4").await.unwrap(), "Video");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cold_predicts_load_once() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("training.log"), "1;Video;movie.mp4\n").unwrap();
    let cache = Arc::new(ClassifierCache::new(settings(dir.path())));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.predict(&format!("clip{}.mp4", i)).await })
        })
        .collect();
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap(), "Video");
    }
    assert_eq!(cache.load_count(), 1);
    assert_eq!(cache.train_count(), 1);
    assert_eq!(cache.peak_gate_holders(), 1);

    let info = cache.info().await.unwrap();
    assert!(info.exists);
    assert!(info.cached);
    assert!(info.checksum.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retrains_and_cold_loads_never_overlap() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("training.log"),
        "1;Video;movie.mp4\n2;Docs;report.pdf\n",
    )
    .unwrap();
    let cache = Arc::new(ClassifierCache::new(settings(dir.path())));

    let mut handles = Vec::new();
    for i in 0..12 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            if i % 3 == 0 {
                cache.train_and_save().await.map(|_| ())
            } else {
                cache.predict("holiday.mp4").await.map(|_| ())
            }
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(cache.peak_gate_holders(), 1);
    assert!(cache.train_count() >= 4);
}
