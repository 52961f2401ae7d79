//! Cached, lazily-trained filename classifier shared by all jobs.
//!
//! Steady-state prediction only takes a short read lock on the cached
//! handle. Loading, lazy bootstrap training and explicit retraining all go
//! through one async gate, so at most one of them runs at a time.

use crate::config::{keys, ConfigProvider};
use crate::error::{PipelineError, Result};
use crate::model::{Predictor, TextModel};
use crate::training_log::TrainingLog;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use storage::FileRecord;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Category assigned when a single record cannot be classified.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// A loaded model and the prediction function derived from it.
pub struct ClassifierHandle {
    model: TextModel,
    predictor: Predictor,
    pub loaded_at: DateTime<Utc>,
    pub source: PathBuf,
}

impl ClassifierHandle {
    fn new(model: TextModel, source: PathBuf) -> Self {
        let predictor = model.predictor();
        Self {
            model,
            predictor,
            loaded_at: Utc::now(),
            source,
        }
    }

    pub fn predict(&self, file_name: &str) -> Result<String> {
        self.predictor.predict(file_name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactDescriptor {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub checksum: String,
    pub samples: usize,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub artifact_path: PathBuf,
    pub exists: bool,
    pub size_bytes: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
    pub checksum: Option<String>,
    pub cached: bool,
    pub loaded_at: Option<DateTime<Utc>>,
    pub load_count: u64,
    pub train_count: u64,
}

/// Counts callers inside the gate and remembers the highest count seen.
#[derive(Default)]
struct Occupancy {
    inside: AtomicUsize,
    peak: AtomicUsize,
}

impl Occupancy {
    fn enter(&self) -> OccupancyGuard<'_> {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        OccupancyGuard(self)
    }
}

struct OccupancyGuard<'a>(&'a Occupancy);

impl Drop for OccupancyGuard<'_> {
    fn drop(&mut self) {
        self.0.inside.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ModelPaths {
    artifact: PathBuf,
    log: TrainingLog,
}

pub struct ClassifierCache {
    config: Arc<dyn ConfigProvider>,
    current: RwLock<Option<Arc<ClassifierHandle>>>,
    gate: Mutex<()>,
    occupancy: Occupancy,
    loads: AtomicU64,
    trainings: AtomicU64,
}

impl ClassifierCache {
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            config,
            current: RwLock::new(None),
            gate: Mutex::new(()),
            occupancy: Occupancy::default(),
            loads: AtomicU64::new(0),
            trainings: AtomicU64::new(0),
        }
    }

    pub async fn predict(&self, file_name: &str) -> Result<String> {
        let handle = self.handle().await?;
        handle.predict(file_name)
    }

    /// Classifies every record with the same handle. A record that fails
    /// to classify gets `UNKNOWN_CATEGORY` instead of failing the batch.
    pub async fn predict_batch(&self, mut records: Vec<FileRecord>) -> Result<Vec<FileRecord>> {
        if records.is_empty() {
            return Ok(records);
        }
        let handle = self.handle().await?;
        for record in &mut records {
            match handle.predict(&record.name) {
                Ok(category) => record.set_category(category),
                Err(e) => {
                    warn!(file_id = %record.id, name = %record.name, error = %e, "prediction failed, using sentinel category");
                    record.set_category(UNKNOWN_CATEGORY);
                }
            }
        }
        Ok(records)
    }

    /// Returns the cached handle, loading (or training, when no artifact
    /// exists yet) under the gate on a cold cache.
    pub async fn handle(&self) -> Result<Arc<ClassifierHandle>> {
        if let Some(handle) = self.cached() {
            return Ok(handle);
        }
        let _gate = self.gate.lock().await;
        // another caller may have finished loading while we waited
        if let Some(handle) = self.cached() {
            return Ok(handle);
        }
        let _inside = self.occupancy.enter();
        let paths = self.paths()?;
        if !tokio::fs::try_exists(&paths.artifact).await? {
            info!(artifact = %paths.artifact.display(), "no model artifact, training on first use");
            self.train_locked(&paths)
                .await
                .map_err(|e| PipelineError::ModelUnavailable(e.to_string()))?;
        }
        let model = TextModel::load(&paths.artifact).await?;
        let handle = Arc::new(ClassifierHandle::new(model, paths.artifact.clone()));
        self.loads.fetch_add(1, Ordering::SeqCst);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&handle));
        info!(artifact = %paths.artifact.display(), samples = handle.model.samples, "classifier loaded");
        Ok(handle)
    }

    /// Fits a new model from the training log, persists it and drops the
    /// cached handle. Holds the gate for the whole run.
    pub async fn train_and_save(&self) -> Result<ArtifactDescriptor> {
        let _gate = self.gate.lock().await;
        let _inside = self.occupancy.enter();
        let paths = self.paths()?;
        let descriptor = self.train_locked(&paths).await?;
        self.invalidate();
        Ok(descriptor)
    }

    pub fn invalidate(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub async fn info(&self) -> Result<ModelInfo> {
        let artifact = self.artifact_path()?;
        let cached = self.cached();
        let (exists, size_bytes, modified_at, checksum) = match tokio::fs::metadata(&artifact).await
        {
            Ok(meta) => (
                true,
                Some(meta.len()),
                meta.modified().ok().map(DateTime::<Utc>::from),
                checksum(&artifact).await.ok(),
            ),
            Err(_) => (false, None, None, None),
        };
        Ok(ModelInfo {
            artifact_path: artifact,
            exists,
            size_bytes,
            modified_at,
            checksum,
            cached: cached.is_some(),
            loaded_at: cached.map(|h| h.loaded_at),
            load_count: self.load_count(),
            train_count: self.train_count(),
        })
    }

    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn train_count(&self) -> u64 {
        self.trainings.load(Ordering::SeqCst)
    }

    /// Most callers ever seen loading or training at the same time.
    pub fn peak_gate_holders(&self) -> usize {
        self.occupancy.peak.load(Ordering::SeqCst)
    }

    fn cached(&self) -> Option<Arc<ClassifierHandle>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn artifact_path(&self) -> Result<PathBuf> {
        let dir = self.config.require(keys::MODEL_PATH)?;
        let name = self.config.require(keys::MODEL_NAME)?;
        Ok(Path::new(&dir).join(name))
    }

    fn paths(&self) -> Result<ModelPaths> {
        Ok(ModelPaths {
            artifact: self.artifact_path()?,
            log: TrainingLog::from_config(self.config.as_ref())?,
        })
    }

    // Caller must hold the gate.
    async fn train_locked(&self, paths: &ModelPaths) -> Result<ArtifactDescriptor> {
        let entries = paths.log.read_all().await?;
        let log_path = paths.log.path().to_path_buf();
        let model = tokio::task::spawn_blocking(move || TextModel::fit(&entries))
            .await?
            .ok_or(PipelineError::EmptyTrainingData(log_path))?;
        model.save(&paths.artifact).await?;
        self.trainings.fetch_add(1, Ordering::SeqCst);

        let meta = tokio::fs::metadata(&paths.artifact).await?;
        let descriptor = ArtifactDescriptor {
            path: paths.artifact.clone(),
            size_bytes: meta.len(),
            modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
            checksum: checksum(&paths.artifact).await?,
            samples: model.samples,
            categories: model.categories().into_iter().map(String::from).collect(),
        };
        info!(
            artifact = %descriptor.path.display(),
            samples = descriptor.samples,
            categories = descriptor.categories.len(),
            "classifier trained"
        );
        Ok(descriptor)
    }
}

async fn checksum(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(dir: &Path) -> Arc<dyn ConfigProvider> {
        let mut map = HashMap::new();
        map.insert(keys::MODEL_PATH.to_string(), dir.join("model").to_string_lossy().into_owned());
        map.insert(keys::MODEL_NAME.to_string(), "classifier.json".to_string());
        map.insert(keys::TRAINING_LOG_PATH.to_string(), dir.to_string_lossy().into_owned());
        map.insert(keys::TRAINING_LOG_NAME.to_string(), "training.log".to_string());
        Arc::new(map)
    }

    #[tokio::test]
    async fn first_predict_bootstraps_training() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("training.log"), "1;Video;movie.mp4\n").unwrap();
        let cache = ClassifierCache::new(settings(dir.path()));

        assert_eq!(cache.predict("movie.mp4").await.unwrap(), "Video");
        assert_eq!(cache.train_count(), 1);
        assert_eq!(cache.load_count(), 1);
        assert!(dir.path().join("model").join("classifier.json").exists());
    }

    #[tokio::test]
    async fn warm_cache_never_reloads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("training.log"), "1;Video;movie.mp4\n").unwrap();
        let cache = ClassifierCache::new(settings(dir.path()));
        cache.predict("movie.mp4").await.unwrap();

        for _ in 0..50 {
            cache.predict("other.mp4").await.unwrap();
        }
        assert_eq!(cache.load_count(), 1);
        assert_eq!(cache.train_count(), 1);
    }

    #[tokio::test]
    async fn missing_training_data_makes_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ClassifierCache::new(settings(dir.path()));
        let err = cache.predict("movie.mp4").await.unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnavailable(_)));
        assert!(matches!(
            cache.train_and_save().await,
            Err(PipelineError::TrainingDataNotFound(_))
        ));
    }

    #[tokio::test]
    async fn retrain_invalidates_and_next_predict_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("training.log");
        std::fs::write(&log, "1;Video;movie.mp4\n").unwrap();
        let cache = ClassifierCache::new(settings(dir.path()));
        assert_eq!(cache.predict("song.mp3").await.unwrap(), "Video");

        std::fs::write(&log, "1;Video;movie.mp4\n2;Music;song.mp3\n3;Music;tune.mp3\n").unwrap();
        let descriptor = cache.train_and_save().await.unwrap();
        assert_eq!(descriptor.categories, vec!["Music", "Video"]);
        assert!(!cache.info().await.unwrap().cached);

        assert_eq!(cache.predict("song.mp3").await.unwrap(), "Music");
        assert_eq!(cache.load_count(), 2);
    }

    #[tokio::test]
    async fn bad_record_gets_sentinel_category() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("training.log"), "1;Video;movie.mp4\n").unwrap();
        let cache = ClassifierCache::new(settings(dir.path()));
        let records = vec![
            FileRecord::discovered("a", "movie.mp4", "/o/movie.mp4", 1, 0),
            FileRecord::discovered("b", "---", "/o/---", 1, 0),
        ];
        let out = cache.predict_batch(records).await.unwrap();
        assert_eq!(out[0].category.as_deref(), Some("Video"));
        assert_eq!(out[1].category.as_deref(), Some(UNKNOWN_CATEGORY));
        assert!(out.iter().all(|r| !r.needs_categorization));
    }

    #[tokio::test]
    async fn empty_batch_does_not_touch_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ClassifierCache::new(settings(dir.path()));
        assert!(cache.predict_batch(Vec::new()).await.unwrap().is_empty());
        assert_eq!(cache.load_count(), 0);
        assert_eq!(cache.train_count(), 0);
    }

    #[tokio::test]
    async fn missing_model_setting_is_reported() {
        let cache = ClassifierCache::new(Arc::new(HashMap::<String, String>::new()));
        assert!(matches!(
            cache.predict("x.mp4").await,
            Err(PipelineError::MissingSetting(_))
        ));
    }
}
