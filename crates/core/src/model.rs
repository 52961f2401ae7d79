//! Filename classifier: token featurization plus multinomial naive Bayes.
//!
//! `TextModel` is the serialized artifact; `Predictor` is the derived,
//! ready-to-use prediction function built once per load.

use crate::error::{PipelineError, Result};
use crate::training_log::TrainingLogEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextModel {
    pub version: u32,
    pub trained_at: DateTime<Utc>,
    pub samples: usize,
    classes: BTreeMap<String, ClassCounts>,
    vocabulary_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ClassCounts {
    documents: usize,
    tokens_total: usize,
    tokens: HashMap<String, usize>,
}

impl TextModel {
    /// Fits a model on every entry whose file name yields at least one token.
    pub fn fit(entries: &[TrainingLogEntry]) -> Option<Self> {
        let mut classes: BTreeMap<String, ClassCounts> = BTreeMap::new();
        let mut vocabulary: HashSet<String> = HashSet::new();
        let mut samples = 0usize;
        for entry in entries {
            let tokens = featurize(&entry.file_name);
            if tokens.is_empty() {
                continue;
            }
            samples += 1;
            let counts = classes.entry(entry.category.clone()).or_default();
            counts.documents += 1;
            for token in tokens {
                counts.tokens_total += 1;
                *counts.tokens.entry(token.clone()).or_default() += 1;
                vocabulary.insert(token);
            }
        }
        if samples == 0 {
            return None;
        }
        Some(Self {
            version: FORMAT_VERSION,
            trained_at: Utc::now(),
            samples,
            classes,
            vocabulary_size: vocabulary.len(),
        })
    }

    pub fn categories(&self) -> Vec<&str> {
        self.classes.keys().map(String::as_str).collect()
    }

    pub fn predictor(&self) -> Predictor {
        let vocab = self.vocabulary_size.max(1) as f64;
        let samples = self.samples.max(1) as f64;
        let classes = self
            .classes
            .iter()
            .map(|(label, counts)| {
                let denom = counts.tokens_total as f64 + vocab;
                ClassScorer {
                    label: label.clone(),
                    log_prior: (counts.documents as f64 / samples).ln(),
                    log_unseen: (1.0 / denom).ln(),
                    log_likelihood: counts
                        .tokens
                        .iter()
                        .map(|(t, n)| (t.clone(), ((*n as f64 + 1.0) / denom).ln()))
                        .collect(),
                }
            })
            .collect();
        Predictor { classes }
    }

    /// Writes to a sibling temp file first so readers never see a partial
    /// artifact.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec(self)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|source| PipelineError::ModelLoad {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
struct ClassScorer {
    label: String,
    log_prior: f64,
    log_unseen: f64,
    log_likelihood: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct Predictor {
    classes: Vec<ClassScorer>,
}

impl Predictor {
    pub fn predict(&self, file_name: &str) -> Result<String> {
        let tokens = featurize(file_name);
        if tokens.is_empty() {
            return Err(PipelineError::Prediction {
                name: file_name.to_string(),
                reason: "no usable tokens".into(),
            });
        }
        let mut best: Option<(&str, f64)> = None;
        for class in &self.classes {
            let score = tokens.iter().fold(class.log_prior, |acc, t| {
                acc + class
                    .log_likelihood
                    .get(t)
                    .copied()
                    .unwrap_or(class.log_unseen)
            });
            // ties keep the alphabetically first label
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((class.label.as_str(), score));
            }
        }
        best.map(|(label, _)| label.to_string())
            .ok_or_else(|| PipelineError::Prediction {
                name: file_name.to_string(),
                reason: "model has no categories".into(),
            })
    }
}

/// Lowercased alphanumeric words of the stem plus an `ext:` token.
pub fn featurize(file_name: &str) -> Vec<String> {
    let lower = file_name.trim().to_lowercase();
    let (stem, ext) = match lower.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (lower.as_str(), None),
    };
    let mut tokens: Vec<String> = stem
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(ext) = ext {
        if ext.chars().all(char::is_alphanumeric) {
            tokens.push(format!("ext:{}", ext));
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(lines: &[&str]) -> Vec<TrainingLogEntry> {
        lines
            .iter()
            .filter_map(|l| TrainingLogEntry::parse(l))
            .collect()
    }

    #[test]
    fn featurize_splits_words_and_extension() {
        assert_eq!(
            featurize("Holiday_Trip-2019.MP4"),
            vec!["holiday", "trip", "2019", "ext:mp4"]
        );
        assert_eq!(featurize(".hidden"), vec!["hidden"]);
        assert!(featurize("...").is_empty());
    }

    #[test]
    fn single_class_model_predicts_that_class() {
        let model = TextModel::fit(&entries(&["1;Video;movie.mp4"])).unwrap();
        let p = model.predictor();
        assert_eq!(p.predict("movie.mp4").unwrap(), "Video");
        assert_eq!(p.predict("anything.else").unwrap(), "Video");
    }

    #[test]
    fn extension_and_words_separate_classes() {
        let model = TextModel::fit(&entries(&[
            "1;Video;movie.mp4",
            "2;Video;clip.mkv",
            "3;Music;song.mp3",
            "4;Music;album track.mp3",
            "5;Documents;invoice.pdf",
            "6;Documents;report final.pdf",
        ]))
        .unwrap();
        let p = model.predictor();
        assert_eq!(p.predict("other song.mp3").unwrap(), "Music");
        assert_eq!(p.predict("tax invoice.pdf").unwrap(), "Documents");
        assert_eq!(p.predict("new movie.mp4").unwrap(), "Video");
        assert!(p.predict("---").is_err());
    }

    #[test]
    fn fit_without_usable_entries_yields_nothing() {
        assert!(TextModel::fit(&[]).is_none());
        assert!(TextModel::fit(&entries(&["1;Video;..."])).is_none());
    }

    #[tokio::test]
    async fn save_and_load_preserve_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model").join("classifier.json");
        let model = TextModel::fit(&entries(&["1;Music;song.mp3", "2;Video;movie.mp4"])).unwrap();
        model.save(&path).await.unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded = TextModel::load(&path).await.unwrap();
        assert_eq!(loaded.samples, 2);
        assert_eq!(loaded.predictor().predict("song.mp3").unwrap(), "Music");
    }

    #[tokio::test]
    async fn corrupt_artifact_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            TextModel::load(&path).await,
            Err(PipelineError::ModelLoad { .. })
        ));
    }
}
