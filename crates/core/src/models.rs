use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequestItem {
    pub file_id: String,
    pub target_category: String,
}

impl MoveRequestItem {
    pub fn new(file_id: impl Into<String>, target_category: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            target_category: target_category.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub items: Vec<MoveRequestItem>,
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    #[serde(default = "default_true")]
    pub create_missing_directories: bool,
}

fn default_true() -> bool {
    true
}

impl MoveRequest {
    pub fn new(items: Vec<MoveRequestItem>) -> Self {
        Self {
            items,
            continue_on_error: true,
            create_missing_directories: true,
        }
    }

    pub fn all_or_nothing(mut self) -> Self {
        self.continue_on_error = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveStatus {
    Completed,
    Failed,
    IdNotPresent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub file_id: String,
    /// Name the file ended up with, after collision renaming.
    pub file_name: String,
    pub status: MoveStatus,
    pub message: String,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveReport {
    pub outcomes: Vec<MoveOutcome>,
    pub moved: usize,
    pub failed: usize,
    pub missing_ids: Vec<String>,
    /// Stopped before any filesystem change because ids were missing.
    pub aborted: bool,
    pub cancelled: bool,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

impl MoveReport {
    pub fn count(&self, status: MoveStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
