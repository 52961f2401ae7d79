use crate::models::FileRecord;
use crate::Result;
use std::collections::{HashMap, HashSet};

/// Batch-shaped access to file records.
///
/// Every operation accepts empty input and returns an empty/zero result
/// without touching the backing store.
#[async_trait::async_trait]
pub trait BatchGateway: Send + Sync {
    async fn get_by_ids(&self, ids: &[String]) -> Result<HashMap<String, FileRecord>>;

    /// Updates records by id. Later entries for the same id win.
    async fn batch_update(&self, records: &[FileRecord]) -> Result<usize>;

    /// Inserts new records, ignoring ids that already exist.
    async fn batch_insert(&self, records: &[FileRecord]) -> Result<usize>;

    /// Names among `names` that already belong to an active record.
    async fn get_existing_names(&self, names: &[String]) -> Result<HashSet<String>>;

    /// Active records still waiting for a category, ordered by name.
    async fn get_uncategorized(&self) -> Result<Vec<FileRecord>>;
}
