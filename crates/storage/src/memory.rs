use crate::gateway::BatchGateway;
use crate::models::FileRecord;
use crate::{Result, StorageError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// In-process gateway. Records every call so callers can assert on the
/// batching behaviour of the pipeline.
#[derive(Default)]
pub struct MemoryGateway {
    records: Mutex<BTreeMap<String, FileRecord>>,
    calls: AtomicUsize,
    update_batches: Mutex<Vec<usize>>,
    insert_batches: Mutex<Vec<usize>>,
    unavailable: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        let gw = Self::default();
        {
            let mut map = gw.lock_records();
            for r in records {
                map.insert(r.id.clone(), r);
            }
        }
        gw
    }

    /// Total gateway calls, including ones with empty input.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Record count of each `batch_update` call that carried records.
    pub fn update_batches(&self) -> Vec<usize> {
        lock(&self.update_batches).clone()
    }

    pub fn insert_batches(&self) -> Vec<usize> {
        lock(&self.insert_batches).clone()
    }

    /// Makes every subsequent call fail as if the store went away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get(&self, id: &str) -> Option<FileRecord> {
        self.lock_records().get(id).cloned()
    }

    pub fn all(&self) -> Vec<FileRecord> {
        self.lock_records().values().cloned().collect()
    }

    fn lock_records(&self) -> MutexGuard<'_, BTreeMap<String, FileRecord>> {
        lock(&self.records)
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory gateway switched off".into()));
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl BatchGateway for MemoryGateway {
    async fn get_by_ids(&self, ids: &[String]) -> Result<HashMap<String, FileRecord>> {
        self.enter()?;
        let map = self.lock_records();
        Ok(ids
            .iter()
            .filter_map(|id| map.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    async fn batch_update(&self, records: &[FileRecord]) -> Result<usize> {
        self.enter()?;
        if records.is_empty() {
            return Ok(0);
        }
        lock(&self.update_batches).push(records.len());
        let mut map = self.lock_records();
        let mut updated = 0;
        for r in records {
            if let Some(slot) = map.get_mut(&r.id) {
                *slot = r.clone();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn batch_insert(&self, records: &[FileRecord]) -> Result<usize> {
        self.enter()?;
        if records.is_empty() {
            return Ok(0);
        }
        lock(&self.insert_batches).push(records.len());
        let mut map = self.lock_records();
        let mut inserted = 0;
        for r in records {
            if !map.contains_key(&r.id) {
                map.insert(r.id.clone(), r.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn get_existing_names(&self, names: &[String]) -> Result<HashSet<String>> {
        self.enter()?;
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        let map = self.lock_records();
        Ok(map
            .values()
            .filter(|r| r.active && wanted.contains(r.name.as_str()))
            .map(|r| r.name.clone())
            .collect())
    }

    async fn get_uncategorized(&self) -> Result<Vec<FileRecord>> {
        self.enter()?;
        let map = self.lock_records();
        let mut pending: Vec<FileRecord> = map
            .values()
            .filter(|r| r.active && r.needs_categorization)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inactive_records_are_invisible_to_name_checks() {
        let mut gone = FileRecord::discovered("1", "old.txt", "/x/old.txt", 1, 0);
        gone.active = false;
        let gw = MemoryGateway::with_records([gone]);
        let names = gw.get_existing_names(&["old.txt".into()]).await.unwrap();
        assert!(names.is_empty());
        assert!(gw.get_uncategorized().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let gw = MemoryGateway::new();
        gw.set_unavailable(true);
        assert!(gw.get_by_ids(&["1".into()]).await.is_err());
        assert_eq!(gw.calls(), 1);
    }
}
