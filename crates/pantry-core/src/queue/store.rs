//! Persistent queue store contract

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::StorageError;
use crate::models::{MutationId, MutationRecord, MutationStatus};

/// Status tuple written atomically by [`QueueStore::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: MutationStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<i64>,
}

impl StatusChange {
    pub fn of(record: &MutationRecord) -> Self {
        Self {
            status: record.status,
            retry_count: record.retry_count,
            last_error: record.last_error.clone(),
            next_attempt_at: record.next_attempt_at,
        }
    }
}

/// Durable ordered storage for mutation records.
///
/// Every write is all-or-nothing: a crash mid-write leaves either the old
/// row or the new row, never a mix of fields.
pub trait QueueStore: Send {
    /// Insert a new record.
    fn append(&mut self, record: &MutationRecord) -> Result<(), StorageError>;

    fn get(&self, id: &MutationId) -> Result<Option<MutationRecord>, StorageError>;

    /// All records in enqueue order.
    fn load_all(&self) -> Result<Vec<MutationRecord>, StorageError>;

    /// Replace the status tuple of one record.
    fn update(&mut self, id: &MutationId, change: &StatusChange) -> Result<(), StorageError>;

    /// Replace a whole record (used when coalescing payloads).
    fn replace(&mut self, record: &MutationRecord) -> Result<(), StorageError>;

    fn remove(&mut self, id: &MutationId) -> Result<(), StorageError>;

    /// Remove several records in one atomic step; returns how many existed.
    fn remove_many(&mut self, ids: &[MutationId]) -> Result<usize, StorageError>;

    /// Insert `record` and remove `ids` in one atomic step; returns how many removed records existed.
    fn append_and_remove(
        &mut self,
        record: &MutationRecord,
        ids: &[MutationId],
    ) -> Result<usize, StorageError>;
}

/// Volatile store for tests and hosts without durable storage.
///
/// An optional record quota simulates a medium that refuses writes.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    records: BTreeMap<MutationId, MutationRecord>,
    quota: Option<usize>,
    corrupted: Arc<AtomicBool>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse appends once `quota` records are stored.
    #[must_use]
    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Switch that makes every operation fail with [`StorageError::Corruption`].
    pub fn corruption_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.corrupted)
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.corrupted.load(Ordering::SeqCst) {
            Err(StorageError::Corruption(
                "in-memory store marked corrupted".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl QueueStore for MemoryQueueStore {
    fn append(&mut self, record: &MutationRecord) -> Result<(), StorageError> {
        self.check()?;
        if self.quota.is_some_and(|quota| self.records.len() >= quota) {
            return Err(StorageError::QuotaExceeded);
        }
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    fn get(&self, id: &MutationId) -> Result<Option<MutationRecord>, StorageError> {
        self.check()?;
        Ok(self.records.get(id).cloned())
    }

    fn load_all(&self) -> Result<Vec<MutationRecord>, StorageError> {
        self.check()?;
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    fn update(&mut self, id: &MutationId, change: &StatusChange) -> Result<(), StorageError> {
        self.check()?;
        let record = self
            .records
            .get_mut(id)
            .ok_or(StorageError::NotFound(*id))?;
        record.status = change.status;
        record.retry_count = change.retry_count;
        record.last_error.clone_from(&change.last_error);
        record.next_attempt_at = change.next_attempt_at;
        Ok(())
    }

    fn replace(&mut self, record: &MutationRecord) -> Result<(), StorageError> {
        self.check()?;
        if !self.records.contains_key(&record.id) {
            return Err(StorageError::NotFound(record.id));
        }
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    fn remove(&mut self, id: &MutationId) -> Result<(), StorageError> {
        self.check()?;
        self.records
            .remove(id)
            .map(|_| ())
            .ok_or(StorageError::NotFound(*id))
    }

    fn remove_many(&mut self, ids: &[MutationId]) -> Result<usize, StorageError> {
        self.check()?;
        Ok(ids
            .iter()
            .filter(|id| self.records.remove(id).is_some())
            .count())
    }

    fn append_and_remove(
        &mut self,
        record: &MutationRecord,
        ids: &[MutationId],
    ) -> Result<usize, StorageError> {
        self.check()?;
        let freed = ids.iter().filter(|id| self.records.contains_key(id)).count();
        if self
            .quota
            .is_some_and(|quota| self.records.len() - freed >= quota)
        {
            return Err(StorageError::QuotaExceeded);
        }
        let removed = self.remove_many(ids)?;
        self.records.insert(record.id, record.clone());
        Ok(removed)
    }
}
