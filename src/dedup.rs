use crate::domain::{DedupKey, Target};
use crate::error::Result;
use crate::storage::Storage;
use std::collections::HashSet;

/// The (title, date, url) existence check used by promotion and both intake paths.
///
/// Keys admitted earlier in the same batch count as existing, so a batch that
/// repeats a record only lets the first copy through.
pub struct Deduplicator<'a> {
    storage: &'a dyn Storage,
    target: Target,
    admitted: HashSet<DedupKey>,
}

impl<'a> Deduplicator<'a> {
    pub fn new(storage: &'a dyn Storage, target: Target) -> Self {
        Self {
            storage,
            target,
            admitted: HashSet::new(),
        }
    }

    /// Returns `true` when `key` is new and reserves it for this batch.
    pub async fn admit(&mut self, key: &DedupKey) -> Result<bool> {
        if self.admitted.contains(key) {
            return Ok(false);
        }
        if self.storage.exists(self.target, key).await? {
            return Ok(false);
        }
        self.admitted.insert(key.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventRecord;
    use crate::storage::InMemoryStorage;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn rejects_stored_and_repeated_keys() {
        let storage = InMemoryStorage::new();
        let date = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        storage
            .insert_concert(&EventRecord::new("stored", date, Some("u1")))
            .await
            .unwrap();

        let mut dedup = Deduplicator::new(&storage, Target::Canonical);
        let fresh = EventRecord::new("fresh", date, Some("u2")).key();

        assert!(!dedup.admit(&EventRecord::new("stored", date, Some("u1")).key()).await.unwrap());
        assert!(dedup.admit(&fresh).await.unwrap());
        assert!(!dedup.admit(&fresh).await.unwrap());
    }

    #[tokio::test]
    async fn targets_are_checked_independently() {
        let storage = InMemoryStorage::new();
        let record = EventRecord::new("x", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), Some("u"));
        storage.insert_candidate(&record).await.unwrap();

        let mut canonical = Deduplicator::new(&storage, Target::Canonical);
        assert!(canonical.admit(&record.key()).await.unwrap());
        let mut candidate = Deduplicator::new(&storage, Target::Candidate);
        assert!(!candidate.admit(&record.key()).await.unwrap());
    }
}
