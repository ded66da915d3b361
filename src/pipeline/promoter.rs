use crate::dedup::Deduplicator;
use crate::domain::{CandidateEvent, Target};
use crate::error::Result;
use crate::metrics;
use crate::storage::{PromotionBatch, Storage};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// Copies classical candidates into the concert table, once per (title, date, url).
///
/// The whole batch commits in one transaction: a crash before the commit loses
/// the batch, and the next run redoes it from the unchanged watermarks.
/// Promotion makes no oracle calls, so it only needs the store.
pub struct Promoter {
    storage: Arc<dyn Storage>,
}

impl Promoter {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<PromotionReport> {
        let pending = self.storage.pending_promotions().await?;
        info!("Found {} classical candidates awaiting promotion", pending.len());
        self.promote(&pending).await
    }

    /// Promote `candidates`. Candidates already added are watermarked again, which is a no-op.
    pub async fn promote(&self, candidates: &[CandidateEvent]) -> Result<PromotionReport> {
        let mut dedup = Deduplicator::new(self.storage.as_ref(), Target::Canonical);
        let mut batch = PromotionBatch::default();
        let mut report = PromotionReport::default();

        for candidate in candidates {
            if dedup.admit(&candidate.record.key()).await? {
                batch.inserts.push(candidate.record.clone());
                report.inserted += 1;
            } else {
                debug!(candidate_id = candidate.id, "Concert already exists: {}", candidate.record.key());
                report.skipped += 1;
            }
            batch.watermarks.push(candidate.id);
        }

        if !batch.watermarks.is_empty() {
            self.storage.commit_promotions(&batch).await?;
        }

        metrics::record_promotion(report.inserted as u64, report.skipped as u64);
        info!(
            inserted = report.inserted,
            skipped = report.skipped,
            "Skipped {} concerts, uploaded {} concerts",
            report.skipped,
            report.inserted
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CandidateStatus, EventRecord};
    use crate::storage::InMemoryStorage;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn promotes_with_only_a_store() {
        let storage = Arc::new(InMemoryStorage::new());
        let record = EventRecord::new("Messiah", NaiveDate::from_ymd_opt(2025, 12, 20).unwrap(), Some("m1"));
        let id = storage.insert_candidate(&record).await.unwrap();
        storage.record_classification(id, true).await.unwrap();

        let report = Promoter::new(storage.clone()).run().await.unwrap();
        assert_eq!((report.inserted, report.skipped), (1, 0));
        let candidate = storage.get_candidate(id).await.unwrap().unwrap();
        assert_eq!(candidate.status, CandidateStatus::Added);
    }
}
