use crate::domain::*;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tracing::debug;

/// One promotion batch: the candidates to watermark and the concerts to insert.
#[derive(Debug, Clone, Default)]
pub struct PromotionBatch {
    pub inserts: Vec<EventRecord>,
    pub watermarks: Vec<i64>,
}

/// Storage trait for the four pipeline tables.
///
/// Every method is atomic on its own. `commit_promotions` and `link_composers`
/// apply their whole input in a single transaction. `commit_promotions` accepts
/// candidates that are already added and leaves them added.
#[async_trait]
pub trait Storage: Send + Sync {
    // Dedup predicate shared by intake and promotion
    async fn exists(&self, target: Target, key: &DedupKey) -> Result<bool>;

    // Candidate operations
    async fn insert_candidate(&self, record: &EventRecord) -> Result<i64>;
    async fn get_candidate(&self, id: i64) -> Result<Option<CandidateEvent>>;
    async fn unclassified_candidates(&self) -> Result<Vec<CandidateEvent>>;
    async fn record_classification(&self, id: i64, is_classical: bool) -> Result<()>;
    async fn pending_promotions(&self) -> Result<Vec<CandidateEvent>>;
    async fn commit_promotions(&self, batch: &PromotionBatch) -> Result<()>;

    // Concert operations
    async fn insert_concert(&self, record: &EventRecord) -> Result<i64>;
    /// Inserts a concert whose composer list the scraper already knows, with the
    /// details watermark set in the same write.
    async fn insert_detailed_concert(&self, record: &EventRecord, composers: &[String]) -> Result<i64>;
    async fn get_concert(&self, id: i64) -> Result<Option<CanonicalConcert>>;
    async fn count_concerts(&self, key: &DedupKey) -> Result<usize>;
    async fn undetailed_concerts(&self) -> Result<Vec<CanonicalConcert>>;
    async fn record_composers(&self, concert_id: i64, composers: &[String]) -> Result<()>;
    async fn unlinked_concerts(&self) -> Result<Vec<CanonicalConcert>>;

    // Composer operations
    async fn find_composer_by_name(&self, name: &str) -> Result<Option<Composer>>;
    async fn list_composers(&self) -> Result<Vec<Composer>>;
    async fn create_composer(&self, name: &str) -> Result<Composer>;
    /// Inserts `(concert_id, composer_id)` pairs, ignoring pairs that already exist.
    /// Returns the number of new links.
    async fn link_composers(&self, links: &[(i64, i64)]) -> Result<usize>;
    async fn composers_for_concert(&self, concert_id: i64) -> Result<Vec<i64>>;
}

#[derive(Default)]
struct Tables {
    candidates: BTreeMap<i64, CandidateEvent>,
    concerts: BTreeMap<i64, CanonicalConcert>,
    composers: BTreeMap<i64, Composer>,
    links: BTreeSet<(i64, i64)>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory storage implementation for development/testing
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a composer with a fixed id, for seeding fixtures.
    pub fn seed_composer(&self, id: i64, name: &str) -> Result<()> {
        let mut tables = self.lock()?;
        tables.composers.insert(id, Composer { id, name: name.to_string() });
        tables.next_id = tables.next_id.max(id);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| PipelineError::IllegalState("storage mutex poisoned".to_string()))
    }
}

fn missing(table: &str, id: i64) -> PipelineError {
    PipelineError::IllegalState(format!("{} row {} does not exist", table, id))
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn exists(&self, target: Target, key: &DedupKey) -> Result<bool> {
        let tables = self.lock()?;
        let found = match target {
            Target::Candidate => tables.candidates.values().any(|c| &c.record.key() == key),
            Target::Canonical => tables.concerts.values().any(|c| &c.record.key() == key),
        };
        Ok(found)
    }

    async fn insert_candidate(&self, record: &EventRecord) -> Result<i64> {
        let mut tables = self.lock()?;
        let id = tables.next_id();
        tables.candidates.insert(
            id,
            CandidateEvent {
                id,
                record: record.clone(),
                status: CandidateStatus::Unclassified,
            },
        );
        debug!("Created candidate: {} with id {}", record.title, id);
        Ok(id)
    }

    async fn get_candidate(&self, id: i64) -> Result<Option<CandidateEvent>> {
        Ok(self.lock()?.candidates.get(&id).cloned())
    }

    async fn unclassified_candidates(&self) -> Result<Vec<CandidateEvent>> {
        let tables = self.lock()?;
        Ok(tables
            .candidates
            .values()
            .filter(|c| c.status == CandidateStatus::Unclassified)
            .cloned()
            .collect())
    }

    async fn record_classification(&self, id: i64, is_classical: bool) -> Result<()> {
        let mut tables = self.lock()?;
        let candidate = tables
            .candidates
            .get_mut(&id)
            .ok_or_else(|| missing("potential_event", id))?;
        candidate.status = candidate.status.classify(is_classical)?;
        Ok(())
    }

    async fn pending_promotions(&self) -> Result<Vec<CandidateEvent>> {
        let tables = self.lock()?;
        Ok(tables
            .candidates
            .values()
            .filter(|c| c.status == CandidateStatus::AwaitingPromotion)
            .cloned()
            .collect())
    }

    async fn commit_promotions(&self, batch: &PromotionBatch) -> Result<()> {
        let mut tables = self.lock()?;

        // Validate everything before touching any row so the batch applies all-or-nothing
        let mut promoted = Vec::with_capacity(batch.watermarks.len());
        for id in &batch.watermarks {
            let candidate = tables
                .candidates
                .get(id)
                .ok_or_else(|| missing("potential_event", *id))?;
            let status = match candidate.status {
                CandidateStatus::Added => CandidateStatus::Added,
                other => other.promote()?,
            };
            promoted.push((*id, status));
        }

        for record in &batch.inserts {
            let id = tables.next_id();
            tables.concerts.insert(
                id,
                CanonicalConcert {
                    id,
                    record: record.clone(),
                    details: ComposerDetails::Pending,
                },
            );
        }
        for (id, status) in promoted {
            if let Some(candidate) = tables.candidates.get_mut(&id) {
                candidate.status = status;
            }
        }
        Ok(())
    }

    async fn insert_concert(&self, record: &EventRecord) -> Result<i64> {
        let mut tables = self.lock()?;
        let id = tables.next_id();
        tables.concerts.insert(
            id,
            CanonicalConcert {
                id,
                record: record.clone(),
                details: ComposerDetails::Pending,
            },
        );
        debug!("Created concert: {} with id {}", record.title, id);
        Ok(id)
    }

    async fn insert_detailed_concert(&self, record: &EventRecord, composers: &[String]) -> Result<i64> {
        let mut tables = self.lock()?;
        let id = tables.next_id();
        tables.concerts.insert(
            id,
            CanonicalConcert {
                id,
                record: record.clone(),
                details: ComposerDetails::Filled(composers.to_vec()),
            },
        );
        debug!("Created concert: {} with id {} and {} composers", record.title, id, composers.len());
        Ok(id)
    }

    async fn get_concert(&self, id: i64) -> Result<Option<CanonicalConcert>> {
        Ok(self.lock()?.concerts.get(&id).cloned())
    }

    async fn count_concerts(&self, key: &DedupKey) -> Result<usize> {
        let tables = self.lock()?;
        Ok(tables
            .concerts
            .values()
            .filter(|c| &c.record.key() == key)
            .count())
    }

    async fn undetailed_concerts(&self) -> Result<Vec<CanonicalConcert>> {
        let tables = self.lock()?;
        Ok(tables
            .concerts
            .values()
            .filter(|c| !c.details.is_filled() && c.record.description.is_some())
            .cloned()
            .collect())
    }

    async fn record_composers(&self, concert_id: i64, composers: &[String]) -> Result<()> {
        let mut tables = self.lock()?;
        let concert = tables
            .concerts
            .get_mut(&concert_id)
            .ok_or_else(|| missing("classical_concert", concert_id))?;
        if concert.details.is_filled() {
            return Err(PipelineError::IllegalState(format!(
                "composers already recorded for concert {}",
                concert_id
            )));
        }
        concert.details = ComposerDetails::Filled(composers.to_vec());
        Ok(())
    }

    async fn unlinked_concerts(&self) -> Result<Vec<CanonicalConcert>> {
        let tables = self.lock()?;
        let linked: BTreeSet<i64> = tables.links.iter().map(|(concert, _)| *concert).collect();
        Ok(tables
            .concerts
            .values()
            .filter(|c| !c.details.composers().is_empty() && !linked.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn find_composer_by_name(&self, name: &str) -> Result<Option<Composer>> {
        let tables = self.lock()?;
        Ok(tables.composers.values().find(|c| c.name == name).cloned())
    }

    async fn list_composers(&self) -> Result<Vec<Composer>> {
        Ok(self.lock()?.composers.values().cloned().collect())
    }

    async fn create_composer(&self, name: &str) -> Result<Composer> {
        let mut tables = self.lock()?;
        let id = tables.next_id();
        let composer = Composer { id, name: name.to_string() };
        tables.composers.insert(id, composer.clone());
        debug!("Created composer: {} with id {}", name, id);
        Ok(composer)
    }

    async fn link_composers(&self, links: &[(i64, i64)]) -> Result<usize> {
        let mut tables = self.lock()?;
        for (concert_id, composer_id) in links {
            if !tables.concerts.contains_key(concert_id) {
                return Err(missing("classical_concert", *concert_id));
            }
            if !tables.composers.contains_key(composer_id) {
                return Err(missing("composer", *composer_id));
            }
        }
        let created = links
            .iter()
            .filter(|pair| tables.links.insert(**pair))
            .count();
        Ok(created)
    }

    async fn composers_for_concert(&self, concert_id: i64) -> Result<Vec<i64>> {
        let tables = self.lock()?;
        Ok(tables
            .links
            .iter()
            .filter(|(concert, _)| *concert == concert_id)
            .map(|(_, composer)| *composer)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(title: &str) -> EventRecord {
        EventRecord::new(title, NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(), Some("u1"))
    }

    #[tokio::test]
    async fn promotion_batch_is_all_or_nothing() {
        let storage = InMemoryStorage::new();
        let pending = storage.insert_candidate(&record("a")).await.unwrap();
        storage.record_classification(pending, true).await.unwrap();
        let unclassified = storage.insert_candidate(&record("b")).await.unwrap();

        let batch = PromotionBatch {
            inserts: vec![record("a")],
            watermarks: vec![pending, unclassified],
        };
        assert!(storage.commit_promotions(&batch).await.is_err());

        assert!(!storage.exists(Target::Canonical, &record("a").key()).await.unwrap());
        let candidate = storage.get_candidate(pending).await.unwrap().unwrap();
        assert_eq!(candidate.status, CandidateStatus::AwaitingPromotion);
    }

    #[tokio::test]
    async fn classification_cannot_be_rewritten() {
        let storage = InMemoryStorage::new();
        let id = storage.insert_candidate(&record("a")).await.unwrap();
        storage.record_classification(id, false).await.unwrap();
        assert!(storage.record_classification(id, true).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_links_are_ignored() {
        let storage = InMemoryStorage::new();
        let concert = storage.insert_concert(&record("a")).await.unwrap();
        let composer = storage.create_composer("Bach").await.unwrap();

        assert_eq!(storage.link_composers(&[(concert, composer.id)]).await.unwrap(), 1);
        assert_eq!(storage.link_composers(&[(concert, composer.id)]).await.unwrap(), 0);
        assert_eq!(storage.composers_for_concert(concert).await.unwrap(), vec![composer.id]);
    }
}
