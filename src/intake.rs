//! Intake operations used by scrapers: upload-concerts and upload-potential-concerts.

use crate::dedup::Deduplicator;
use crate::domain::{EventRecord, Target};
use crate::error::{PipelineError, Result};
use crate::metrics;
use crate::pipeline::composer_extractor::clean_names;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntakeReport {
    pub inserted: usize,
    pub skipped: usize,
}

impl IntakeReport {
    pub fn as_tuple(&self) -> (usize, usize) {
        (self.inserted, self.skipped)
    }
}

/// One uploaded record. Concert crawlers may send the composer names they scraped;
/// candidate uploads ignore them.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingRecord {
    #[serde(flatten)]
    pub record: EventRecord,
    #[serde(default)]
    pub composers: Option<Vec<String>>,
}

impl IncomingRecord {
    fn composer_names(&self) -> Vec<String> {
        clean_names(self.composers.clone().unwrap_or_default())
    }
}

/// Parse flat field-name -> value records. The first malformed record rejects the upload.
pub fn parse_records(values: Vec<Value>) -> Result<Vec<IncomingRecord>> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let incoming: IncomingRecord = serde_json::from_value(value).map_err(|e| {
                PipelineError::InvalidRecord {
                    index,
                    message: e.to_string(),
                }
            })?;
            if incoming.record.title.trim().is_empty() {
                return Err(PipelineError::InvalidRecord {
                    index,
                    message: "title is empty".to_string(),
                });
            }
            Ok(incoming)
        })
        .collect()
}

/// Insert records the target table does not already hold under (title, date, url).
#[instrument(skip(storage, records), fields(records = records.len()))]
pub async fn upload(storage: &dyn Storage, target: Target, records: &[IncomingRecord]) -> Result<IntakeReport> {
    let mut dedup = Deduplicator::new(storage, target);
    let mut report = IntakeReport::default();

    for incoming in records {
        let record = &incoming.record;
        if !dedup.admit(&record.key()).await? {
            report.skipped += 1;
            continue;
        }
        let composers = incoming.composer_names();
        match target {
            Target::Candidate => storage.insert_candidate(record).await?,
            Target::Canonical if composers.is_empty() => storage.insert_concert(record).await?,
            Target::Canonical => storage.insert_detailed_concert(record, &composers).await?,
        };
        report.inserted += 1;
    }

    metrics::record_intake(target.as_str(), report.inserted as u64, report.skipped as u64);
    info!(
        inserted = report.inserted,
        skipped = report.skipped,
        "Uploaded records to {}",
        target.as_str()
    );
    Ok(report)
}

/// Records the scraper is confident are classical concerts.
pub async fn upload_concerts(storage: &dyn Storage, values: Vec<Value>) -> Result<IntakeReport> {
    let records = parse_records(values)?;
    upload(storage, Target::Canonical, &records).await
}

/// Records that still need classification.
pub async fn upload_potential_concerts(storage: &dyn Storage, values: Vec<Value>) -> Result<IntakeReport> {
    let records = parse_records(values)?;
    upload(storage, Target::Candidate, &records).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ComposerDetails;
    use crate::storage::InMemoryStorage;
    use chrono::NaiveDate;
    use serde_json::json;

    fn concert(title: &str, url: &str) -> Value {
        json!({
            "title": title,
            "date": "2025-05-01",
            "url": url,
            "source": "Slovenská filharmónia",
            "source_url": "http://www.filharmonia.sk",
            "city": "Bratislava",
            "time_from": "19:00"
        })
    }

    #[tokio::test]
    async fn second_upload_skips_everything() {
        let storage = InMemoryStorage::new();
        let batch = vec![concert("Mahler 2", "u1"), concert("Mahler 3", "u2")];

        let first = upload_concerts(&storage, batch.clone()).await.unwrap();
        assert_eq!(first.as_tuple(), (2, 0));

        let second = upload_concerts(&storage, batch).await.unwrap();
        assert_eq!(second.as_tuple(), (0, 2));
    }

    #[tokio::test]
    async fn duplicates_within_one_upload_are_skipped() {
        let storage = InMemoryStorage::new();
        let batch = vec![concert("Mahler 2", "u1"), concert("Mahler 2", "u1")];

        let report = upload_potential_concerts(&storage, batch).await.unwrap();
        assert_eq!(report.as_tuple(), (1, 1));
        assert_eq!(storage.unclassified_candidates().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_record_rejects_whole_upload() {
        let storage = InMemoryStorage::new();
        let batch = vec![concert("ok", "u1"), json!({ "title": "no date" })];

        let err = upload_potential_concerts(&storage, batch).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRecord { index: 1, .. }));
        assert!(storage.unclassified_candidates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slashed_dates_are_stored_as_calendar_dates() {
        let storage = InMemoryStorage::new();
        let batch = vec![json!({ "title": "Adventný koncert", "date": "2025/12/07", "url": "t1" })];

        let report = upload_concerts(&storage, batch).await.unwrap();
        assert_eq!(report.as_tuple(), (1, 0));

        let key = EventRecord::new("Adventný koncert", NaiveDate::from_ymd_opt(2025, 12, 7).unwrap(), Some("t1")).key();
        assert!(storage.exists(Target::Canonical, &key).await.unwrap());
    }

    #[tokio::test]
    async fn scraped_composers_arrive_filled() {
        let storage = InMemoryStorage::new();
        let mut with_names = concert("Organ recital", "k1");
        with_names["composers"] = json!([" Johann Sebastian Bach ", "", "Johann Sebastian Bach"]);
        let mut null_names = concert("Song recital", "k2");
        null_names["composers"] = Value::Null;

        let report = upload_concerts(&storage, vec![with_names, null_names]).await.unwrap();
        assert_eq!(report.as_tuple(), (2, 0));

        let unlinked = storage.unlinked_concerts().await.unwrap();
        assert_eq!(unlinked.len(), 1);
        assert_eq!(unlinked[0].record.title, "Organ recital");
        assert_eq!(
            unlinked[0].details,
            ComposerDetails::Filled(vec!["Johann Sebastian Bach".to_string()])
        );
    }

    #[test]
    fn empty_title_is_rejected() {
        let err = parse_records(vec![json!({ "title": "  ", "date": "2025-01-01" })]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRecord { index: 0, .. }));
    }
}
