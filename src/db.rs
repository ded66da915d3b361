use crate::domain::*;
use crate::error::{PipelineError, Result};
use crate::storage::{PromotionBatch, Storage};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const MIGRATION: &str = include_str!("../migrations/001_create_concert_tables.sql");

const EVENT_COLUMNS: &str =
    "title, date, url, source, source_url, time_from, time_to, city, venue, type, description";

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

/// SQLite-backed store for the pipeline tables.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("Opening concert database at {}", db_path.display());
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(MIGRATION)?;
        debug!("Database schema is up to date");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::IllegalState("database mutex poisoned".to_string()))
    }
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveTime>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| NaiveTime::parse_from_str(&s, TIME_FORMAT).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Reads the `EVENT_COLUMNS` block starting at `offset`.
fn record_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<EventRecord> {
    let date: String = row.get(offset + 1)?;
    Ok(EventRecord {
        title: row.get(offset)?,
        date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .map_err(|e| conversion_error(offset + 1, e))?,
        url: row.get(offset + 2)?,
        source: row.get(offset + 3)?,
        source_url: row.get(offset + 4)?,
        time_from: parse_time(row, offset + 5)?,
        time_to: parse_time(row, offset + 6)?,
        city: row.get(offset + 7)?,
        venue: row.get(offset + 8)?,
        event_type: row.get(offset + 9)?,
        description: row.get(offset + 10)?,
    })
}

fn candidate_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, EventRecord, (bool, bool, bool))> {
    Ok((
        row.get(0)?,
        record_from_row(row, 1)?,
        (row.get(12)?, row.get(13)?, row.get(14)?),
    ))
}

fn concert_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, EventRecord, String, bool)> {
    Ok((row.get(0)?, record_from_row(row, 1)?, row.get(12)?, row.get(13)?))
}

fn into_candidate(raw: (i64, EventRecord, (bool, bool, bool))) -> Result<CandidateEvent> {
    let (id, record, (analyzed, classical, added)) = raw;
    Ok(CandidateEvent {
        id,
        record,
        status: CandidateStatus::from_flags(analyzed, classical, added)?,
    })
}

fn into_concert(raw: (i64, EventRecord, String, bool)) -> Result<CanonicalConcert> {
    let (id, record, composers, filled) = raw;
    let composers: Vec<String> = serde_json::from_str(&composers)?;
    Ok(CanonicalConcert {
        id,
        record,
        details: ComposerDetails::from_flag(filled, composers)?,
    })
}

fn insert_record(conn: &Connection, table: &str, record: &EventRecord) -> Result<i64> {
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            table, EVENT_COLUMNS
        ),
        params![
            record.title,
            record.date.format(DATE_FORMAT).to_string(),
            record.url,
            record.source,
            record.source_url,
            record.time_from.map(|t| t.format(TIME_FORMAT).to_string()),
            record.time_to.map(|t| t.format(TIME_FORMAT).to_string()),
            record.city,
            record.venue,
            record.event_type,
            record.description,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn query_candidates(conn: &Connection, filter: &str) -> Result<Vec<CandidateEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, {}, analyzed, is_classical_concert, added FROM potential_event WHERE {} ORDER BY id",
        EVENT_COLUMNS, filter
    ))?;
    let rows = stmt.query_map([], candidate_from_row)?;
    let candidates = rows
        .map(|raw| into_candidate(raw?))
        .collect::<Result<Vec<_>>>()?;
    Ok(candidates)
}

fn query_concerts(conn: &Connection, filter: &str) -> Result<Vec<CanonicalConcert>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, {}, composers, is_concert_details_filled FROM classical_concert WHERE {} ORDER BY id",
        EVENT_COLUMNS, filter
    ))?;
    let rows = stmt.query_map([], concert_from_row)?;
    let concerts = rows
        .map(|raw| into_concert(raw?))
        .collect::<Result<Vec<_>>>()?;
    Ok(concerts)
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn exists(&self, target: Target, key: &DedupKey) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                &format!(
                    "SELECT 1 FROM {} WHERE title = ?1 AND date = ?2 AND url IS ?3 LIMIT 1",
                    target.as_str()
                ),
                params![key.title, key.date.format(DATE_FORMAT).to_string(), key.url],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn insert_candidate(&self, record: &EventRecord) -> Result<i64> {
        let conn = self.conn()?;
        insert_record(&conn, "potential_event", record)
    }

    async fn get_candidate(&self, id: i64) -> Result<Option<CandidateEvent>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT id, {}, analyzed, is_classical_concert, added FROM potential_event WHERE id = ?1",
                    EVENT_COLUMNS
                ),
                params![id],
                candidate_from_row,
            )
            .optional()?;
        raw.map(into_candidate).transpose()
    }

    async fn unclassified_candidates(&self) -> Result<Vec<CandidateEvent>> {
        let conn = self.conn()?;
        query_candidates(&conn, "analyzed = 0")
    }

    async fn record_classification(&self, id: i64, is_classical: bool) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE potential_event SET analyzed = 1, is_classical_concert = ?2 WHERE id = ?1 AND analyzed = 0",
            params![id, is_classical],
        )?;
        if changed != 1 {
            return Err(PipelineError::IllegalState(format!(
                "potential_event {} is missing or already analyzed",
                id
            )));
        }
        Ok(())
    }

    async fn pending_promotions(&self) -> Result<Vec<CandidateEvent>> {
        let conn = self.conn()?;
        query_candidates(&conn, "is_classical_concert = 1 AND added = 0")
    }

    async fn commit_promotions(&self, batch: &PromotionBatch) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for record in &batch.inserts {
            insert_record(&tx, "classical_concert", record)?;
        }
        for id in &batch.watermarks {
            let changed = tx.execute(
                "UPDATE potential_event SET added = 1 WHERE id = ?1 AND is_classical_concert = 1",
                params![id],
            )?;
            if changed != 1 {
                // Dropping the transaction rolls back the whole batch
                return Err(PipelineError::IllegalState(format!(
                    "potential_event {} is not classified as classical",
                    id
                )));
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn insert_concert(&self, record: &EventRecord) -> Result<i64> {
        let conn = self.conn()?;
        insert_record(&conn, "classical_concert", record)
    }

    async fn insert_detailed_concert(&self, record: &EventRecord, composers: &[String]) -> Result<i64> {
        let encoded = serde_json::to_string(composers)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = insert_record(&tx, "classical_concert", record)?;
        tx.execute(
            "UPDATE classical_concert SET composers = ?2, is_concert_details_filled = 1 WHERE id = ?1",
            params![id, encoded],
        )?;
        tx.commit()?;
        Ok(id)
    }

    async fn get_concert(&self, id: i64) -> Result<Option<CanonicalConcert>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT id, {}, composers, is_concert_details_filled FROM classical_concert WHERE id = ?1",
                    EVENT_COLUMNS
                ),
                params![id],
                concert_from_row,
            )
            .optional()?;
        raw.map(into_concert).transpose()
    }

    async fn count_concerts(&self, key: &DedupKey) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM classical_concert WHERE title = ?1 AND date = ?2 AND url IS ?3",
            params![key.title, key.date.format(DATE_FORMAT).to_string(), key.url],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn undetailed_concerts(&self) -> Result<Vec<CanonicalConcert>> {
        let conn = self.conn()?;
        query_concerts(&conn, "is_concert_details_filled = 0 AND description IS NOT NULL")
    }

    async fn record_composers(&self, concert_id: i64, composers: &[String]) -> Result<()> {
        let conn = self.conn()?;
        let encoded = serde_json::to_string(composers)?;
        let changed = conn.execute(
            "UPDATE classical_concert SET composers = ?2, is_concert_details_filled = 1 WHERE id = ?1 AND is_concert_details_filled = 0",
            params![concert_id, encoded],
        )?;
        if changed != 1 {
            return Err(PipelineError::IllegalState(format!(
                "classical_concert {} is missing or already detailed",
                concert_id
            )));
        }
        Ok(())
    }

    async fn unlinked_concerts(&self) -> Result<Vec<CanonicalConcert>> {
        let conn = self.conn()?;
        query_concerts(
            &conn,
            "json_array_length(composers) > 0 AND id NOT IN (SELECT classical_concert_id FROM classical_concert_composer)",
        )
    }

    async fn find_composer_by_name(&self, name: &str) -> Result<Option<Composer>> {
        let conn = self.conn()?;
        let composer = conn
            .query_row(
                "SELECT id, name FROM composer WHERE name = ?1 ORDER BY id LIMIT 1",
                params![name],
                |row| {
                    Ok(Composer {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(composer)
    }

    async fn list_composers(&self) -> Result<Vec<Composer>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM composer ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Composer {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        let composers = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(composers)
    }

    async fn create_composer(&self, name: &str) -> Result<Composer> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO composer (name) VALUES (?1)", params![name])?;
        Ok(Composer {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    async fn link_composers(&self, links: &[(i64, i64)]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut created = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO classical_concert_composer (classical_concert_id, composer_id) VALUES (?1, ?2)",
            )?;
            for (concert_id, composer_id) in links {
                created += stmt.execute(params![concert_id, composer_id])?;
            }
        }
        tx.commit()?;
        Ok(created)
    }

    async fn composers_for_concert(&self, concert_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT composer_id FROM classical_concert_composer WHERE classical_concert_id = ?1 ORDER BY composer_id",
        )?;
        let rows = stmt.query_map(params![concert_id], |row| row.get(0))?;
        let composer_ids = rows.collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(composer_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, url: Option<&str>) -> EventRecord {
        let mut record =
            EventRecord::new(title, NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(), url);
        record.time_from = NaiveTime::from_hms_opt(19, 30, 0);
        record.city = Some("Bratislava".to_string());
        record
    }

    #[tokio::test]
    async fn stores_and_reads_back_candidates() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let id = storage.insert_candidate(&record("Messiah", Some("u1"))).await.unwrap();

        let candidate = storage.get_candidate(id).await.unwrap().unwrap();
        assert_eq!(candidate.record, record("Messiah", Some("u1")));
        assert_eq!(candidate.status, CandidateStatus::Unclassified);
        assert_eq!(storage.unclassified_candidates().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn detailed_concert_is_stored_filled_and_unlinked() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let names = vec!["Johann Sebastian Bach".to_string()];
        let id = storage
            .insert_detailed_concert(&record("Goldberg", Some("u1")), &names)
            .await
            .unwrap();

        let concert = storage.get_concert(id).await.unwrap().unwrap();
        assert_eq!(concert.details, ComposerDetails::Filled(names));
        assert!(storage.undetailed_concerts().await.unwrap().is_empty());
        let unlinked = storage.unlinked_concerts().await.unwrap();
        assert_eq!(unlinked.iter().map(|c| c.id).collect::<Vec<_>>(), vec![id]);
    }

    #[tokio::test]
    async fn null_urls_match_each_other_in_dedup() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.insert_concert(&record("Requiem", None)).await.unwrap();

        assert!(storage.exists(Target::Canonical, &record("Requiem", None).key()).await.unwrap());
        assert!(!storage
            .exists(Target::Canonical, &record("Requiem", Some("u2")).key())
            .await
            .unwrap());
        assert!(!storage.exists(Target::Candidate, &record("Requiem", None).key()).await.unwrap());
    }

    #[tokio::test]
    async fn failed_promotion_batch_rolls_back() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let negative = storage.insert_candidate(&record("Talk", Some("u1"))).await.unwrap();
        storage.record_classification(negative, false).await.unwrap();

        let batch = PromotionBatch {
            inserts: vec![record("Talk", Some("u1"))],
            watermarks: vec![negative],
        };
        assert!(storage.commit_promotions(&batch).await.is_err());
        assert_eq!(storage.count_concerts(&record("Talk", Some("u1")).key()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn watermark_reset_is_refused_by_the_schema() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let id = storage.insert_candidate(&record("Gala", Some("u1"))).await.unwrap();
        storage.record_classification(id, true).await.unwrap();

        let conn = storage.conn().unwrap();
        let reset = conn.execute("UPDATE potential_event SET analyzed = 0 WHERE id = ?1", params![id]);
        assert!(reset.is_err());
    }

    #[tokio::test]
    async fn composers_round_trip_and_unlinked_selection() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let detailed = storage
            .insert_concert(&record("Bach night", Some("u1")).with_description("Goldberg"))
            .await
            .unwrap();
        let empty = storage
            .insert_concert(&record("Jazz", Some("u2")).with_description("no composers"))
            .await
            .unwrap();
        storage.insert_concert(&record("No text", Some("u3"))).await.unwrap();

        assert_eq!(storage.undetailed_concerts().await.unwrap().len(), 2);

        let names = vec!["Johann Sebastian Bach".to_string()];
        storage.record_composers(detailed, &names).await.unwrap();
        storage.record_composers(empty, &[]).await.unwrap();
        assert!(storage.record_composers(detailed, &names).await.is_err());

        let unlinked = storage.unlinked_concerts().await.unwrap();
        assert_eq!(unlinked.len(), 1);
        assert_eq!(unlinked[0].details.composers(), names.as_slice());

        let bach = storage.create_composer("Johann Sebastian Bach").await.unwrap();
        assert_eq!(storage.link_composers(&[(detailed, bach.id)]).await.unwrap(), 1);
        assert_eq!(storage.link_composers(&[(detailed, bach.id)]).await.unwrap(), 0);
        assert!(storage.unlinked_concerts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn composer_lookup_is_case_sensitive() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.create_composer("Antonín Dvořák").await.unwrap();

        assert!(storage.find_composer_by_name("Antonín Dvořák").await.unwrap().is_some());
        assert!(storage.find_composer_by_name("antonín dvořák").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("concerts.db");
        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.create_composer("Béla Bartók").await.unwrap();
        }
        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.list_composers().await.unwrap().len(), 1);
    }
}
