//! Records flowing through the pipeline and the watermark state machines that
//! replace the raw boolean flags stored in the database.

use crate::error::{PipelineError, Result};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Source fields shared by candidate events and canonical concerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub title: String,
    #[serde(with = "calendar_date")]
    pub date: NaiveDate,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default, with = "hour_minute")]
    pub time_from: Option<NaiveTime>,
    #[serde(default, with = "hour_minute")]
    pub time_to: Option<NaiveTime>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl EventRecord {
    pub fn new(title: impl Into<String>, date: NaiveDate, url: Option<&str>) -> Self {
        Self {
            title: title.into(),
            date,
            url: url.map(str::to_string),
            source: None,
            source_url: None,
            time_from: None,
            time_to: None,
            city: None,
            venue: None,
            event_type: None,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    pub fn key(&self) -> DedupKey {
        DedupKey {
            title: self.title.clone(),
            date: self.date,
            url: self.url.clone(),
        }
    }
}

/// Content key used to detect an already-recorded event. A missing url only
/// matches another missing url.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub title: String,
    pub date: NaiveDate,
    pub url: Option<String>,
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} @ {} ({})",
            self.title,
            self.date,
            self.url.as_deref().unwrap_or("no url")
        )
    }
}

/// Progress of a candidate event through classification and promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateStatus {
    Unclassified,
    NotClassical,
    AwaitingPromotion,
    Added,
}

impl CandidateStatus {
    /// Rebuild the status from the stored `(analyzed, is_classical_concert, added)` flags.
    pub fn from_flags(analyzed: bool, is_classical: bool, added: bool) -> Result<Self> {
        match (analyzed, is_classical, added) {
            (false, false, false) => Ok(Self::Unclassified),
            (true, false, false) => Ok(Self::NotClassical),
            (true, true, false) => Ok(Self::AwaitingPromotion),
            (true, true, true) => Ok(Self::Added),
            other => Err(PipelineError::IllegalState(format!(
                "candidate flags (analyzed, is_classical_concert, added) = {:?}",
                other
            ))),
        }
    }

    pub fn flags(self) -> (bool, bool, bool) {
        match self {
            Self::Unclassified => (false, false, false),
            Self::NotClassical => (true, false, false),
            Self::AwaitingPromotion => (true, true, false),
            Self::Added => (true, true, true),
        }
    }

    pub fn classify(self, is_classical: bool) -> Result<Self> {
        match self {
            Self::Unclassified if is_classical => Ok(Self::AwaitingPromotion),
            Self::Unclassified => Ok(Self::NotClassical),
            other => Err(PipelineError::IllegalState(format!(
                "cannot classify a candidate in state {:?}",
                other
            ))),
        }
    }

    pub fn promote(self) -> Result<Self> {
        match self {
            Self::AwaitingPromotion => Ok(Self::Added),
            other => Err(PipelineError::IllegalState(format!(
                "cannot promote a candidate in state {:?}",
                other
            ))),
        }
    }

    pub fn is_analyzed(self) -> bool {
        self.flags().0
    }

    pub fn is_classical(self) -> bool {
        self.flags().1
    }

    pub fn is_added(self) -> bool {
        self.flags().2
    }
}

/// Raw composer names extracted for a concert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComposerDetails {
    Pending,
    Filled(Vec<String>),
}

impl ComposerDetails {
    pub fn from_flag(filled: bool, composers: Vec<String>) -> Result<Self> {
        match (filled, composers.is_empty()) {
            (true, _) => Ok(Self::Filled(composers)),
            (false, true) => Ok(Self::Pending),
            (false, false) => Err(PipelineError::IllegalState(
                "composers present on a concert whose details are not filled".to_string(),
            )),
        }
    }

    pub fn is_filled(&self) -> bool {
        matches!(self, Self::Filled(_))
    }

    pub fn composers(&self) -> &[String] {
        match self {
            Self::Pending => &[],
            Self::Filled(names) => names,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEvent {
    pub id: i64,
    pub record: EventRecord,
    pub status: CandidateStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalConcert {
    pub id: i64,
    pub record: EventRecord,
    pub details: ComposerDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composer {
    pub id: i64,
    pub name: String,
}

/// Which table an intake or dedup check targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Candidate,
    Canonical,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Candidate => "potential_event",
            Target::Canonical => "classical_concert",
        }
    }
}

/// `YYYY-MM-DD` on the wire; some crawlers send `YYYY/MM/DD`, accepted on input.
pub mod calendar_date {
    use super::*;

    const FORMAT: &str = "%Y-%m-%d";
    const SLASHED: &str = "%Y/%m/%d";

    pub fn parse(value: &str) -> Option<NaiveDate> {
        let value = value.trim();
        NaiveDate::parse_from_str(value, FORMAT)
            .or_else(|_| NaiveDate::parse_from_str(value, SLASHED))
            .ok()
    }

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid date '{}', expected YYYY-MM-DD", raw))
        })
    }
}

/// `HH:MM` on the wire; `HH:MM:SS` is accepted on input.
pub mod hour_minute {
    use super::*;

    const FORMAT: &str = "%H:%M";

    pub fn parse(value: &str) -> Option<NaiveTime> {
        let value = value.trim();
        NaiveTime::parse_from_str(value, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
            .ok()
    }

    pub fn format(time: &NaiveTime) -> String {
        time.format(FORMAT).to_string()
    }

    pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, s: S) -> std::result::Result<S::Ok, S::Error> {
        match time {
            Some(t) => s.serialize_some(&format(t)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => parse(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid time '{}', expected HH:MM", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidate_flags_round_trip_through_states() {
        for status in [
            CandidateStatus::Unclassified,
            CandidateStatus::NotClassical,
            CandidateStatus::AwaitingPromotion,
            CandidateStatus::Added,
        ] {
            let (a, c, d) = status.flags();
            assert_eq!(CandidateStatus::from_flags(a, c, d).unwrap(), status);
        }
    }

    #[test]
    fn illegal_flag_combinations_are_rejected() {
        assert!(CandidateStatus::from_flags(false, false, true).is_err());
        assert!(CandidateStatus::from_flags(false, true, false).is_err());
        assert!(CandidateStatus::from_flags(true, false, true).is_err());
    }

    #[test]
    fn watermarks_only_move_forward() {
        let classified = CandidateStatus::Unclassified.classify(true).unwrap();
        assert_eq!(classified, CandidateStatus::AwaitingPromotion);
        assert!(classified.classify(false).is_err());

        let added = classified.promote().unwrap();
        assert!(added.is_analyzed() && added.is_added());
        assert!(added.promote().is_err());
        assert!(CandidateStatus::NotClassical.promote().is_err());
    }

    #[test]
    fn composer_details_reject_names_without_flag() {
        assert_eq!(
            ComposerDetails::from_flag(false, vec![]).unwrap(),
            ComposerDetails::Pending
        );
        assert!(ComposerDetails::from_flag(false, vec!["Bach".into()]).is_err());
        assert!(ComposerDetails::from_flag(true, vec![]).unwrap().is_filled());
    }

    #[test]
    fn parses_flat_scraper_record() {
        let record: EventRecord = serde_json::from_value(json!({
            "title": "Beethoven Symphony No.9",
            "date": "2025-05-01",
            "url": "u1",
            "time_from": "19:00",
            "time_to": null,
            "type": "koncert",
            "city": "Bratislava",
            "ignored_field": 3
        }))
        .unwrap();

        assert_eq!(record.date, NaiveDate::from_ymd_opt(2025, 5, 1).unwrap());
        assert_eq!(record.time_from, NaiveTime::from_hms_opt(19, 0, 0));
        assert_eq!(record.time_to, None);
        assert_eq!(record.event_type.as_deref(), Some("koncert"));

        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["time_from"], "19:00");
        assert_eq!(out["type"], "koncert");
    }

    #[test]
    fn accepts_slashed_dates_and_writes_dashes() {
        let record: EventRecord = serde_json::from_value(json!({
            "title": "Vianočný koncert",
            "date": "2025/12/21"
        }))
        .unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2025, 12, 21).unwrap());
        assert_eq!(serde_json::to_value(&record).unwrap()["date"], "2025-12-21");

        for bad in ["21.12.2025", "2025-13-01", "tomorrow"] {
            let result: std::result::Result<EventRecord, _> =
                serde_json::from_value(json!({ "title": "x", "date": bad }));
            assert!(result.is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn rejects_malformed_time() {
        let result: std::result::Result<EventRecord, _> = serde_json::from_value(json!({
            "title": "x",
            "date": "2025-05-01",
            "time_from": "seven pm"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn dedup_key_distinguishes_missing_url() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        let with_url = EventRecord::new("A", date, Some("u1")).key();
        let without_url = EventRecord::new("A", date, None).key();
        assert_ne!(with_url, without_url);
        assert_eq!(without_url, EventRecord::new("A", date, None).key());
    }
}
