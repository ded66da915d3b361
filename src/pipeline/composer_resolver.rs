//! Turns raw composer strings into composer identities.
//!
//! Each distinct raw name in the batch is resolved once, in this order:
//! exact stored name, then fuzzy candidates arbitrated by the oracle, then a new
//! composer row. An unresolved name becomes a new composer rather than risking a
//! wrong merge.

use super::{PipelineContext, StageFailure};
use crate::constants::LABEL_NONE;
use crate::domain::CanonicalConcert;
use crate::error::{PipelineError, Result};
use crate::metrics;
use crate::oracle::{prompts, Choice};
use crate::similarity;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Exact(i64),
    Arbitrated(i64),
    Created(i64),
}

impl Resolution {
    pub fn composer_id(self) -> i64 {
        match self {
            Resolution::Exact(id) | Resolution::Arbitrated(id) | Resolution::Created(id) => id,
        }
    }

    fn method(self) -> &'static str {
        match self {
            Resolution::Exact(_) => "exact",
            Resolution::Arbitrated(_) => "arbitrated",
            Resolution::Created(_) => "created",
        }
    }
}

enum NameOutcome {
    Resolved(Resolution),
    OracleFailed(PipelineError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub names: usize,
    pub exact: usize,
    pub arbitrated: usize,
    pub created: usize,
    pub links_created: usize,
    pub failure: Option<StageFailure>,
}

/// Raw names with the concerts mentioning them, most mentioned first.
/// Ties keep first-appearance order.
pub fn group_by_name(concerts: &[CanonicalConcert]) -> Vec<(String, Vec<i64>)> {
    let mut groups: Vec<(String, Vec<i64>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for concert in concerts {
        for name in concert.details.composers() {
            let slot = *index.entry(name.as_str()).or_insert_with(|| {
                groups.push((name.clone(), Vec::new()));
                groups.len() - 1
            });
            let ids = &mut groups[slot].1;
            if !ids.contains(&concert.id) {
                ids.push(concert.id);
            }
        }
    }

    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    groups
}

/// Interpret an arbitration answer. Only an id from `candidates` counts.
pub fn arbitrated_id(choice: &Choice, candidates: &BTreeMap<i64, String>) -> Option<i64> {
    let label = choice.label()?;
    if label == LABEL_NONE {
        return None;
    }
    let id = label.parse::<i64>().ok()?;
    candidates.contains_key(&id).then_some(id)
}

pub struct ComposerResolver {
    ctx: PipelineContext,
}

impl ComposerResolver {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Resolve every raw name of the unlinked concerts, then write all links in one
    /// transaction. When the oracle fails mid-batch, only concerts whose names were
    /// all resolved get linked; the rest stay unlinked for the next run.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<ResolutionReport> {
        let concerts = self.ctx.storage.unlinked_concerts().await?;
        let groups = group_by_name(&concerts);
        info!(
            "Found {} unlinked concerts with {} distinct composer names",
            concerts.len(),
            groups.len()
        );

        let mut report = ResolutionReport::default();
        let mut resolved: HashMap<String, i64> = HashMap::new();

        for (name, concert_ids) in &groups {
            let resolution = match self.resolve_name(name).await? {
                NameOutcome::Resolved(resolution) => resolution,
                NameOutcome::OracleFailed(e) => {
                    report.failure = Some(StageFailure::from_oracle("composer_resolver", &e));
                    break;
                }
            };

            match resolution {
                Resolution::Exact(_) => report.exact += 1,
                Resolution::Arbitrated(_) => report.arbitrated += 1,
                Resolution::Created(_) => report.created += 1,
            }
            report.names += 1;
            metrics::record_resolution(resolution.method());
            debug!(
                composer_id = resolution.composer_id(),
                method = resolution.method(),
                concerts = concert_ids.len(),
                "Resolved composer {}",
                name
            );
            resolved.insert(name.clone(), resolution.composer_id());
        }

        let links: Vec<(i64, i64)> = concerts
            .iter()
            .filter_map(|concert| {
                let names = concert.details.composers();
                let ids: Option<Vec<i64>> = names.iter().map(|n| resolved.get(n).copied()).collect();
                ids.map(|ids| ids.into_iter().map(|composer| (concert.id, composer)).collect::<Vec<_>>())
            })
            .flatten()
            .collect();

        if !links.is_empty() {
            report.links_created = self.ctx.storage.link_composers(&links).await?;
        }

        info!(
            names = report.names,
            exact = report.exact,
            arbitrated = report.arbitrated,
            created = report.created,
            links = report.links_created,
            "Composer resolution finished"
        );
        Ok(report)
    }

    /// Exact match, then fuzzy candidates plus arbitration, then a new composer.
    /// Store errors are returned as `Err`; an oracle error ends resolution of this name.
    async fn resolve_name(&self, name: &str) -> Result<NameOutcome> {
        let storage = &self.ctx.storage;

        if let Some(composer) = storage.find_composer_by_name(name).await? {
            debug!("Composer {} found with id {}", name, composer.id);
            return Ok(NameOutcome::Resolved(Resolution::Exact(composer.id)));
        }

        let composers = storage.list_composers().await?;
        let candidates = similarity::candidates(name, &composers, self.ctx.similarity_threshold);

        if !candidates.is_empty() {
            debug!(?candidates, "Similar composers found for {}", name);
            let mut allowed: Vec<String> = candidates.keys().map(|id| id.to_string()).collect();
            allowed.push(LABEL_NONE.to_string());

            let prompt = prompts::arbitrate_composer(name, &candidates, LABEL_NONE);
            let choice = match self.ctx.oracle.choose_one(&prompt, &allowed).await {
                Ok(choice) => choice,
                Err(e) => return Ok(NameOutcome::OracleFailed(e)),
            };

            if let Some(id) = arbitrated_id(&choice, &candidates) {
                return Ok(NameOutcome::Resolved(Resolution::Arbitrated(id)));
            }
            debug!(?choice, "No confident match for {}, inserting as new composer", name);
        }

        let composer = storage.create_composer(name).await?;
        info!("Created new composer: {} ({})", composer.name, composer.id);
        Ok(NameOutcome::Resolved(Resolution::Created(composer.id)))
    }
}
