use super::{PipelineContext, StageFailure};
use crate::error::Result;
use crate::metrics;
use crate::oracle::{prompts, Extraction};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionReport {
    pub detailed: usize,
    pub composers_found: usize,
    /// Concerts whose oracle answer was not a string list; stored with no composers.
    pub unparseable: usize,
    pub failure: Option<StageFailure>,
}

/// Trim, drop blanks and repeated names. First occurrence wins the position.
pub fn clean_names(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.clone()))
        .collect()
}

/// Fills the raw composer list of concerts that have a description.
/// Names are stored as returned; matching them to composers is the resolver's job.
pub struct ComposerExtractor {
    ctx: PipelineContext,
}

impl ComposerExtractor {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<ExtractionReport> {
        let concerts = self.ctx.storage.undetailed_concerts().await?;
        info!("Found {} concerts without composer details", concerts.len());

        let mut report = ExtractionReport::default();
        for concert in concerts {
            let Some(description) = concert.record.description.as_deref() else {
                continue;
            };
            let prompt = prompts::extract_composers(&concert.record.title, description);

            let names = match self.ctx.oracle.extract_list(&prompt).await {
                Ok(Extraction::Items(names)) => clean_names(names),
                Ok(Extraction::Unparseable(raw)) => {
                    warn!(concert_id = concert.id, "Unparseable composer list {:?}", raw);
                    report.unparseable += 1;
                    Vec::new()
                }
                Err(e) => {
                    report.failure = Some(StageFailure::from_oracle("composer_extractor", &e));
                    break;
                }
            };

            self.ctx.storage.record_composers(concert.id, &names).await?;
            metrics::record_extraction();
            debug!(concert_id = concert.id, ?names, "Analyzed event: {}", concert.record.title);

            report.detailed += 1;
            report.composers_found += names.len();
        }

        info!(
            detailed = report.detailed,
            composers = report.composers_found,
            "Composer extraction finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_whitespace_blanks_and_repeats() {
        let names = vec![
            " Johann Sebastian Bach ".to_string(),
            "".to_string(),
            "Georg Friedrich Händel".to_string(),
            "Johann Sebastian Bach".to_string(),
        ];
        assert_eq!(
            clean_names(names),
            vec!["Johann Sebastian Bach".to_string(), "Georg Friedrich Händel".to_string()]
        );
    }
}
