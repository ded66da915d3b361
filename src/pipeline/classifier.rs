use super::{PipelineContext, StageFailure};
use crate::constants::{LABEL_FALSE, LABEL_TRUE};
use crate::error::Result;
use crate::metrics;
use crate::oracle::{prompts, Choice};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassifierReport {
    pub analyzed: usize,
    pub classical: usize,
    /// Oracle answers outside {"true", "false"}; counted as not classical.
    pub unparseable: usize,
    pub failure: Option<StageFailure>,
}

/// Fail-closed: only the exact label "true" is positive.
pub fn is_positive(choice: &Choice) -> bool {
    choice.label() == Some(LABEL_TRUE)
}

/// Labels every unanalyzed candidate event as classical or not.
pub struct Classifier {
    ctx: PipelineContext,
}

impl Classifier {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<ClassifierReport> {
        let candidates = self.ctx.storage.unclassified_candidates().await?;
        info!("Found {} unanalyzed candidate events", candidates.len());

        let labels = vec![LABEL_TRUE.to_string(), LABEL_FALSE.to_string()];
        let mut report = ClassifierReport::default();

        for candidate in candidates {
            let record = &candidate.record;
            let prompt = prompts::classify_event(
                &record.title,
                record.url.as_deref(),
                record.venue.as_deref(),
                record.description.as_deref(),
            );

            // The row keeps analyzed = false and is retried on the next run
            let choice = match self.ctx.oracle.choose_one(&prompt, &labels).await {
                Ok(choice) => choice,
                Err(e) => {
                    report.failure = Some(StageFailure::from_oracle("classifier", &e));
                    break;
                }
            };

            if let Choice::Unparseable(raw) = &choice {
                warn!(candidate_id = candidate.id, "Unparseable classification {:?}, treating as negative", raw);
                report.unparseable += 1;
            }
            let is_classical = is_positive(&choice);

            self.ctx
                .storage
                .record_classification(candidate.id, is_classical)
                .await?;
            metrics::record_classification(is_classical);
            debug!(candidate_id = candidate.id, is_classical, "Analyzed event: {}", record.title);

            report.analyzed += 1;
            if is_classical {
                report.classical += 1;
            }
        }

        info!(
            analyzed = report.analyzed,
            classical = report.classical,
            "Classification finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_true_label_is_positive() {
        assert!(is_positive(&Choice::Label("true".into())));
        assert!(!is_positive(&Choice::Label("false".into())));
        assert!(!is_positive(&Choice::Unparseable("true".into())));
        assert!(!is_positive(&Choice::Unparseable("TRUE".into())));
    }
}
