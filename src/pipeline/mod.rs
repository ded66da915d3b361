//! Batch pipeline: classification, promotion, composer extraction and composer
//! resolution. Each stage reads the rows its watermark has not reached yet, so
//! any stage can be re-run on its own.
//!
//! Runs are assumed not to overlap; nothing here locks rows against a second
//! concurrent runner.

pub mod classifier;
pub mod composer_extractor;
pub mod composer_resolver;
pub mod promoter;

use crate::error::{PipelineError, Result};
use crate::metrics;
use crate::oracle::Oracle;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub use classifier::{Classifier, ClassifierReport};
pub use composer_extractor::{ComposerExtractor, ExtractionReport};
pub use composer_resolver::{ComposerResolver, ResolutionReport};
pub use promoter::{PromotionReport, Promoter};

/// Handles every stage needs: the store and the oracle.
#[derive(Clone)]
pub struct PipelineContext {
    pub storage: Arc<dyn Storage>,
    pub oracle: Arc<dyn Oracle>,
    pub similarity_threshold: f64,
}

impl PipelineContext {
    pub fn new(storage: Arc<dyn Storage>, oracle: Arc<dyn Oracle>) -> Self {
        Self {
            storage,
            oracle,
            similarity_threshold: crate::constants::SIMILARITY_THRESHOLD,
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("storage", &"<Arc<dyn Storage>>")
            .field("oracle", &"<Arc<dyn Oracle>>")
            .field("similarity_threshold", &self.similarity_threshold)
            .finish()
    }
}

/// Why a stage stopped before reaching the end of its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: &'static str,
    pub message: String,
    pub transient: bool,
}

impl StageFailure {
    pub(crate) fn from_oracle(stage: &'static str, err: &PipelineError) -> Self {
        metrics::record_stage_failure(stage);
        let transient = err.is_transient();
        if transient {
            warn!(stage, "Oracle call failed, stopping stage until next run: {}", err);
        } else {
            error!(stage, "Oracle call failed: {}", err);
        }
        Self {
            stage,
            message: err.to_string(),
            transient,
        }
    }
}

/// Summary of one scheduled invocation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub classification: Option<ClassifierReport>,
    pub promotion: Option<PromotionReport>,
    pub extraction: Option<ExtractionReport>,
    pub resolution: Option<ResolutionReport>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            classification: None,
            promotion: None,
            extraction: None,
            resolution: None,
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.classification
            .as_ref()
            .and_then(|r| r.failure.as_ref())
            .or_else(|| self.extraction.as_ref().and_then(|r| r.failure.as_ref()))
            .or_else(|| self.resolution.as_ref().and_then(|r| r.failure.as_ref()))
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}

impl Default for BatchReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs all four stages in order. A stage that stops on an oracle failure ends
/// the run; persistence errors are returned as `Err`.
#[instrument(skip(ctx))]
pub async fn run_all(ctx: &PipelineContext) -> Result<BatchReport> {
    let mut report = BatchReport::new();
    info!(run_id = %report.run_id, "Starting pipeline run");

    let classification = Classifier::new(ctx.clone()).run().await?;
    let stop = classification.failure.is_some();
    report.classification = Some(classification);
    if stop {
        return Ok(report.finish());
    }

    report.promotion = Some(Promoter::new(ctx.storage.clone()).run().await?);

    let extraction = ComposerExtractor::new(ctx.clone()).run().await?;
    let stop = extraction.failure.is_some();
    report.extraction = Some(extraction);
    if stop {
        return Ok(report.finish());
    }

    report.resolution = Some(ComposerResolver::new(ctx.clone()).run().await?);

    let report = report.finish();
    info!(run_id = %report.run_id, failed = report.failure().is_some(), "Finished pipeline run");
    Ok(report)
}
