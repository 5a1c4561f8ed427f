// Moderation Module
// Chunked concurrent moderation pipeline, organized into:
// - chunker: overlapping character windows with stable indices
// - retry: exponential backoff for rate-limited classifier calls
// - dispatcher: bounded-concurrency per-chunk processing
// - line_flags: line-level re-classification of flagged chunks
// - aggregation: index-keyed folding of chunk outcomes
// - report: final report construction

pub mod aggregation;
pub mod chunker;
pub mod dispatcher;
pub mod line_flags;
pub mod report;
pub mod retry;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::{Chunk, ModerationReport};
use crate::services::classifier::{Classifier, ClassifierError};
use crate::services::config_store::ModerationConfig;

pub use aggregation::{AggregatedFindings, ReportAggregator};
pub use chunker::{split, split_with_strategy, ChunkStrategy};
pub use dispatcher::{ChunkOutcome, DispatchSettings, Dispatcher};
pub use line_flags::extract_line_finding;
pub use report::{build_report, RunStats};
pub use retry::RetryPolicy;

#[derive(Error, Debug)]
pub enum ModerationError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: String },
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

/// Runs the whole pipeline for one transcript.
///
/// The classifier handle is built once and shared read-only by every worker.
pub struct TranscriptModerator {
    classifier: Arc<dyn Classifier>,
    config: ModerationConfig,
    retry: RetryPolicy,
}

impl TranscriptModerator {
    pub fn new(classifier: Arc<dyn Classifier>, config: ModerationConfig) -> Result<Self, ModerationError> {
        config.validate()?;
        let retry = config.retry_policy()?;
        Ok(Self {
            classifier,
            config,
            retry,
        })
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    pub fn chunk(&self, transcript: &str) -> Result<Vec<Chunk>, ModerationError> {
        split_with_strategy(
            transcript,
            self.config.chunk_size,
            self.config.overlap,
            self.config.chunk_strategy,
        )
    }

    pub async fn moderate(&self, transcript: &str) -> Result<ModerationReport, ModerationError> {
        self.moderate_at(transcript, Utc::now()).await
    }

    /// Moderate with a caller-supplied report timestamp.
    ///
    /// Only configuration problems fail the run; chunk-level failures are
    /// logged and leave that chunk out of the report.
    pub async fn moderate_at(
        &self,
        transcript: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ModerationReport, ModerationError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let chunks = self.chunk(transcript)?;

        info!(
            %run_id,
            chars = transcript.chars().count(),
            chunks = chunks.len(),
            "[MODERATOR] run started"
        );

        let dispatcher = Dispatcher::new(
            self.classifier.clone(),
            self.retry.clone(),
            self.config.dispatch_settings(),
        )?;
        let outcomes = dispatcher.run(chunks).await;

        let mut aggregator = ReportAggregator::new();
        for (index, outcome) in outcomes {
            aggregator.fold(index, outcome);
        }
        let findings = aggregator.finish();

        let report = build_report(
            timestamp,
            findings.problematic_sections,
            findings.misinformation_sections,
            RunStats {
                chunks_total: findings.chunks_total,
                chunks_failed: findings.chunks_failed,
            },
        );

        info!(
            %run_id,
            problematic = report.summary.problematic_chunks,
            flagged_lines = report.summary.flagged_lines,
            misinformation = report.summary.misinformation_chunks,
            failed = report.summary.chunks_failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[MODERATOR] run finished"
        );
        Ok(report)
    }
}
