// Dispatcher
// Runs per-chunk moderation concurrently with a bounded worker pool.
// Results are keyed by chunk index; completion order carries no meaning.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::models::{Chunk, MisinformationFinding, ProblematicSection};
use crate::services::classifier::Classifier;
use crate::services::text_processor::preview;

use super::line_flags::flag_lines;
use super::retry::RetryPolicy;
use super::ModerationError;

/// Everything one chunk contributed to the run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkOutcome {
    pub chunk_index: usize,
    pub problematic: Option<ProblematicSection>,
    pub misinformation: Option<MisinformationFinding>,
    /// Causes of classification steps that produced no answer.
    pub failures: Vec<String>,
}

impl ChunkOutcome {
    pub fn new(chunk_index: usize) -> Self {
        Self {
            chunk_index,
            ..Default::default()
        }
    }

    pub fn failed(chunk_index: usize, cause: impl Into<String>) -> Self {
        Self {
            chunk_index,
            failures: vec![cause.into()],
            ..Default::default()
        }
    }

    pub fn is_failed(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_workers: usize,
    pub line_workers: usize,
    pub threshold: f64,
    pub check_misinformation: bool,
    pub run_deadline: Option<Duration>,
}

/// Shared read-only state handed to every chunk task.
struct ChunkContext {
    classifier: Arc<dyn Classifier>,
    retry: RetryPolicy,
    chunk_pool: Arc<Semaphore>,
    line_pool: Arc<Semaphore>,
    threshold: f64,
    check_misinformation: bool,
}

pub struct Dispatcher {
    classifier: Arc<dyn Classifier>,
    retry: RetryPolicy,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        retry: RetryPolicy,
        settings: DispatchSettings,
    ) -> Result<Self, ModerationError> {
        if settings.max_workers == 0 {
            return Err(ModerationError::Configuration(
                "max_workers must be greater than 0".to_string(),
            ));
        }
        if settings.line_workers == 0 {
            return Err(ModerationError::Configuration(
                "line_workers must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            classifier,
            retry,
            settings,
        })
    }

    /// Process every chunk and return one outcome per chunk index.
    ///
    /// A chunk that fails, panics, or is still running at the run deadline
    /// gets a failed outcome; no other chunk is affected.
    pub async fn run(&self, chunks: Vec<Chunk>) -> BTreeMap<usize, ChunkOutcome> {
        let started = Instant::now();
        let total = chunks.len();
        let indices: Vec<usize> = chunks.iter().map(|c| c.index).collect();

        info!(
            "[DISPATCHER] Processing {} chunks (max_workers={}, line_workers={}, misinformation={})",
            total,
            self.settings.max_workers,
            self.settings.line_workers,
            self.settings.check_misinformation
        );

        let ctx = Arc::new(ChunkContext {
            classifier: self.classifier.clone(),
            retry: self.retry.clone(),
            chunk_pool: Arc::new(Semaphore::new(self.settings.max_workers)),
            line_pool: Arc::new(Semaphore::new(self.settings.line_workers)),
            threshold: self.settings.threshold,
            check_misinformation: self.settings.check_misinformation,
        });

        let mut join_set: JoinSet<ChunkOutcome> = JoinSet::new();
        for chunk in chunks {
            let ctx = ctx.clone();
            join_set.spawn(async move { process_chunk(ctx, chunk).await });
        }

        let deadline = self
            .settings
            .run_deadline
            .map(|d| tokio::time::Instant::now() + d);
        let mut results: BTreeMap<usize, ChunkOutcome> = BTreeMap::new();

        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, join_set.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            "[DISPATCHER] Run deadline reached, aborting {} unfinished chunks",
                            join_set.len()
                        );
                        join_set.abort_all();
                        break;
                    }
                },
                None => join_set.join_next().await,
            };
            let Some(res) = next else { break };

            match res {
                Ok(outcome) => {
                    if outcome.is_failed() {
                        warn!(
                            "[DISPATCHER] × chunk {} produced no answer: {}",
                            outcome.chunk_index,
                            outcome.failures.join("; ")
                        );
                    } else {
                        debug!("[DISPATCHER] ✓ chunk {}", outcome.chunk_index);
                    }
                    if results.contains_key(&outcome.chunk_index) {
                        warn!(
                            "[DISPATCHER] duplicate outcome for chunk {}, keeping the first",
                            outcome.chunk_index
                        );
                    } else {
                        results.insert(outcome.chunk_index, outcome);
                    }
                }
                Err(e) => warn!("[DISPATCHER] chunk task failed: {}", e),
            }

            let done = results.len();
            if total > 0 && (done == total || done % 5 == 0) {
                info!(
                    "[DISPATCHER] Progress: {}/{} (elapsed_ms={})",
                    done,
                    total,
                    started.elapsed().as_millis()
                );
            }
        }

        for index in indices {
            results.entry(index).or_insert_with(|| {
                warn!("[DISPATCHER] × chunk {} did not complete", index);
                ChunkOutcome::failed(index, "did not complete")
            });
        }

        info!(
            "[DISPATCHER] Done: chunks={}, failed={}, elapsed_ms={}",
            results.len(),
            results.values().filter(|o| o.is_failed()).count(),
            started.elapsed().as_millis()
        );
        results
    }
}

/// One unit of work: top-level classification, line extraction for flagged
/// chunks, then the optional misinformation check. Runs while holding a
/// chunk-pool slot.
async fn process_chunk(ctx: Arc<ChunkContext>, chunk: Chunk) -> ChunkOutcome {
    let _permit = match ctx.chunk_pool.clone().acquire_owned().await {
        Ok(p) => p,
        Err(_) => return ChunkOutcome::failed(chunk.index, "chunk pool closed"),
    };

    let mut outcome = ChunkOutcome::new(chunk.index);
    let label = format!("chunk={}", chunk.index);

    let verdict = ctx
        .retry
        .execute(&label, || ctx.classifier.classify(&chunk.text))
        .await;

    match verdict {
        Ok(v) if v.flagged => {
            let (flagged_lines, line_failures) = flag_lines(
                ctx.classifier.clone(),
                ctx.retry.clone(),
                ctx.line_pool.clone(),
                &chunk,
                ctx.threshold,
            )
            .await;
            // Lines that never got a verdict leave the chunk only partly checked.
            outcome
                .failures
                .extend(line_failures.into_iter().map(|cause| format!("lines: {}", cause)));
            if !flagged_lines.is_empty() {
                outcome.problematic = Some(ProblematicSection {
                    chunk_index: chunk.index,
                    flagged_lines,
                });
            }
        }
        Ok(_) => {}
        Err(e) => outcome.failures.push(format!("classification: {}", e)),
    }

    if ctx.check_misinformation {
        let text = chunk.text.trim();
        if !text.is_empty() {
            let label = format!("chunk={} misinformation", chunk.index);
            match ctx
                .retry
                .execute(&label, || ctx.classifier.analyze_misinformation(text))
                .await
            {
                Ok(judgment) if judgment.is_misinformation => {
                    debug!(
                        "[DISPATCHER] misinformation in chunk {} confidence={:.2}: {}",
                        chunk.index,
                        judgment.confidence,
                        preview(text, 60)
                    );
                    outcome.misinformation =
                        Some(MisinformationFinding::from_judgment(chunk.index, text, judgment));
                }
                Ok(_) => {}
                Err(e) => outcome.failures.push(format!("misinformation: {}", e)),
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MisinformationJudgment;
    use crate::services::classifier::testing::{LinesAlwaysLimited, ScriptedClassifier};
    use std::sync::atomic::Ordering;

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            index,
            text: text.to_string(),
            start_offset: index * 100,
            end_offset: index * 100 + text.chars().count(),
        }
    }

    fn settings(max_workers: usize) -> DispatchSettings {
        DispatchSettings {
            max_workers,
            line_workers: 2,
            threshold: 0.8,
            check_misinformation: true,
            run_deadline: None,
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, 2.0, Duration::from_millis(1)).unwrap()
    }

    #[test]
    fn test_rejects_zero_workers() {
        let classifier: Arc<dyn Classifier> = Arc::new(ScriptedClassifier::new());
        assert!(Dispatcher::new(classifier.clone(), fast_retry(1), settings(0)).is_err());
        let mut s = settings(2);
        s.line_workers = 0;
        assert!(Dispatcher::new(classifier, fast_retry(1), s).is_err());
    }

    #[tokio::test]
    async fn test_results_keyed_by_index_regardless_of_completion_order() {
        let classifier = Arc::new(
            ScriptedClassifier::new()
                .flag("slow bad", "hate", 0.9)
                .flag("fast bad", "hate", 0.9)
                .delay("slow", Duration::from_millis(40)),
        );
        let dispatcher = Dispatcher::new(classifier, fast_retry(3), settings(4)).unwrap();
        let results = dispatcher
            .run(vec![chunk(0, "slow bad"), chunk(1, "clean"), chunk(2, "fast bad")])
            .await;

        assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(results[&0].problematic.as_ref().unwrap().chunk_index, 0);
        assert!(results[&1].problematic.is_none());
        assert_eq!(results[&2].problematic.as_ref().unwrap().chunk_index, 2);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let classifier = Arc::new(ScriptedClassifier::new().delay("chunk", Duration::from_millis(10)));
        let dispatcher = Dispatcher::new(classifier.clone(), fast_retry(1), {
            let mut s = settings(3);
            s.check_misinformation = false;
            s
        })
        .unwrap();
        let chunks = (0..12).map(|i| chunk(i, &format!("chunk {}", i))).collect();
        let results = dispatcher.run(chunks).await;

        assert_eq!(results.len(), 12);
        assert!(classifier.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(classifier.classify_calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_isolated() {
        let classifier = Arc::new(
            ScriptedClassifier::new()
                .flag("bad", "violence", 0.95)
                .fail("broken"),
        );
        let dispatcher = Dispatcher::new(classifier, fast_retry(3), settings(2)).unwrap();
        let results = dispatcher
            .run(vec![chunk(0, "broken chunk"), chunk(1, "bad")])
            .await;

        assert!(results[&0].is_failed());
        assert!(results[&0].problematic.is_none());
        assert!(results[&1].problematic.is_some());
        assert!(!results[&1].is_failed());
    }

    #[tokio::test]
    async fn test_flagged_chunk_with_unclassifiable_lines_is_failed() {
        let dispatcher =
            Dispatcher::new(Arc::new(LinesAlwaysLimited), fast_retry(2), settings(1)).unwrap();
        let results = dispatcher
            .run(vec![chunk(0, "first line\nsecond line")])
            .await;

        let outcome = &results[&0];
        assert!(outcome.problematic.is_none());
        assert!(outcome.is_failed());
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures[0].starts_with("lines: line 1"));
        assert!(outcome.failures[1].starts_with("lines: line 2"));
    }

    #[tokio::test]
    async fn test_transient_failures_below_budget_recover() {
        let classifier = Arc::new(
            ScriptedClassifier::new()
                .flag("bad", "hate", 0.9)
                .rate_limit("bad", 2),
        );
        let dispatcher = Dispatcher::new(classifier, fast_retry(5), settings(1)).unwrap();
        let results = dispatcher.run(vec![chunk(0, "bad")]).await;
        assert!(results[&0].problematic.is_some());
    }

    #[tokio::test]
    async fn test_retry_exhaustion_yields_no_finding() {
        let classifier = Arc::new(
            ScriptedClassifier::new()
                .flag("bad", "hate", 0.9)
                .rate_limit("bad", 100),
        );
        let mut s = settings(1);
        s.check_misinformation = false;
        let dispatcher = Dispatcher::new(classifier, fast_retry(3), s).unwrap();
        let results = dispatcher.run(vec![chunk(0, "bad"), chunk(1, "fine")]).await;
        assert!(results[&0].problematic.is_none());
        assert!(results[&0].failures[0].contains("retries exhausted"));
        assert!(!results[&1].is_failed());
    }

    #[tokio::test]
    async fn test_misinformation_disabled_skips_calls() {
        let classifier = Arc::new(ScriptedClassifier::new().misinformation(
            "moon",
            MisinformationJudgment {
                is_misinformation: true,
                confidence: 0.9,
                explanation: "false".to_string(),
                correction: None,
            },
        ));
        let mut s = settings(2);
        s.check_misinformation = false;
        let dispatcher = Dispatcher::new(classifier.clone(), fast_retry(1), s).unwrap();
        let results = dispatcher.run(vec![chunk(0, "the moon is cheese")]).await;
        assert!(results[&0].misinformation.is_none());
        assert_eq!(classifier.misinformation_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_misinformation_only_recorded_when_positive() {
        let classifier = Arc::new(ScriptedClassifier::new().misinformation(
            "moon",
            MisinformationJudgment {
                is_misinformation: true,
                confidence: 0.9,
                explanation: "The moon is rock".to_string(),
                correction: Some("The moon is made of rock".to_string()),
            },
        ));
        let dispatcher = Dispatcher::new(classifier, fast_retry(1), settings(2)).unwrap();
        let results = dispatcher
            .run(vec![chunk(0, "  the moon is cheese  "), chunk(1, "water is wet")])
            .await;

        let finding = results[&0].misinformation.as_ref().unwrap();
        assert_eq!(finding.text, "the moon is cheese");
        assert_eq!(finding.chunk_index, 0);
        assert!(results[&1].misinformation.is_none());
    }

    #[tokio::test]
    async fn test_deadline_marks_unfinished_chunks_failed() {
        let classifier = Arc::new(ScriptedClassifier::new().delay("slow", Duration::from_secs(30)));
        let mut s = settings(2);
        s.check_misinformation = false;
        s.run_deadline = Some(Duration::from_millis(50));
        let dispatcher = Dispatcher::new(classifier, fast_retry(1), s).unwrap();
        let results = dispatcher.run(vec![chunk(0, "quick"), chunk(1, "slow")]).await;

        assert!(!results[&0].is_failed());
        assert!(results[&1].is_failed());
    }
}
