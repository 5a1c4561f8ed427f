// Line-Level Flag Extraction
// Re-classifies each non-empty line of a flagged chunk and keeps lines with
// at least one flagged category scoring at or above the threshold.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::models::{Chunk, ClassificationVerdict, FlaggedCategory, LineFinding};
use crate::services::classifier::{Classifier, ClassifierError};
use crate::services::text_processor::numbered_lines;

use super::retry::RetryPolicy;

/// Build a finding for one line from its verdict, or `None` when nothing
/// crosses the threshold. The threshold is inclusive.
pub fn extract_line_finding(
    line_number: usize,
    line: &str,
    verdict: &ClassificationVerdict,
    threshold: f64,
) -> Option<LineFinding> {
    if !verdict.flagged {
        return None;
    }

    let flagged_categories: BTreeMap<String, FlaggedCategory> = verdict
        .categories
        .iter()
        .filter(|(_, c)| c.is_flagged && c.score >= threshold)
        .map(|(name, c)| {
            (
                name.clone(),
                FlaggedCategory {
                    score: c.score,
                    text: line.to_string(),
                },
            )
        })
        .collect();

    if flagged_categories.is_empty() {
        return None;
    }

    Some(LineFinding {
        line_number,
        text: line.to_string(),
        flagged_categories,
    })
}

/// Classify every non-empty line of `chunk` and return the retained findings
/// in line order, plus one cause per line that could not be classified.
///
/// Line calls go through `line_pool`, a semaphore separate from the chunk
/// pool, so a chunk holding its own slot never waits on sibling chunk slots.
/// A permit is held only for a single request, not across backoff sleeps.
pub async fn flag_lines(
    classifier: Arc<dyn Classifier>,
    retry: RetryPolicy,
    line_pool: Arc<Semaphore>,
    chunk: &Chunk,
    threshold: f64,
) -> (Vec<LineFinding>, Vec<String>) {
    let mut join_set: JoinSet<(usize, Result<Option<LineFinding>, String>)> = JoinSet::new();

    for (line_number, line) in numbered_lines(&chunk.text) {
        let classifier = classifier.clone();
        let retry = retry.clone();
        let line_pool = line_pool.clone();
        let line = line.to_string();
        let chunk_index = chunk.index;

        join_set.spawn(async move {
            let label = format!("chunk={} line={}", chunk_index, line_number);
            let result = retry
                .execute(&label, || async {
                    let _permit = line_pool
                        .acquire()
                        .await
                        .map_err(|_| ClassifierError::Permanent("line pool closed".to_string()))?;
                    classifier.classify(&line).await
                })
                .await;

            match result {
                Ok(verdict) => (
                    line_number,
                    Ok(extract_line_finding(line_number, &line, &verdict, threshold)),
                ),
                Err(e) => {
                    warn!(
                        "[LINE_FLAGS] line classification failed chunk_index={} line={} : {}",
                        chunk_index, line_number, e
                    );
                    (line_number, Err(format!("line {}: {}", line_number, e)))
                }
            }
        });
    }

    let mut findings: Vec<LineFinding> = Vec::new();
    let mut failures: Vec<(usize, String)> = Vec::new();
    while let Some(res) = join_set.join_next().await {
        match res {
            Ok((_, Ok(Some(finding)))) => findings.push(finding),
            Ok((_, Ok(None))) => {}
            Ok((line_number, Err(cause))) => failures.push((line_number, cause)),
            Err(e) => {
                warn!(
                    "[LINE_FLAGS] line task failed chunk_index={} : {}",
                    chunk.index, e
                );
                failures.push((usize::MAX, format!("line task: {}", e)));
            }
        }
    }

    findings.sort_by_key(|f| f.line_number);
    failures.sort();
    (findings, failures.into_iter().map(|(_, cause)| cause).collect())
}
