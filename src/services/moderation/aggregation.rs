// Aggregation
// Folds per-chunk outcomes into index-keyed problematic and misinformation
// sections. The aggregator is the single writer of report state.

use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::models::{MisinformationFinding, ProblematicSection};

use super::dispatcher::ChunkOutcome;

#[derive(Debug, Default)]
pub struct ReportAggregator {
    problematic: BTreeMap<usize, ProblematicSection>,
    misinformation: BTreeMap<usize, MisinformationFinding>,
    folded: BTreeSet<usize>,
    failed: BTreeSet<usize>,
}

/// Sorted sections plus the run counts the report summary needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedFindings {
    pub problematic_sections: Vec<ProblematicSection>,
    pub misinformation_sections: Vec<MisinformationFinding>,
    pub chunks_total: usize,
    pub chunks_failed: usize,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one chunk's outcome. Returns `false` (and changes nothing) when
    /// the chunk index was already folded in this run.
    pub fn fold(&mut self, chunk_index: usize, outcome: ChunkOutcome) -> bool {
        if !self.folded.insert(chunk_index) {
            warn!("[AGGREGATION] chunk {} already folded, ignoring", chunk_index);
            return false;
        }

        if outcome.is_failed() {
            self.failed.insert(chunk_index);
        }

        if let Some(section) = outcome.problematic.filter(|s| !s.flagged_lines.is_empty()) {
            self.problematic.insert(chunk_index, section);
        }
        if let Some(finding) = outcome.misinformation.filter(|f| f.is_misinformation) {
            self.misinformation.insert(chunk_index, finding);
        }
        true
    }

    /// Consume the aggregator; both sections come out in ascending chunk order.
    pub fn finish(self) -> AggregatedFindings {
        AggregatedFindings {
            problematic_sections: self.problematic.into_values().collect(),
            misinformation_sections: self.misinformation.into_values().collect(),
            chunks_total: self.folded.len(),
            chunks_failed: self.failed.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LineFinding;
    use std::collections::BTreeMap as Map;

    fn problematic(index: usize) -> ChunkOutcome {
        ChunkOutcome {
            chunk_index: index,
            problematic: Some(ProblematicSection {
                chunk_index: index,
                flagged_lines: vec![LineFinding {
                    line_number: 1,
                    text: format!("line {}", index),
                    flagged_categories: Map::new(),
                }],
            }),
            ..ChunkOutcome::new(index)
        }
    }

    fn misinformation(index: usize) -> ChunkOutcome {
        ChunkOutcome {
            chunk_index: index,
            misinformation: Some(MisinformationFinding {
                chunk_index: index,
                text: "claim".to_string(),
                is_misinformation: true,
                confidence: 0.9,
                explanation: "wrong".to_string(),
                correction: None,
            }),
            ..ChunkOutcome::new(index)
        }
    }

    #[test]
    fn test_sections_sorted_regardless_of_fold_order() {
        let mut agg = ReportAggregator::new();
        for i in [4, 0, 3, 1, 2] {
            agg.fold(i, problematic(i));
        }
        for i in [9, 5, 7] {
            agg.fold(i, misinformation(i));
        }

        let findings = agg.finish();
        let p: Vec<usize> = findings.problematic_sections.iter().map(|s| s.chunk_index).collect();
        let m: Vec<usize> = findings.misinformation_sections.iter().map(|s| s.chunk_index).collect();
        assert_eq!(p, vec![0, 1, 2, 3, 4]);
        assert_eq!(m, vec![5, 7, 9]);
        assert_eq!(findings.chunks_total, 8);
    }

    #[test]
    fn test_fold_is_idempotent_per_index() {
        let mut agg = ReportAggregator::new();
        assert!(agg.fold(1, problematic(1)));
        assert!(!agg.fold(1, misinformation(1)));

        let findings = agg.finish();
        assert_eq!(findings.problematic_sections.len(), 1);
        assert!(findings.misinformation_sections.is_empty());
    }

    #[test]
    fn test_empty_and_failed_outcomes_are_omitted() {
        let mut agg = ReportAggregator::new();
        agg.fold(0, ChunkOutcome::new(0));
        agg.fold(1, ChunkOutcome::failed(1, "classification: boom"));
        agg.fold(2, problematic(2));

        let findings = agg.finish();
        assert_eq!(findings.problematic_sections.len(), 1);
        assert_eq!(findings.chunks_total, 3);
        assert_eq!(findings.chunks_failed, 1);
    }
}
