// Transcript Guard Data Models
// Chunks, classifier verdicts, findings and the moderation report.
// Report field names are part of the external contract and stay snake_case.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============ Chunking ============

/// A contiguous span of the transcript.
///
/// Offsets count Unicode scalar values (not UTF-8 bytes), so
/// `end_offset - start_offset == text.chars().count()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset == self.end_offset
    }
}

// ============ Classifier Verdicts ============

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub is_flagged: bool,
    pub score: f64,
}

/// Flagged/not-flagged judgment for one text span.
///
/// Category names come from the classifier and are not known ahead of time.
/// A `BTreeMap` keeps iteration (and therefore report output) deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationVerdict {
    pub flagged: bool,
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryScore>,
}

impl ClassificationVerdict {
    pub fn clean() -> Self {
        Self::default()
    }

    /// Returns the first category whose score is not a finite number in [0, 1].
    pub fn invalid_category(&self) -> Option<(&str, f64)> {
        self.categories
            .iter()
            .find(|(_, c)| !c.score.is_finite() || !(0.0..=1.0).contains(&c.score))
            .map(|(name, c)| (name.as_str(), c.score))
    }
}

/// Answer of the misinformation capability for one text span.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MisinformationJudgment {
    #[serde(default)]
    pub is_misinformation: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub correction: Option<String>,
}

// ============ Findings ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedCategory {
    pub score: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineFinding {
    /// 1-based position of the line inside its chunk.
    pub line_number: usize,
    pub text: String,
    pub flagged_categories: BTreeMap<String, FlaggedCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblematicSection {
    pub chunk_index: usize,
    pub flagged_lines: Vec<LineFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MisinformationFinding {
    pub chunk_index: usize,
    pub text: String,
    pub is_misinformation: bool,
    pub confidence: f64,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
}

impl MisinformationFinding {
    pub fn from_judgment(chunk_index: usize, text: &str, judgment: MisinformationJudgment) -> Self {
        Self {
            chunk_index,
            text: text.to_string(),
            is_misinformation: judgment.is_misinformation,
            confidence: judgment.confidence.clamp(0.0, 1.0),
            explanation: judgment.explanation,
            correction: judgment.correction.filter(|c| !c.trim().is_empty()),
        }
    }
}

// ============ Report ============

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub problematic_chunks: usize,
    pub flagged_lines: usize,
    pub misinformation_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationReport {
    /// ISO-8601 UTC timestamp of the run.
    pub timestamp: String,
    pub problematic_sections: Vec<ProblematicSection>,
    pub misinformation_sections: Vec<MisinformationFinding>,
    #[serde(default)]
    pub summary: ReportSummary,
}
