// Report Builder
// Pure construction of the moderation report; writing it anywhere is the caller's job.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{MisinformationFinding, ModerationReport, ProblematicSection, ReportSummary};

/// Run-level counts that are not derivable from the sections themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub chunks_total: usize,
    pub chunks_failed: usize,
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Assemble the report. Sections are sorted by chunk index here as well, so
/// the ordering guarantee holds for any caller.
pub fn build_report(
    timestamp: DateTime<Utc>,
    mut problematic_sections: Vec<ProblematicSection>,
    mut misinformation_sections: Vec<MisinformationFinding>,
    stats: RunStats,
) -> ModerationReport {
    problematic_sections.sort_by_key(|s| s.chunk_index);
    misinformation_sections.sort_by_key(|s| s.chunk_index);

    let summary = ReportSummary {
        chunks_total: stats.chunks_total,
        chunks_failed: stats.chunks_failed,
        problematic_chunks: problematic_sections.len(),
        flagged_lines: problematic_sections.iter().map(|s| s.flagged_lines.len()).sum(),
        misinformation_chunks: misinformation_sections.len(),
    };

    ModerationReport {
        timestamp: format_timestamp(timestamp),
        problematic_sections,
        misinformation_sections,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LineFinding;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn section(index: usize, lines: usize) -> ProblematicSection {
        ProblematicSection {
            chunk_index: index,
            flagged_lines: (1..=lines)
                .map(|n| LineFinding {
                    line_number: n,
                    text: format!("line {}", n),
                    flagged_categories: BTreeMap::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_build_report_sorts_and_counts() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let report = build_report(
            ts,
            vec![section(3, 1), section(1, 2)],
            vec![],
            RunStats { chunks_total: 5, chunks_failed: 1 },
        );

        assert_eq!(report.timestamp, "2024-05-01T12:30:00.000000Z");
        assert_eq!(report.problematic_sections[0].chunk_index, 1);
        assert_eq!(report.problematic_sections[1].chunk_index, 3);
        assert_eq!(report.summary.problematic_chunks, 2);
        assert_eq!(report.summary.flagged_lines, 3);
        assert_eq!(report.summary.chunks_failed, 1);
        assert_eq!(report.summary.misinformation_chunks, 0);
    }

    #[test]
    fn test_empty_report() {
        let report = build_report(Utc::now(), vec![], vec![], RunStats::default());
        assert!(report.problematic_sections.is_empty());
        assert!(report.misinformation_sections.is_empty());
        assert_eq!(report.summary, ReportSummary::default());
    }
}
