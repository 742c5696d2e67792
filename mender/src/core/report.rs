//! Final report document: the stable JSON artifact a run leaves behind.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::score::ScoreBreakdown;
use crate::core::types::{AppliedFix, FinalStatus, FixStatus, IterationRecord};

/// Per-fix entry in the report, flattened to the wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFix {
    pub file: String,
    pub bug_type: String,
    pub line_number: Option<u32>,
    pub commit_message: String,
    pub description: String,
    pub status: FixStatus,
}

impl From<&AppliedFix> for ReportFix {
    fn from(fix: &AppliedFix) -> Self {
        Self {
            file: fix.proposal.file.clone(),
            bug_type: fix.proposal.kind.clone(),
            line_number: fix.proposal.line,
            commit_message: fix.proposal.commit_message.clone(),
            description: fix.proposal.description.clone(),
            status: fix.status,
        }
    }
}

/// The terminal report for a run. Key names are a stable contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    pub run_id: String,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub branch: String,
    pub total_failures: u32,
    pub total_fixes: u32,
    pub total_commits: u32,
    pub final_status: FinalStatus,
    pub total_time: String,
    pub total_time_ms: u64,
    pub score_breakdown: ScoreBreakdown,
    pub fixes: Vec<ReportFix>,
    pub timeline: Vec<IterationRecord>,
    pub generated_at: String,
}

/// Render a millisecond duration as the human `"Xm Ys"` form.
pub fn format_duration_ms(total_time_ms: u64) -> String {
    let total_secs = total_time_ms / 1000;
    format!("{}m {}s", total_secs / 60, total_secs % 60)
}

/// RFC3339 timestamp used across the report and timeline.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::score::{RunMetrics, score};
    use crate::core::types::{FixProposal, IterationStatus};

    #[test]
    fn duration_formats_minutes_and_seconds() {
        assert_eq!(format_duration_ms(0), "0m 0s");
        assert_eq!(format_duration_ms(61_000), "1m 1s");
        assert_eq!(format_duration_ms(200_000), "3m 20s");
    }

    #[test]
    fn report_serializes_stable_keys() {
        let fix = AppliedFix::fixed(FixProposal {
            file: "src/a.py".to_string(),
            line: Some(1),
            kind: "SYNTAX".to_string(),
            description: "missing colon".to_string(),
            original_code: "def f()".to_string(),
            fixed_code: "def f():".to_string(),
            commit_message: "[AI-AGENT] fix syntax".to_string(),
        });
        let report = FinalReport {
            run_id: "run-1".to_string(),
            repo_url: "https://github.com/acme/demo".to_string(),
            team_name: "Acme".to_string(),
            leader_name: "Ada".to_string(),
            branch: "ACME_ADA_AI_FIX".to_string(),
            total_failures: 1,
            total_fixes: 1,
            total_commits: 1,
            final_status: FinalStatus::Passed,
            total_time: format_duration_ms(61_000),
            total_time_ms: 61_000,
            score_breakdown: score(RunMetrics {
                total_time_ms: 61_000,
                commit_count: 1,
                fix_count: 1,
                iteration_count: 1,
            }),
            fixes: vec![ReportFix::from(&fix)],
            timeline: vec![IterationRecord {
                iteration: 0,
                status: IterationStatus::Failed,
                timestamp: now_rfc3339(),
            }],
            generated_at: now_rfc3339(),
        };

        let value = serde_json::to_value(&report).expect("serialize");
        for key in [
            "runId",
            "repoUrl",
            "teamName",
            "leaderName",
            "branch",
            "totalFailures",
            "totalFixes",
            "totalCommits",
            "finalStatus",
            "totalTime",
            "totalTimeMs",
            "scoreBreakdown",
            "fixes",
            "timeline",
            "generatedAt",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(value["finalStatus"], "PASSED");
        assert_eq!(value["fixes"][0]["bugType"], "SYNTAX");
        assert_eq!(value["fixes"][0]["lineNumber"], 1);
        assert_eq!(value["fixes"][0]["status"], "Fixed");
    }
}
