//! Pure scoring of a finished run.

use serde::{Deserialize, Serialize};

/// Inputs the scorer consumes; all counts are final-run aggregates.
///
/// `iteration_count` excludes iteration 0 (the initial analysis).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunMetrics {
    pub total_time_ms: u64,
    pub commit_count: u32,
    pub fix_count: u32,
    pub iteration_count: u32,
}

/// Score breakdown as it appears in the final report.
///
/// Penalties are stored as non-positive values so the serialized breakdown
/// sums to `total` before clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub base: i64,
    pub speed_bonus: i64,
    pub fix_bonus: i64,
    pub commit_penalty: i64,
    pub iteration_penalty: i64,
    pub total: i64,
}

const BASE: i64 = 100;
const SPEED_BONUS: i64 = 10;
const SPEED_THRESHOLD_MS: u64 = 300_000;
const FIX_BONUS_CAP: u32 = 20;
const COMMIT_FREE_ALLOWANCE: u32 = 20;
const ITERATION_FREE_ALLOWANCE: u32 = 3;

/// Map run metrics to a score breakdown.
pub fn score(metrics: RunMetrics) -> ScoreBreakdown {
    let speed_bonus = if metrics.total_time_ms < SPEED_THRESHOLD_MS {
        SPEED_BONUS
    } else {
        0
    };
    let fix_bonus = i64::from(metrics.fix_count.min(FIX_BONUS_CAP)) * 2;
    let commit_penalty = -i64::from(metrics.commit_count.saturating_sub(COMMIT_FREE_ALLOWANCE)) * 2;
    let iteration_penalty =
        -i64::from(metrics.iteration_count.saturating_sub(ITERATION_FREE_ALLOWANCE)) * 5;
    let total = (BASE + speed_bonus + fix_bonus + commit_penalty + iteration_penalty).max(0);

    ScoreBreakdown {
        base: BASE,
        speed_bonus,
        fix_bonus,
        commit_penalty,
        iteration_penalty,
        total,
    }
}
