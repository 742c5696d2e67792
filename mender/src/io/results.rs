//! On-disk persistence for final reports (`results/{run_id}.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::report::FinalReport;

/// Path a run's report is persisted at.
pub fn report_path(results_dir: &Path, run_id: &str) -> PathBuf {
    results_dir.join(format!("{run_id}.json"))
}

/// Atomically write the report (temp file + rename).
pub fn write_report(results_dir: &Path, report: &FinalReport) -> Result<PathBuf> {
    let path = report_path(results_dir, &report.run_id);
    debug!(path = %path.display(), "writing final report");
    let mut buf = serde_json::to_string_pretty(report)?;
    buf.push('\n');
    write_atomic(&path, &buf)?;
    Ok(path)
}

/// Load a persisted report.
pub fn read_report(results_dir: &Path, run_id: &str) -> Result<FinalReport> {
    let path = report_path(results_dir, run_id);
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read report {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse report {}", path.display()))
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("report path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    Ok(())
}
