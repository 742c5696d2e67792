//! Patch applier: turn fix proposals into working-tree edits.
//!
//! Application is conservative: an exact substring replacement first, then a
//! whole-line overwrite at the proposal's line number. Anything else fails
//! that one proposal without stopping the batch.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::core::types::{AppliedFix, FixProposal};
use crate::events::RunEvents;

const AGENT: &str = "fixer";

/// Apply proposals in input order. The last write to a line wins; proposals
/// are deliberately not deduplicated against each other.
#[instrument(skip_all, fields(count = proposals.len()))]
pub fn apply_fixes(
    events: &RunEvents,
    workdir: &Path,
    proposals: Vec<FixProposal>,
) -> Result<Vec<AppliedFix>> {
    let mut applied = Vec::with_capacity(proposals.len());
    for proposal in proposals {
        let fix = apply_one(workdir, proposal)?;
        events.emit_data(
            AGENT,
            "fix_applied",
            format!("{:?}: {}", fix.status, fix.proposal.file),
            json!({ "file": fix.proposal.file, "status": fix.status, "reason": fix.reason }),
        );
        applied.push(fix);
    }
    Ok(applied)
}

fn apply_one(workdir: &Path, proposal: FixProposal) -> Result<AppliedFix> {
    if !proposal.is_applicable() {
        debug!(file = %proposal.file, "proposal incomplete, skipping");
        return Ok(AppliedFix::skipped(proposal));
    }

    let path = workdir.join(&proposal.file);
    if !path.is_file() {
        warn!(file = %proposal.file, "target file missing");
        return Ok(AppliedFix::failed(proposal, "File not found"));
    }

    let contents =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;

    if let Some(offset) = contents.find(&proposal.original_code) {
        let mut updated = String::with_capacity(contents.len());
        updated.push_str(&contents[..offset]);
        updated.push_str(&proposal.fixed_code);
        updated.push_str(&contents[offset + proposal.original_code.len()..]);
        write_atomic(&path, &updated)?;
        debug!(file = %proposal.file, "applied by substring match");
        return Ok(AppliedFix::fixed(proposal));
    }

    if let Some(line) = proposal.line {
        let mut lines: Vec<&str> = contents.lines().collect();
        let index = line.saturating_sub(1) as usize;
        if line >= 1 && index < lines.len() {
            lines[index] = proposal.fixed_code.as_str();
            let mut updated = lines.join("\n");
            if contents.ends_with('\n') {
                updated.push('\n');
            }
            write_atomic(&path, &updated)?;
            debug!(file = %proposal.file, line, "applied by line overwrite");
            return Ok(AppliedFix::fixed(proposal));
        }
    }

    warn!(file = %proposal.file, "original snippet not found");
    Ok(AppliedFix::failed(proposal, "Original code not found"))
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension("mender.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FixStatus;
    use crate::events::{EventBus, RunEvents};
    use std::sync::Arc;

    fn events() -> RunEvents {
        RunEvents::new(Arc::new(EventBus::new()), "run-test")
    }

    fn proposal(file: &str, original: &str, fixed: &str, line: Option<u32>) -> FixProposal {
        FixProposal {
            file: file.to_string(),
            line,
            kind: "SYNTAX".to_string(),
            description: "test".to_string(),
            original_code: original.to_string(),
            fixed_code: fixed.to_string(),
            commit_message: "[AI-AGENT] test".to_string(),
        }
    }

    #[test]
    fn substring_replacement_touches_only_the_target() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("a.py"), "x = 1\ndef f()\ny = 2\n").expect("write");

        let applied = apply_fixes(
            &events(),
            temp.path(),
            vec![proposal("a.py", "def f()", "def f():", Some(2))],
        )
        .expect("apply");

        assert_eq!(applied[0].status, FixStatus::Fixed);
        let contents = std::fs::read_to_string(temp.path().join("a.py")).expect("read");
        assert_eq!(contents, "x = 1\ndef f():\ny = 2\n");
    }

    #[test]
    fn replaces_only_first_occurrence() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("a.py"), "foo()\nfoo()\n").expect("write");

        apply_fixes(
            &events(),
            temp.path(),
            vec![proposal("a.py", "foo()", "bar()", None)],
        )
        .expect("apply");

        let contents = std::fs::read_to_string(temp.path().join("a.py")).expect("read");
        assert_eq!(contents, "bar()\nfoo()\n");
    }

    #[test]
    fn falls_back_to_line_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("a.py"), "one\ntwo\nthree\n").expect("write");

        let applied = apply_fixes(
            &events(),
            temp.path(),
            vec![proposal("a.py", "not in file", "TWO", Some(2))],
        )
        .expect("apply");

        assert_eq!(applied[0].status, FixStatus::Fixed);
        let contents = std::fs::read_to_string(temp.path().join("a.py")).expect("read");
        assert_eq!(contents, "one\nTWO\nthree\n");
    }

    #[test]
    fn line_out_of_bounds_fails_with_reason() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("a.py"), "only\n").expect("write");

        let applied = apply_fixes(
            &events(),
            temp.path(),
            vec![proposal("a.py", "missing", "x", Some(9))],
        )
        .expect("apply");

        assert_eq!(applied[0].status, FixStatus::Failed);
        assert_eq!(applied[0].reason.as_deref(), Some("Original code not found"));
        // File untouched.
        let contents = std::fs::read_to_string(temp.path().join("a.py")).expect("read");
        assert_eq!(contents, "only\n");
    }

    #[test]
    fn missing_file_fails_with_reason() {
        let temp = tempfile::tempdir().expect("tempdir");
        let applied = apply_fixes(
            &events(),
            temp.path(),
            vec![proposal("ghost.py", "a", "b", None)],
        )
        .expect("apply");
        assert_eq!(applied[0].status, FixStatus::Failed);
        assert_eq!(applied[0].reason.as_deref(), Some("File not found"));
    }

    #[test]
    fn incomplete_proposal_is_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("a.py"), "x\n").expect("write");
        let applied = apply_fixes(
            &events(),
            temp.path(),
            vec![proposal("a.py", "", "b", None)],
        )
        .expect("apply");
        assert_eq!(applied[0].status, FixStatus::Skipped);
    }

    #[test]
    fn later_proposals_see_earlier_writes() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("a.py"), "alpha\n").expect("write");

        let applied = apply_fixes(
            &events(),
            temp.path(),
            vec![
                proposal("a.py", "alpha", "beta", None),
                proposal("a.py", "beta", "gamma", None),
            ],
        )
        .expect("apply");

        assert!(applied.iter().all(|f| f.status == FixStatus::Fixed));
        let contents = std::fs::read_to_string(temp.path().join("a.py")).expect("read");
        assert_eq!(contents, "gamma\n");
    }
}
