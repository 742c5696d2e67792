//! Committer: land applied fixes on the derived branch and push it.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::core::types::{AppliedFix, FixStatus};
use crate::events::RunEvents;
use crate::io::git::Git;

const AGENT: &str = "committer";

/// Mandatory prefix on every agent commit message.
pub const COMMIT_PREFIX: &str = "[AI-AGENT]";

/// Result of one commit/push round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub commits: u32,
    pub pushed: bool,
}

/// Commit `Fixed` fixes grouped by file and push the branch.
///
/// Files are committed in lexicographic order so repeated runs produce the
/// same history. With nothing fixed, no commit and no push happen.
/// Push failures propagate to the orchestrator as iteration-level errors.
#[instrument(skip_all, fields(branch))]
pub fn commit_and_push(
    events: &RunEvents,
    workdir: &Path,
    branch: &str,
    fixes: &[AppliedFix],
    token: Option<&str>,
) -> Result<CommitOutcome> {
    let git = Git::new(workdir);
    git.configure_identity()?;
    git.checkout_or_create(branch)
        .with_context(|| format!("prepare branch {branch}"))?;
    events.emit(AGENT, "branch_ready", format!("On branch {branch}"));

    let mut by_file: BTreeMap<&str, Vec<&AppliedFix>> = BTreeMap::new();
    for fix in fixes.iter().filter(|f| f.status == FixStatus::Fixed) {
        by_file.entry(fix.proposal.file.as_str()).or_default().push(fix);
    }

    let mut commits = 0u32;
    for (file, file_fixes) in &by_file {
        git.add(file).with_context(|| format!("stage {file}"))?;
        let message = commit_message(file_fixes);
        if git.commit_staged(&message)? {
            commits += 1;
            debug!(file, "committed");
            events.emit_data(
                AGENT,
                "committed",
                format!("Committed {file}"),
                json!({ "file": file, "message": message }),
            );
        }
    }

    if commits == 0 {
        debug!("nothing fixed, skipping push");
        return Ok(CommitOutcome {
            commits: 0,
            pushed: false,
        });
    }

    if let Some(token) = token {
        git.ensure_origin_token(token)?;
    }
    git.push(branch).context("push branch")?;
    info!(commits, branch, "pushed fixes");
    events.emit_data(
        AGENT,
        "pushed",
        format!("Pushed {commits} commit(s) to {branch}"),
        json!({ "commits": commits, "branch": branch }),
    );

    Ok(CommitOutcome {
        commits,
        pushed: true,
    })
}

fn commit_message(fixes: &[&AppliedFix]) -> String {
    let details: Vec<String> = fixes
        .iter()
        .map(|fix| {
            let location = match fix.proposal.line {
                Some(line) => format!("{}:{line}", fix.proposal.file),
                None => fix.proposal.file.clone(),
            };
            let kind = if fix.proposal.kind.is_empty() {
                "UNKNOWN"
            } else {
                fix.proposal.kind.as_str()
            };
            format!("{kind} {location} {}", fix.proposal.description).trim_end().to_string()
        })
        .collect();
    format!("{COMMIT_PREFIX} {}", details.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FixProposal;
    use crate::events::{EventBus, RunEvents};
    use std::process::Command;
    use std::sync::Arc;

    fn events() -> RunEvents {
        RunEvents::new(Arc::new(EventBus::new()), "run-test")
    }

    fn fixed(file: &str, line: u32, description: &str) -> AppliedFix {
        AppliedFix::fixed(FixProposal {
            file: file.to_string(),
            line: Some(line),
            kind: "SYNTAX".to_string(),
            description: description.to_string(),
            original_code: "a".to_string(),
            fixed_code: "b".to_string(),
            commit_message: String::new(),
        })
    }

    fn init_repo(root: &Path) {
        for args in [
            vec!["init"],
            vec!["config", "user.name", "test"],
            vec!["config", "user.email", "test@example.com"],
        ] {
            let out = Command::new("git")
                .args(&args)
                .current_dir(root)
                .output()
                .expect("git");
            assert!(out.status.success(), "git {args:?} failed");
        }
        std::fs::write(root.join("a.py"), "one\n").expect("write");
        std::fs::write(root.join("b.py"), "two\n").expect("write");
        for args in [vec!["add", "-A"], vec!["commit", "-m", "initial"]] {
            let out = Command::new("git")
                .args(&args)
                .current_dir(root)
                .output()
                .expect("git");
            assert!(out.status.success(), "git {args:?} failed");
        }
    }

    fn log_messages(root: &Path) -> Vec<String> {
        let out = Command::new("git")
            .args(["log", "--pretty=%s"])
            .current_dir(root)
            .output()
            .expect("git log");
        String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn commit_message_joins_tuples_with_semicolons() {
        let first = fixed("src/a.py", 3, "add colon");
        let second = fixed("src/a.py", 9, "rename var");
        let message = commit_message(&[&first, &second]);
        assert_eq!(
            message,
            "[AI-AGENT] SYNTAX src/a.py:3 add colon; SYNTAX src/a.py:9 rename var"
        );
    }

    #[test]
    fn commits_one_per_file_without_pushing_when_no_remote_needed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        init_repo(root);
        std::fs::write(root.join("a.py"), "one fixed\n").expect("write");
        std::fs::write(root.join("b.py"), "two fixed\n").expect("write");

        // No Fixed entries for b.py: only a.py gets committed.
        let fixes = vec![fixed("a.py", 1, "edit"), {
            let mut skipped = fixed("b.py", 1, "edit");
            skipped.status = FixStatus::Skipped;
            skipped
        }];

        // Push fails without a remote; verify the commit happened anyway.
        let err = commit_and_push(&events(), root, "TEAM_ADA_AI_FIX", &fixes, None).unwrap_err();
        assert!(err.to_string().contains("push"));

        let messages = log_messages(root);
        assert!(messages[0].starts_with("[AI-AGENT] SYNTAX a.py:1"));
        assert_eq!(messages.iter().filter(|m| m.starts_with("[AI-AGENT]")).count(), 1);
    }

    #[test]
    fn no_fixed_fixes_skips_commit_and_push_silently() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        init_repo(root);

        let mut skipped = fixed("a.py", 1, "edit");
        skipped.status = FixStatus::Skipped;
        let outcome =
            commit_and_push(&events(), root, "TEAM_ADA_AI_FIX", &[skipped], None).expect("commit");
        assert_eq!(outcome, CommitOutcome { commits: 0, pushed: false });
        assert_eq!(log_messages(root).len(), 1);
    }
}
