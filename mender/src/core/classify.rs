//! Test-log classification: raw output → structured [`ErrorRecord`]s.
//!
//! Pure: the same log always yields the same records. Rules are walked in
//! declaration order and the first match wins; lines that match nothing and
//! mention neither "Error" nor "FAIL" are discarded.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::core::types::{ErrorKind, ErrorRecord};

struct Rule {
    kind: ErrorKind,
    trigger: Regex,
}

fn rule(kind: ErrorKind, pattern: &str) -> Rule {
    let trigger = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("classifier pattern should be valid");
    Rule { kind, trigger }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            ErrorKind::Syntax,
            r"SyntaxError|unexpected token|invalid syntax|EOL while scanning",
        ),
        rule(
            ErrorKind::Indentation,
            r"IndentationError|unexpected indent|expected an indented block",
        ),
        rule(
            ErrorKind::TypeError,
            r"TypeError|type .* mismatch|cannot read propert",
        ),
        rule(
            ErrorKind::Import,
            r"ImportError|ModuleNotFoundError|Cannot find module|no module named",
        ),
        rule(
            ErrorKind::Logic,
            r"AssertionError|Expected .* to (equal|be|match)|assert",
        ),
        rule(ErrorKind::Linting, r"eslint|lint|prettier|warning .* rule"),
        rule(ErrorKind::Runtime, r"ReferenceError|NameError|is not defined"),
    ]
});

// Python traceback frames: File "src/a.py", line 3
static PY_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("valid regex"));

// path:line:col, possibly inside a stack-frame prefix like "at foo (src/a.js:3:7)"
static COL_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\w./\\-]+):(\d+):(\d+)").expect("valid regex"));

// path.ext:line
static EXT_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\w./\\-]+\.[A-Za-z]+):(\d+)").expect("valid regex"));

/// Parse a raw test log into deduplicated error records.
///
/// Python-style tracebacks report the location on a frame line *before* the
/// error line, so the most recent frame location is remembered and attached
/// to the next record that carries none of its own.
pub fn classify(raw_log: &str) -> Vec<ErrorRecord> {
    let mut records = Vec::new();
    let mut seen: HashSet<(Option<String>, Option<u32>, ErrorKind)> = HashSet::new();
    let mut pending_frame: Option<(String, u32)> = None;

    for line in raw_log.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        if let Some(caps) = PY_LOCATION.captures(line) {
            if let Ok(line_no) = caps[2].parse() {
                pending_frame = Some((caps[1].to_string(), line_no));
            }
        }
        let Some(kind) = classify_line(line) else {
            continue;
        };
        let (mut file, mut line_no) = extract_location(line);
        if file.is_none() {
            if let Some((frame_file, frame_line)) = pending_frame.take() {
                file = Some(frame_file);
                line_no = Some(frame_line);
            }
        }
        let key = (file.clone(), line_no, kind);
        if !seen.insert(key) {
            continue;
        }
        records.push(ErrorRecord {
            kind,
            file,
            line: line_no,
            raw_message: line.to_string(),
        });
    }

    records
}

fn classify_line(line: &str) -> Option<ErrorKind> {
    for rule in RULES.iter() {
        if rule.trigger.is_match(line) {
            return Some(rule.kind);
        }
    }
    // Keep unmatched lines only when they clearly describe a failure.
    if line.contains("Error") || line.contains("FAIL") {
        return Some(ErrorKind::Unknown);
    }
    None
}

fn extract_location(line: &str) -> (Option<String>, Option<u32>) {
    if let Some(caps) = PY_LOCATION.captures(line) {
        return (
            Some(caps[1].to_string()),
            caps[2].parse().ok(),
        );
    }
    if let Some(caps) = COL_LOCATION.captures(line) {
        return (Some(caps[1].to_string()), caps[2].parse().ok());
    }
    if let Some(caps) = EXT_LOCATION.captures(line) {
        return (Some(caps[1].to_string()), caps[2].parse().ok());
    }
    (None, None)
}
