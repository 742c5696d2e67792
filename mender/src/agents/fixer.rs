//! Fixer: turn a failing test log into concrete patch proposals.
//!
//! Classifies the log, enriches each error with nearby source lines, asks
//! the language model for a JSON array of proposals, and parses that array
//! out of whatever prose surrounds it. When the model chain is exhausted or
//! returns nothing usable, the fixer degrades to placeholder proposals so
//! the run can continue and report what it saw.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::classify::classify;
use crate::core::types::{ErrorRecord, FixProposal};
use crate::events::RunEvents;
use crate::io::llm::{ChatMessage, LanguageModel, LlmError};

const AGENT: &str = "fixer";

/// Lines of source context included on each side of an error line.
const CONTEXT_RADIUS: u32 = 5;

/// The raw log is clipped to its tail before prompting; failures summarize
/// at the end of test output.
const PROMPT_LOG_LIMIT: usize = 8_000;

const SYSTEM_PROMPT: &str = "You are an automated repair agent for continuous \
integration failures. You read test output and produce minimal, targeted \
source fixes. You always answer with a single JSON array and nothing else.";

const USER_TEMPLATE: &str = include_str!("prompts/fixer.md");

#[derive(Debug, Clone, Serialize)]
struct EnrichedError {
    kind: &'static str,
    file: Option<String>,
    line: Option<u32>,
    message: String,
    context: Option<String>,
}

/// Generate fix proposals for a failing test log.
///
/// Errors from the model other than rate-limit exhaustion propagate; the
/// orchestrator converts them into a terminal `ERROR` iteration.
pub fn generate_fixes(
    events: &RunEvents,
    llm: &dyn LanguageModel,
    workdir: &Path,
    raw_log: &str,
) -> Result<Vec<FixProposal>> {
    let errors = classify(raw_log);
    if errors.is_empty() {
        debug!("no classifiable errors in log");
        return Ok(Vec::new());
    }

    events.emit(
        AGENT,
        "fix_generate_start",
        format!("Generating fixes for {} error(s)", errors.len()),
    );

    let enriched: Vec<EnrichedError> = errors
        .iter()
        .map(|record| enrich(workdir, record))
        .collect();
    let prompt = render_prompt(raw_log, &enriched)?;
    let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];

    let (proposals, degraded) = match llm.complete(&messages) {
        Ok(response) => match extract_proposals(&response) {
            Some(proposals) => (proposals, false),
            None => {
                warn!("model response contained no JSON array, degrading");
                (placeholder_proposals(&errors), true)
            }
        },
        Err(LlmError::Exhausted) | Err(LlmError::NotConfigured) => {
            warn!("no model available, degrading to placeholders");
            (placeholder_proposals(&errors), true)
        }
        Err(err) => return Err(err).context("language model completion"),
    };

    info!(count = proposals.len(), degraded, "fix generation finished");
    events.emit_data(
        AGENT,
        "fix_generate_done",
        format!("Generated {} proposal(s)", proposals.len()),
        serde_json::json!({ "count": proposals.len(), "degraded": degraded }),
    );
    Ok(proposals)
}

fn render_prompt(raw_log: &str, errors: &[EnrichedError]) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("fixer", USER_TEMPLATE)
        .expect("fixer template should be valid");
    let template = env.get_template("fixer").expect("template registered");
    let rendered = template
        .render(context! {
            raw_log => tail(raw_log, PROMPT_LOG_LIMIT),
            errors => errors,
        })
        .context("render fixer prompt")?;
    Ok(rendered)
}

fn tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Attach ±[`CONTEXT_RADIUS`] numbered source lines around the error line.
fn enrich(workdir: &Path, record: &ErrorRecord) -> EnrichedError {
    let context = record.file.as_ref().and_then(|file| {
        let contents = fs::read_to_string(workdir.join(file)).ok()?;
        let line = record.line?;
        Some(numbered_window(&contents, line))
    });
    EnrichedError {
        kind: record.kind.as_str(),
        file: record.file.clone(),
        line: record.line,
        message: record.raw_message.clone(),
        context,
    }
}

fn numbered_window(contents: &str, line: u32) -> String {
    let lines: Vec<&str> = contents.lines().collect();
    let start = line.saturating_sub(CONTEXT_RADIUS + 1) as usize;
    let end = ((line + CONTEXT_RADIUS) as usize).min(lines.len());
    lines[start..end]
        .iter()
        .enumerate()
        .map(|(offset, text)| format!("{:>4} | {}", start + offset + 1, text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pull the first JSON array of proposals out of a model response.
///
/// Tolerates markdown fences and surrounding prose: everything between the
/// first `[` and the last `]` is tried, then the stripped response as-is.
fn extract_proposals(response: &str) -> Option<Vec<FixProposal>> {
    let stripped = strip_fences(response);
    let candidate = match (stripped.find('['), stripped.rfind(']')) {
        (Some(start), Some(end)) if start < end => &stripped[start..=end],
        _ => return None,
    };
    if let Ok(proposals) = serde_json::from_str::<Vec<FixProposal>>(candidate) {
        return Some(proposals);
    }
    // Some models wrap the array in an object; accept the first array value.
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(stripped) {
        for value in map.into_values() {
            if value.is_array() {
                if let Ok(proposals) = serde_json::from_value::<Vec<FixProposal>>(value) {
                    return Some(proposals);
                }
            }
        }
    }
    None
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// One inapplicable proposal per error; the applier marks these `Skipped`.
fn placeholder_proposals(errors: &[ErrorRecord]) -> Vec<FixProposal> {
    errors
        .iter()
        .map(|record| {
            let file = record.file.clone().unwrap_or_default();
            let location = if file.is_empty() {
                "unknown location".to_string()
            } else {
                file.clone()
            };
            FixProposal {
                file,
                line: record.line,
                kind: record.kind.as_str().to_string(),
                description: format!("Manual review needed: {}", record.raw_message),
                original_code: String::new(),
                fixed_code: String::new(),
                commit_message: format!(
                    "[AI-AGENT] Proposed fix for {} in {location}",
                    record.kind.as_str()
                ),
            }
        })
        .collect()
}
