//! Monitor: observe the remote CI pipeline for the pushed branch.

use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::events::RunEvents;
use crate::io::github::CiProvider;

const AGENT: &str = "monitor";

/// Polling cadence; injectable so tests run in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Grace period before the first poll, giving CI time to register the push.
    pub settle: Duration,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Terminal observation of the branch's CI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiReport {
    pub triggered: bool,
    pub passed: bool,
    pub conclusion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CiReport {
    fn no_ci() -> Self {
        Self {
            triggered: false,
            passed: false,
            conclusion: "no_ci".to_string(),
            reason: Some("No workflows configured".to_string()),
        }
    }

    fn timeout(triggered: bool) -> Self {
        Self {
            triggered,
            passed: false,
            conclusion: "timeout".to_string(),
            reason: None,
        }
    }
}

/// Discover the branch's workflow, dispatch it when possible, and poll until
/// a run completes or the timeout expires.
///
/// Individual poll errors are logged and polling continues; only the initial
/// workflow listing can fail the observation as a whole.
#[instrument(skip_all, fields(branch))]
pub fn observe_ci(
    events: &RunEvents,
    ci: &dyn CiProvider,
    branch: &str,
    config: &MonitorConfig,
) -> Result<CiReport> {
    events.emit(AGENT, "ci_trigger_start", "Looking up CI workflows");
    let workflows = ci.list_workflows()?;
    if workflows.is_empty() {
        info!("no workflows configured");
        return Ok(CiReport::no_ci());
    }

    let workflow = workflows
        .iter()
        .find(|w| w.state == "active")
        .unwrap_or(&workflows[0]);
    debug!(workflow = %workflow.name, "selected workflow");

    let mut triggered = false;
    match ci.dispatch(workflow.id, branch) {
        Ok(true) => {
            triggered = true;
            events.emit_data(
                AGENT,
                "ci_triggered",
                format!("Dispatched workflow {}", workflow.name),
                json!({ "workflow": workflow.name, "branch": branch }),
            );
        }
        // Not dispatchable: a push-triggered run may still appear.
        Ok(false) => debug!("workflow dispatch unsupported, waiting for auto-trigger"),
        Err(err) => warn!(error = %err, "workflow dispatch failed, waiting for auto-trigger"),
    }

    std::thread::sleep(config.settle);
    events.emit(AGENT, "ci_poll_start", "Polling for workflow runs");

    let deadline = Instant::now() + config.timeout;
    loop {
        match ci.runs_for_branch(branch) {
            Ok(runs) => {
                if let Some(completed) = runs.iter().find(|r| r.status == "completed") {
                    let conclusion = completed
                        .conclusion
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string());
                    let passed = conclusion == "success";
                    info!(%conclusion, passed, "workflow run completed");
                    events.emit_data(
                        AGENT,
                        "ci_status",
                        format!("CI completed: {conclusion}"),
                        json!({ "status": "completed", "conclusion": conclusion }),
                    );
                    return Ok(CiReport {
                        triggered,
                        passed,
                        conclusion,
                        reason: None,
                    });
                }
                let latest = runs.first().map(|r| r.status.clone());
                events.emit_data(
                    AGENT,
                    "ci_status",
                    "CI still running",
                    json!({ "status": latest }),
                );
            }
            Err(err) => warn!(error = %err, "poll failed, retrying"),
        }

        if Instant::now() + config.poll_interval > deadline {
            info!("ci observation timed out");
            return Ok(CiReport::timeout(triggered));
        }
        std::thread::sleep(config.poll_interval);
    }
}
