//! Orchestrator: drive one run through the analyze / fix / commit / verify
//! loop and leave a final report behind.
//!
//! The loop is strictly sequential; every step mutates the shared working
//! tree. Errors escaping any agent land here, become an `ERROR` timeline
//! entry, and finalize the run instead of crashing it. The working tree is
//! removed on every exit path, including unwinds.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use crate::agents::analyzer::{self, Analysis};
use crate::agents::applier::apply_fixes;
use crate::agents::committer::commit_and_push;
use crate::agents::fixer::generate_fixes;
use crate::agents::monitor::{MonitorConfig, observe_ci};
use crate::config::AgentConfig;
use crate::core::branch::derive_branch;
use crate::core::classify::classify;
use crate::core::report::{FinalReport, ReportFix, format_duration_ms, now_rfc3339};
use crate::core::score::{RunMetrics, score};
use crate::core::types::{AppliedFix, FinalStatus, FixStatus, IterationRecord, IterationStatus};
use crate::events::{EventBus, RunEvents};
use crate::io::github::{CiProvider, GitHubCi, parse_repo_url};
use crate::io::llm::{FallbackChain, HttpChatModel, LanguageModel};
use crate::io::results::write_report;
use crate::io::sandbox::{Sandbox, select_sandbox};

const AGENT: &str = "orchestrator";

/// A submitted run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: String,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
}

/// Collaborators injected into the loop; tests wire scripted fakes.
pub struct PipelineDeps<'a> {
    pub sandbox: &'a dyn Sandbox,
    pub llm: &'a dyn LanguageModel,
    pub ci: Option<&'a dyn CiProvider>,
    pub monitor: MonitorConfig,
}

/// Removes the transient working tree on drop, so cleanup survives both
/// early returns and unwinds.
struct WorkdirGuard {
    path: PathBuf,
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(err) = fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %err, "failed to remove workdir");
            }
        }
    }
}

struct LoopState {
    timeline: Vec<IterationRecord>,
    fixes: Vec<AppliedFix>,
    commits: u32,
    failures: u32,
    current_iteration: u32,
}

impl LoopState {
    fn new() -> Self {
        Self {
            timeline: Vec::new(),
            fixes: Vec::new(),
            commits: 0,
            failures: 0,
            current_iteration: 0,
        }
    }

    fn record(&mut self, iteration: u32, status: IterationStatus) {
        self.timeline.push(IterationRecord {
            iteration,
            status,
            timestamp: now_rfc3339(),
        });
    }

    fn fixed_count(&self) -> u32 {
        self.fixes
            .iter()
            .filter(|f| f.status == FixStatus::Fixed)
            .count() as u32
    }
}

/// Run the full pipeline with production collaborators.
pub fn run_managed(config: &AgentConfig, bus: Arc<EventBus>, request: RunRequest) -> FinalReport {
    let sandbox = select_sandbox(&request.run_id);
    let llm = build_llm_chain(config);
    let github = parse_repo_url(&request.repo_url)
        .map(|(owner, repo)| GitHubCi::new(owner, repo, config.github_token.clone()));

    let deps = PipelineDeps {
        sandbox: sandbox.as_ref(),
        llm: &llm,
        ci: github.as_ref().map(|g| g as &dyn CiProvider),
        monitor: MonitorConfig {
            timeout: config.ci_timeout,
            settle: config.ci_settle,
            poll_interval: config.ci_poll_interval,
        },
    };
    run_pipeline(config, bus, &deps, request)
}

/// Ordered model chain from config; an absent API key yields an empty chain,
/// which the fixer treats as degraded mode.
fn build_llm_chain(config: &AgentConfig) -> FallbackChain {
    let Some(api_key) = config.llm_api_key.clone() else {
        return FallbackChain::new(Vec::new());
    };
    let models = config
        .llm_models
        .iter()
        .map(|model| {
            Box::new(HttpChatModel::new(
                config.llm_api_url.clone(),
                api_key.clone(),
                model.clone(),
            )) as Box<dyn LanguageModel>
        })
        .collect();
    FallbackChain::new(models)
}

/// Drive one run to a terminal report.
#[instrument(skip_all, fields(run_id = %request.run_id))]
pub fn run_pipeline(
    config: &AgentConfig,
    bus: Arc<EventBus>,
    deps: &PipelineDeps<'_>,
    request: RunRequest,
) -> FinalReport {
    let started = Instant::now();
    let events = RunEvents::new(bus, request.run_id.clone());
    let branch = derive_branch(&request.team_name, &request.leader_name);
    events.emit_progress(
        AGENT,
        "pipeline_start",
        format!("Healing {} on branch {branch}", request.repo_url),
        0,
    );

    let workdir = config.work_dir.join(&request.run_id);
    let guard = WorkdirGuard {
        path: workdir.clone(),
    };

    let mut state = LoopState::new();
    let final_status = match heal_loop(config, deps, &events, &request, &branch, &workdir, &mut state)
    {
        Ok(status) => status,
        Err(err) => {
            error!(error = %format!("{err:#}"), "pipeline error");
            events.emit(AGENT, "pipeline_error", format!("{err:#}"));
            state.record(state.current_iteration, IterationStatus::Error);
            FinalStatus::Failed
        }
    };

    // The working tree must be gone before the terminal event goes out.
    drop(guard);

    let report = build_report(&request, &branch, &state, final_status, started);
    if let Err(err) = write_report(&config.results_dir, &report) {
        warn!(error = %format!("{err:#}"), "failed to persist report");
    }

    let data = serde_json::to_value(&report).unwrap_or_default();
    events.emit_data(
        AGENT,
        "pipeline_done",
        format!("Run finished: {:?}", final_status),
        data,
    );
    info!(status = ?final_status, "pipeline done");
    report
}

#[allow(clippy::too_many_arguments)]
fn heal_loop(
    config: &AgentConfig,
    deps: &PipelineDeps<'_>,
    events: &RunEvents,
    request: &RunRequest,
    branch: &str,
    workdir: &Path,
    state: &mut LoopState,
) -> Result<FinalStatus> {
    analyzer::clone_repo(
        events,
        workdir,
        &request.repo_url,
        config.github_token.as_deref(),
    )?;

    let analysis: Analysis =
        analyzer::analyze(events, deps.sandbox, workdir, config.sandbox_timeout)
            .context("initial analysis")?;

    if analysis.tests.passed {
        state.record(0, IterationStatus::Passed);
        return Ok(FinalStatus::Passed);
    }
    state.record(0, IterationStatus::Failed);
    state.failures = classify(&analysis.tests.log).len() as u32;

    let mut log = analysis.tests.log;
    for iteration in 1..=config.retry_limit {
        state.current_iteration = iteration;
        events.emit_progress(
            AGENT,
            "iteration_start",
            format!("Repair iteration {iteration}/{}", config.retry_limit),
            (iteration * 100 / (config.retry_limit + 1)).min(99) as u8,
        );

        let proposals = generate_fixes(events, deps.llm, workdir, &log)?;
        if proposals.is_empty() {
            warn!(iteration, "no fix proposals");
            state.record(iteration, IterationStatus::NoFixes);
            return Ok(FinalStatus::Failed);
        }

        let applied = apply_fixes(events, workdir, proposals)?;
        let applied_now = applied
            .iter()
            .filter(|f| f.status == FixStatus::Fixed)
            .count();
        if applied_now == 0 {
            warn!(iteration, "no proposals could be applied");
            state.fixes.extend(applied);
            state.record(iteration, IterationStatus::ApplyFailed);
            return Ok(FinalStatus::Failed);
        }

        let outcome = commit_and_push(
            events,
            workdir,
            branch,
            &applied,
            config.github_token.as_deref(),
        )?;
        state.commits += outcome.commits;
        state.fixes.extend(applied);

        let tests = analyzer::run_tests(
            events,
            deps.sandbox,
            workdir,
            &analysis.runtime,
            config.sandbox_timeout,
        )?;
        if tests.passed {
            state.record(iteration, IterationStatus::Passed);
            return Ok(FinalStatus::Passed);
        }
        log = tests.log;

        // Tests still failing in-sandbox; a green remote pipeline also counts
        // as healed. CI observation is optional and skipped on error.
        if let Some(ci) = deps.ci {
            match observe_ci(events, ci, branch, &deps.monitor) {
                Ok(report) if report.passed => {
                    state.record(iteration, IterationStatus::CiPassed);
                    return Ok(FinalStatus::Passed);
                }
                Ok(report) => {
                    info!(conclusion = %report.conclusion, "ci not green, continuing");
                }
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "ci observation failed, skipping");
                }
            }
        }

        state.record(iteration, IterationStatus::Failed);
    }

    Ok(FinalStatus::Failed)
}

fn build_report(
    request: &RunRequest,
    branch: &str,
    state: &LoopState,
    final_status: FinalStatus,
    started: Instant,
) -> FinalReport {
    let total_time_ms = started.elapsed().as_millis() as u64;
    let iteration_count = state
        .timeline
        .iter()
        .map(|r| r.iteration)
        .max()
        .unwrap_or(0);
    let breakdown = score(RunMetrics {
        total_time_ms,
        commit_count: state.commits,
        fix_count: state.fixed_count(),
        iteration_count,
    });

    FinalReport {
        run_id: request.run_id.clone(),
        repo_url: request.repo_url.clone(),
        team_name: request.team_name.clone(),
        leader_name: request.leader_name.clone(),
        branch: branch.to_string(),
        total_failures: state.failures,
        total_fixes: state.fixed_count(),
        total_commits: state.commits,
        final_status,
        total_time: format_duration_ms(total_time_ms),
        total_time_ms,
        score_breakdown: breakdown,
        fixes: state.fixes.iter().map(ReportFix::from).collect(),
        timeline: state.timeline.clone(),
        generated_at: now_rfc3339(),
    }
}
