//! End-to-end pipeline scenarios against a local git origin, with scripted
//! sandbox, model, and CI collaborators.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mender::agents::monitor::MonitorConfig;
use mender::config::AgentConfig;
use mender::core::types::{FinalStatus, FixStatus, IterationStatus};
use mender::events::EventBus;
use mender::io::github::{CiProvider, Workflow, WorkflowRun};
use mender::io::llm::LanguageModel;
use mender::io::sandbox::Sandbox;
use mender::pipeline::{PipelineDeps, RunRequest, run_pipeline};
use mender::test_support::{ScriptedCi, ScriptedLlm, ScriptedSandbox, TestRepo, result};

struct Harness {
    _temp: tempfile::TempDir,
    config: AgentConfig,
    bus: Arc<EventBus>,
}

impl Harness {
    fn new(retry_limit: u32) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = AgentConfig {
            retry_limit,
            sandbox_timeout: Duration::from_secs(5),
            work_dir: temp.path().join("tmp"),
            results_dir: temp.path().join("results"),
            log_dir: temp.path().join("logs"),
            ..AgentConfig::default()
        };
        Self {
            _temp: temp,
            config,
            bus: Arc::new(EventBus::new()),
        }
    }

    fn workdir(&self, run_id: &str) -> PathBuf {
        self.config.work_dir.join(run_id)
    }

    fn run(
        &self,
        run_id: &str,
        origin: &TestRepo,
        sandbox: &dyn Sandbox,
        llm: &dyn LanguageModel,
        ci: Option<&dyn CiProvider>,
    ) -> mender::core::report::FinalReport {
        let deps = PipelineDeps {
            sandbox,
            llm,
            ci,
            monitor: MonitorConfig {
                settle: Duration::ZERO,
                poll_interval: Duration::from_millis(1),
                timeout: Duration::from_millis(20),
            },
        };
        run_pipeline(
            &self.config,
            self.bus.clone(),
            &deps,
            RunRequest {
                run_id: run_id.to_string(),
                repo_url: origin.url(),
                team_name: "Team Rocket".to_string(),
                leader_name: "Ada".to_string(),
            },
        )
    }
}

fn python_origin(source: &str) -> TestRepo {
    TestRepo::with_files(&[
        ("requirements.txt", "pytest\n"),
        ("src/app.py", source),
        ("tests/test_app.py", "from src.app import f\n\ndef test_f():\n    assert f() == 1\n"),
    ])
    .expect("origin repo")
}

const SYNTAX_LOG: &str =
    "  File \"src/app.py\", line 1\n    def f()\nSyntaxError: invalid syntax";

#[test]
fn green_on_first_run_reports_passed_without_fixes() {
    let harness = Harness::new(5);
    let origin = python_origin("def f():\n    return 1\n");
    let sandbox = ScriptedSandbox::passing("4 passed in 0.1s\n");
    let llm = ScriptedLlm::replying("[]");

    let report = harness.run("run-green", &origin, &sandbox, &llm, None);

    assert_eq!(report.final_status, FinalStatus::Passed);
    assert_eq!(report.total_failures, 0);
    assert_eq!(report.total_fixes, 0);
    assert_eq!(report.total_commits, 0);
    assert_eq!(report.timeline.len(), 1);
    assert_eq!(report.timeline[0].iteration, 0);
    assert_eq!(report.timeline[0].status, IterationStatus::Passed);
    assert_eq!(report.branch, "TEAM_ROCKET_ADA_AI_FIX");
}

#[test]
fn one_shot_fix_commits_pushes_and_passes() {
    let harness = Harness::new(5);
    let origin = python_origin("def f()\n    return 1\n");
    // Iteration 0 fails, re-test after the fix passes.
    let sandbox = ScriptedSandbox::sequence(
        vec![result(1, "", SYNTAX_LOG)],
        result(0, "4 passed\n", ""),
    );
    let llm = ScriptedLlm::replying(
        r#"[{"file":"src/app.py","line":1,"kind":"SYNTAX","description":"add missing colon",
             "originalCode":"def f()","fixedCode":"def f():",
             "commitMessage":"[AI-AGENT] fix syntax"}]"#,
    );

    let report = harness.run("run-oneshot", &origin, &sandbox, &llm, None);

    assert_eq!(report.final_status, FinalStatus::Passed);
    assert_eq!(report.total_failures, 1);
    assert_eq!(report.total_fixes, 1);
    assert_eq!(report.total_commits, 1);
    assert_eq!(report.fixes.len(), 1);
    assert_eq!(report.fixes[0].status, FixStatus::Fixed);
    let statuses: Vec<IterationStatus> = report.timeline.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![IterationStatus::Failed, IterationStatus::Passed]);

    // The derived branch arrived at the origin.
    let branches = origin.branches().expect("branches");
    assert!(branches.contains(&"TEAM_ROCKET_ADA_AI_FIX".to_string()), "{branches:?}");
}

#[test]
fn degraded_llm_yields_apply_failed_run() {
    let harness = Harness::new(5);
    let origin = python_origin("def f()\n    return 1\n");
    let sandbox = ScriptedSandbox::failing(1, "", SYNTAX_LOG);
    // Non-JSON response degrades to placeholder proposals, all skipped.
    let llm = ScriptedLlm::replying("I cannot produce fixes today.");

    let report = harness.run("run-degraded", &origin, &sandbox, &llm, None);

    assert_eq!(report.final_status, FinalStatus::Failed);
    assert_eq!(report.total_fixes, 0);
    assert!(report.fixes.iter().all(|f| f.status == FixStatus::Skipped));
    let statuses: Vec<IterationStatus> = report.timeline.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![IterationStatus::Failed, IterationStatus::ApplyFailed]
    );
}

#[test]
fn exhausted_budget_caps_timeline_and_penalizes_iterations() {
    let harness = Harness::new(5);
    let origin = python_origin("marker = 1\ndef f()\n    return 1\n");
    let sandbox = ScriptedSandbox::failing(1, "", SYNTAX_LOG);
    // Applicable every iteration; the edit is a no-op so tests keep failing.
    let llm = ScriptedLlm::replying(
        r#"[{"file":"src/app.py","line":1,"kind":"SYNTAX","description":"touch",
             "originalCode":"marker = 1","fixedCode":"marker = 1",
             "commitMessage":"[AI-AGENT] touch"}]"#,
    );

    let report = harness.run("run-budget", &origin, &sandbox, &llm, None);

    assert_eq!(report.final_status, FinalStatus::Failed);
    // Initial analysis + RETRY_LIMIT repair iterations, never more.
    assert_eq!(report.timeline.len(), 6);
    assert_eq!(report.score_breakdown.iteration_penalty, -10);
    assert!(report.timeline[1..]
        .iter()
        .all(|r| r.status == IterationStatus::Failed));
}

#[test]
fn no_workflow_repo_still_produces_valid_report() {
    let harness = Harness::new(1);
    let origin = python_origin("def f()\n    return 1\n");
    let sandbox = ScriptedSandbox::failing(1, "", SYNTAX_LOG);
    let llm = ScriptedLlm::replying(
        r#"[{"file":"src/app.py","line":2,"kind":"SYNTAX","description":"add colon",
             "originalCode":"def f()","fixedCode":"def f():",
             "commitMessage":"[AI-AGENT] fix"}]"#,
    );
    let ci = ScriptedCi::default();

    let report = harness.run("run-noci", &origin, &sandbox, &llm, Some(&ci));

    assert_eq!(report.final_status, FinalStatus::Failed);
    assert_eq!(report.timeline.len(), 2);
    assert_eq!(report.total_fixes, 1);
}

#[test]
fn ci_pass_short_circuits_the_loop() {
    let harness = Harness::new(5);
    let origin = python_origin("def f()\n    return 1\n");
    let sandbox = ScriptedSandbox::failing(1, "", SYNTAX_LOG);
    let llm = ScriptedLlm::replying(
        r#"[{"file":"src/app.py","line":2,"kind":"SYNTAX","description":"add colon",
             "originalCode":"def f()","fixedCode":"def f():",
             "commitMessage":"[AI-AGENT] fix"}]"#,
    );
    let ci = ScriptedCi::default()
        .with_workflows(vec![Workflow {
            id: 9,
            name: "ci".to_string(),
            state: "active".to_string(),
        }])
        .with_runs(vec![vec![WorkflowRun {
            id: 1,
            status: "completed".to_string(),
            conclusion: Some("success".to_string()),
        }]]);

    let report = harness.run("run-cipass", &origin, &sandbox, &llm, Some(&ci));

    assert_eq!(report.final_status, FinalStatus::Passed);
    let statuses: Vec<IterationStatus> = report.timeline.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![IterationStatus::Failed, IterationStatus::CiPassed]
    );
}

#[test]
fn workdir_is_removed_on_every_terminal_path() {
    let harness = Harness::new(1);
    let origin = python_origin("def f():\n    return 1\n");
    let sandbox = ScriptedSandbox::passing("ok\n");
    let llm = ScriptedLlm::replying("[]");

    harness.run("run-clean", &origin, &sandbox, &llm, None);
    assert!(!harness.workdir("run-clean").exists());

    // Failing path cleans up too.
    let failing = ScriptedSandbox::failing(1, "", SYNTAX_LOG);
    let llm = ScriptedLlm::replying("not json");
    harness.run("run-clean2", &origin, &failing, &llm, None);
    assert!(!harness.workdir("run-clean2").exists());
}

#[test]
fn pipeline_done_is_last_and_carries_the_stored_report() {
    let harness = Harness::new(5);
    let origin = python_origin("def f():\n    return 1\n");
    let sandbox = ScriptedSandbox::passing("ok\n");
    let llm = ScriptedLlm::replying("[]");

    let report = harness.run("run-events", &origin, &sandbox, &llm, None);

    let history = harness.bus.history("run-events");
    let last = history.last().expect("events recorded");
    assert_eq!(last.event, "pipeline_done");
    assert_eq!(
        last.data.clone().expect("report payload"),
        serde_json::to_value(&report).expect("serialize report")
    );
    assert_eq!(
        history.iter().filter(|e| e.event == "pipeline_done").count(),
        1
    );

    // The same document landed on disk.
    let stored =
        mender::io::results::read_report(&harness.config.results_dir, "run-events")
            .expect("stored report");
    assert_eq!(stored, report);
}

#[test]
fn clone_failure_becomes_error_timeline_entry() {
    let harness = Harness::new(5);
    let sandbox = ScriptedSandbox::passing("ok\n");
    let llm = ScriptedLlm::replying("[]");
    let deps = PipelineDeps {
        sandbox: &sandbox,
        llm: &llm,
        ci: None,
        monitor: MonitorConfig::default(),
    };

    let report = run_pipeline(
        &harness.config,
        harness.bus.clone(),
        &deps,
        RunRequest {
            run_id: "run-badclone".to_string(),
            repo_url: harness.config.work_dir.join("definitely-missing").display().to_string(),
            team_name: "T".to_string(),
            leader_name: "L".to_string(),
        },
    );

    assert_eq!(report.final_status, FinalStatus::Failed);
    assert_eq!(report.timeline.len(), 1);
    assert_eq!(report.timeline[0].status, IterationStatus::Error);
    assert!(!harness.workdir("run-badclone").exists());
}
