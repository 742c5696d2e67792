//! Shared application state: the run registry and the event bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use mender::config::AgentConfig;
use mender::core::report::FinalReport;
use mender::core::types::FinalStatus;
use mender::events::EventBus;
use serde::Serialize;

/// Lifecycle of a registered run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Error,
}

impl RunStatus {
    /// Map a finished report onto the registry lifecycle.
    pub fn from_report(report: &FinalReport) -> Self {
        match report.final_status {
            FinalStatus::Passed => RunStatus::Completed,
            FinalStatus::Failed => RunStatus::Failed,
        }
    }
}

/// One registry entry; lives for the process lifetime.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEntry {
    pub run_id: String,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub branch: String,
    pub status: RunStatus,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip)]
    pub report: Option<FinalReport>,
}

/// Shared state accessible from all request handlers and pipeline tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub bus: Arc<EventBus>,
    registry: Arc<Mutex<HashMap<String, RunEntry>>>,
    started: Instant,
}

impl AppState {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config: Arc::new(config),
            bus: Arc::new(EventBus::new()),
            registry: Arc::new(Mutex::new(HashMap::new())),
            started: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Register a freshly submitted run as `running`.
    pub fn insert_run(
        &self,
        run_id: &str,
        repo_url: &str,
        team_name: &str,
        leader_name: &str,
        branch: &str,
    ) {
        let entry = RunEntry {
            run_id: run_id.to_string(),
            repo_url: repo_url.to_string(),
            team_name: team_name.to_string(),
            leader_name: leader_name.to_string(),
            branch: branch.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            report: None,
        };
        self.registry
            .lock()
            .expect("registry poisoned")
            .insert(run_id.to_string(), entry);
    }

    /// Move a run to a terminal state; terminal entries are never mutated
    /// again.
    pub fn finish_run(&self, run_id: &str, status: RunStatus, report: Option<FinalReport>) {
        let mut registry = self.registry.lock().expect("registry poisoned");
        if let Some(entry) = registry.get_mut(run_id) {
            if entry.status != RunStatus::Running {
                return;
            }
            entry.status = status;
            entry.completed_at = Some(Utc::now().to_rfc3339());
            entry.report = report;
        }
    }

    pub fn get_run(&self, run_id: &str) -> Option<RunEntry> {
        self.registry
            .lock()
            .expect("registry poisoned")
            .get(run_id)
            .cloned()
    }

    /// All known runs, newest first.
    pub fn summaries(&self) -> Vec<RunEntry> {
        let registry = self.registry.lock().expect("registry poisoned");
        let mut entries: Vec<RunEntry> = registry.values().cloned().collect();
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        entries
    }
}
