//! GitHub Actions REST binding for CI observation.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "mender-agent";

/// Parse `https://github.com/{owner}/{repo}[.git]` into its components.
pub fn parse_repo_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("https://github.com/")?;
    let rest = rest.trim_end_matches('/');
    let mut parts = rest.splitn(2, '/');
    let owner = parts.next()?.trim();
    let repo = parts.next()?.trim().trim_end_matches(".git");
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

/// A workflow definition known to the remote repository.
#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    pub id: u64,
    pub name: String,
    pub state: String,
}

/// One workflow run, as returned most-recent-first by the runs listing.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub status: String,
    pub conclusion: Option<String>,
}

/// CI capability the monitor consumes; production binds GitHub Actions,
/// tests bind a scripted provider.
pub trait CiProvider: Send + Sync {
    fn list_workflows(&self) -> Result<Vec<Workflow>>;
    /// Attempt a `workflow_dispatch` on the branch. `Ok(false)` means the
    /// workflow does not support dispatch; that is not an error.
    fn dispatch(&self, workflow_id: u64, branch: &str) -> Result<bool>;
    /// Workflow runs for the branch, most recent first.
    fn runs_for_branch(&self, branch: &str) -> Result<Vec<WorkflowRun>>;
}

#[derive(Deserialize)]
struct WorkflowList {
    workflows: Vec<Workflow>,
}

#[derive(Deserialize)]
struct WorkflowRunList {
    workflow_runs: Vec<WorkflowRun>,
}

/// GitHub Actions binding over the REST v3 API.
pub struct GitHubCi {
    client: reqwest::blocking::Client,
    api_base: String,
    owner: String,
    repo: String,
    token: Option<String>,
}

impl GitHubCi {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            token,
        }
    }

    /// Point the binding at a different API root (tests, GHES).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn get(&self, path: &str) -> Result<reqwest::blocking::Response> {
        let mut request = self
            .client
            .get(format!("{}{path}", self.api_base))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        request.send().context("github api request")
    }
}

impl CiProvider for GitHubCi {
    fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let path = format!("/repos/{}/{}/actions/workflows", self.owner, self.repo);
        let response = self.get(&path)?;
        let status = response.status();
        let body = response.text().context("read workflow list")?;
        if !status.is_success() {
            return Err(anyhow!("workflow list failed ({status}): {}", body.trim()));
        }
        let list: WorkflowList = serde_json::from_str(&body).context("parse workflow list")?;
        debug!(count = list.workflows.len(), "listed workflows");
        Ok(list.workflows)
    }

    fn dispatch(&self, workflow_id: u64, branch: &str) -> Result<bool> {
        let path = format!(
            "{}/repos/{}/{}/actions/workflows/{workflow_id}/dispatches",
            self.api_base, self.owner, self.repo
        );
        let mut request = self
            .client
            .post(path)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .json(&serde_json::json!({ "ref": branch }));
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request.send().context("github dispatch request")?;
        let status = response.status().as_u16();
        match status {
            204 => Ok(true),
            // No workflow_dispatch trigger, workflow not found on the branch,
            // or the token lacks the scope. A push-triggered run may still
            // appear, so none of these are fatal.
            403 | 404 | 422 => {
                warn!(workflow_id, status, "workflow dispatch not supported");
                Ok(false)
            }
            _ => {
                let body = response.text().unwrap_or_default();
                Err(anyhow!("workflow dispatch failed ({status}): {}", body.trim()))
            }
        }
    }

    fn runs_for_branch(&self, branch: &str) -> Result<Vec<WorkflowRun>> {
        let path = format!(
            "/repos/{}/{}/actions/runs?branch={branch}&per_page=10",
            self.owner, self.repo
        );
        let response = self.get(&path)?;
        let status = response.status();
        let body = response.text().context("read workflow runs")?;
        if !status.is_success() {
            return Err(anyhow!("workflow runs failed ({status}): {}", body.trim()));
        }
        let list: WorkflowRunList = serde_json::from_str(&body).context("parse workflow runs")?;
        Ok(list.workflow_runs)
    }
}
