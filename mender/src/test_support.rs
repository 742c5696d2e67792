//! Scripted stand-ins for the trait seams, used by unit and integration
//! tests. Nothing here talks to a network, a daemon, or a model.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::io::github::{CiProvider, Workflow, WorkflowRun};
use crate::io::llm::{ChatMessage, LanguageModel, LlmError};
use crate::io::sandbox::{Sandbox, SandboxRequest, SandboxResult};

/// Sandbox that replays a scripted sequence of results and records the
/// commands it was asked to run.
pub struct ScriptedSandbox {
    results: Mutex<VecDeque<SandboxResult>>,
    fallback: SandboxResult,
    commands: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    /// Every execution succeeds with the given stdout.
    pub fn passing(stdout: &str) -> Self {
        Self::sequence(Vec::new(), result(0, stdout, ""))
    }

    /// Every execution fails with the given exit code and streams.
    pub fn failing(exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self::sequence(Vec::new(), result(exit_code, stdout, stderr))
    }

    /// Replay `results` in order, then repeat `fallback` forever.
    pub fn sequence(results: Vec<SandboxResult>, fallback: SandboxResult) -> Self {
        Self {
            results: Mutex::new(results.into()),
            fallback,
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Commands executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("lock").clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn execute(&self, request: &SandboxRequest) -> Result<SandboxResult> {
        self.commands
            .lock()
            .expect("lock")
            .push(request.command.clone());
        let next = self.results.lock().expect("lock").pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Build a [`SandboxResult`] literal.
pub fn result(exit_code: i32, stdout: &str, stderr: &str) -> SandboxResult {
    SandboxResult {
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

enum LlmScript {
    Repeat(String),
    Sequence(VecDeque<Result<String, LlmError>>),
}

/// Language model that replays canned completions and captures prompts.
pub struct ScriptedLlm {
    script: Mutex<LlmScript>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    /// Always reply with the same completion.
    pub fn replying(text: &str) -> Self {
        Self {
            script: Mutex::new(LlmScript::Repeat(text.to_string())),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Fail once with `err`, then report the chain as exhausted.
    pub fn erroring(err: LlmError) -> Self {
        Self::sequence(vec![Err(err)])
    }

    /// Replay completions in order; further calls report exhaustion.
    pub fn sequence(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(LlmScript::Sequence(replies.into())),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// The user-role content of the most recent completion request.
    pub fn last_user_prompt(&self) -> Option<String> {
        self.prompts
            .lock()
            .expect("lock")
            .last()?
            .iter()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
    }
}

impl LanguageModel for ScriptedLlm {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.prompts.lock().expect("lock").push(messages.to_vec());
        let mut script = self.script.lock().expect("lock");
        match &mut *script {
            LlmScript::Repeat(text) => Ok(text.clone()),
            LlmScript::Sequence(replies) => {
                replies.pop_front().unwrap_or(Err(LlmError::Exhausted))
            }
        }
    }
}

struct CiScript {
    error_first: bool,
    sequence: VecDeque<Vec<WorkflowRun>>,
    last: Option<Vec<WorkflowRun>>,
}

/// CI provider with scripted workflows and poll responses.
pub struct ScriptedCi {
    workflows: Vec<Workflow>,
    dispatch_supported: bool,
    dispatched: Mutex<Vec<u64>>,
    script: Mutex<CiScript>,
}

impl Default for ScriptedCi {
    fn default() -> Self {
        Self {
            workflows: Vec::new(),
            dispatch_supported: true,
            dispatched: Mutex::new(Vec::new()),
            script: Mutex::new(CiScript {
                error_first: false,
                sequence: VecDeque::new(),
                last: None,
            }),
        }
    }
}

impl ScriptedCi {
    pub fn with_workflows(mut self, workflows: Vec<Workflow>) -> Self {
        self.workflows = workflows;
        self
    }

    pub fn with_dispatch_supported(mut self, supported: bool) -> Self {
        self.dispatch_supported = supported;
        self
    }

    /// Poll responses replayed in order; the final entry repeats forever.
    pub fn with_runs(self, runs: Vec<Vec<WorkflowRun>>) -> Self {
        {
            let mut script = self.script.lock().expect("lock");
            script.sequence = runs.into();
        }
        self
    }

    /// First poll errors, then the given responses replay.
    pub fn with_poll_error_then(self, runs: Vec<Vec<WorkflowRun>>) -> Self {
        {
            let mut script = self.script.lock().expect("lock");
            script.error_first = true;
            script.sequence = runs.into();
        }
        self
    }

    /// Workflow ids dispatch was attempted for.
    pub fn dispatched(&self) -> Vec<u64> {
        self.dispatched.lock().expect("lock").clone()
    }
}

impl CiProvider for ScriptedCi {
    fn list_workflows(&self) -> Result<Vec<Workflow>> {
        Ok(self.workflows.clone())
    }

    fn dispatch(&self, workflow_id: u64, _branch: &str) -> Result<bool> {
        self.dispatched.lock().expect("lock").push(workflow_id);
        Ok(self.dispatch_supported)
    }

    fn runs_for_branch(&self, _branch: &str) -> Result<Vec<WorkflowRun>> {
        let mut script = self.script.lock().expect("lock");
        if script.error_first {
            script.error_first = false;
            return Err(anyhow!("scripted poll failure"));
        }
        if let Some(runs) = script.sequence.pop_front() {
            script.last = Some(runs.clone());
            return Ok(runs);
        }
        Ok(script.last.clone().unwrap_or_default())
    }
}

/// A throwaway git repository usable as a clone origin in pipeline tests.
pub struct TestRepo {
    temp: tempfile::TempDir,
}

impl TestRepo {
    /// Initialize a repo containing `files`, committed on `main`.
    pub fn with_files(files: &[(&str, &str)]) -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let root = temp.path();
        git(root, &["init", "--initial-branch=main"])?;
        git(root, &["config", "user.name", "fixture"])?;
        git(root, &["config", "user.email", "fixture@example.com"])?;
        for (path, contents) in files {
            let full = root.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full, contents)?;
        }
        git(root, &["add", "-A"])?;
        git(root, &["commit", "-m", "initial"])?;
        // Pushes from clones target this repo; accept them on non-checked-out
        // branches.
        git(root, &["config", "receive.denyCurrentBranch", "ignore"])?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// File-path URL usable with `git clone`.
    pub fn url(&self) -> String {
        self.temp.path().display().to_string()
    }

    /// Branch names present in the origin repo.
    pub fn branches(&self) -> Result<Vec<String>> {
        let out = Command::new("git")
            .args(["branch", "--format=%(refname:short)"])
            .current_dir(self.root())
            .output()?;
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn git(root: &Path, args: &[&str]) -> Result<()> {
    let out = Command::new("git").args(args).current_dir(root).output()?;
    if !out.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(())
}
