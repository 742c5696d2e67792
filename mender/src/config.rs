//! Agent configuration sourced from the environment.
//!
//! Everything has a usable default so a bare `mender run` works; deployments
//! override through env vars. Missing credentials degrade features (no push,
//! placeholder fixes) rather than failing startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};

/// Default model chain, tried in order on rate-limit exhaustion.
const DEFAULT_MODELS: &[&str] = &[
    "openai/gpt-4o-mini",
    "google/gemini-2.0-flash-001",
    "meta-llama/llama-3.1-8b-instruct",
];

const DEFAULT_LLM_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Token injected into clone/push URLs and CI API calls.
    pub github_token: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_api_url: String,
    pub llm_models: Vec<String>,
    /// Maximum repair iterations after the initial analysis.
    pub retry_limit: u32,
    pub sandbox_timeout: Duration,
    pub ci_timeout: Duration,
    pub ci_settle: Duration,
    pub ci_poll_interval: Duration,
    /// Transient working trees live under `{work_dir}/{run_id}`.
    pub work_dir: PathBuf,
    pub results_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            github_token: None,
            llm_api_key: None,
            llm_api_url: DEFAULT_LLM_API_URL.to_string(),
            llm_models: DEFAULT_MODELS.iter().map(|s| s.to_string()).collect(),
            retry_limit: 5,
            sandbox_timeout: Duration::from_secs(120),
            ci_timeout: Duration::from_secs(300),
            ci_settle: Duration::from_secs(5),
            ci_poll_interval: Duration::from_secs(10),
            work_dir: PathBuf::from("tmp"),
            results_dir: PathBuf::from("results"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl AgentConfig {
    /// Build the config from process environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        cfg.github_token = non_empty_var("GITHUB_TOKEN");
        cfg.llm_api_key = non_empty_var("LLM_API_KEY");
        if let Some(url) = non_empty_var("LLM_API_URL") {
            cfg.llm_api_url = url;
        }
        if let Some(models) = non_empty_var("LLM_MODELS") {
            cfg.llm_models = models
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(limit) = non_empty_var("RETRY_LIMIT") {
            cfg.retry_limit = limit
                .parse()
                .map_err(|_| anyhow!("RETRY_LIMIT must be an integer, got '{limit}'"))?;
        }
        if let Some(secs) = non_empty_var("SANDBOX_TIMEOUT_SECS") {
            cfg.sandbox_timeout = parse_secs("SANDBOX_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = non_empty_var("CI_TIMEOUT_SECS") {
            cfg.ci_timeout = parse_secs("CI_TIMEOUT_SECS", &secs)?;
        }
        if let Some(dir) = non_empty_var("MENDER_WORK_DIR") {
            cfg.work_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_var("MENDER_RESULTS_DIR") {
            cfg.results_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_var("MENDER_LOG_DIR") {
            cfg.log_dir = PathBuf::from(dir);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_limit == 0 {
            return Err(anyhow!("retry limit must be > 0"));
        }
        if self.llm_models.is_empty() {
            return Err(anyhow!("model list must not be empty"));
        }
        if self.sandbox_timeout.is_zero() || self.ci_timeout.is_zero() {
            return Err(anyhow!("timeouts must be > 0"));
        }
        Ok(())
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration> {
    raw.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| anyhow!("{key} must be an integer number of seconds, got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = AgentConfig::default();
        cfg.validate().expect("defaults are valid");
        assert_eq!(cfg.retry_limit, 5);
        assert_eq!(cfg.ci_timeout, Duration::from_secs(300));
        assert_eq!(cfg.llm_models.len(), 3);
    }

    #[test]
    fn zero_retry_limit_is_rejected() {
        let cfg = AgentConfig {
            retry_limit: 0,
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_model_list_is_rejected() {
        let cfg = AgentConfig {
            llm_models: Vec::new(),
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
