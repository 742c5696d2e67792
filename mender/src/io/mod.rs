//! Side-effecting adapters: processes, git, the sandbox, HTTP clients,
//! and report persistence.

pub mod git;
pub mod github;
pub mod llm;
pub mod process;
pub mod results;
pub mod sandbox;
