//! Autonomous repo-healing agent.
//!
//! Given a repository URL, the pipeline reproduces the test failures in a
//! sandbox, asks a language model for targeted fixes, applies and pushes
//! them to a derived branch, optionally watches the remote CI, and scores
//! the run into a final report. See `pipeline` for the orchestration and
//! `agents` for the individual loop participants.

pub mod agents;
pub mod config;
pub mod core;
pub mod events;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod test_support;
