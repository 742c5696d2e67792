//! Shared deterministic types for the heal loop.
//!
//! These types define stable contracts between agents. They carry no I/O and
//! serialize to the wire/report shapes the HTTP layer exposes, so field and
//! variant names must remain stable.

use serde::{Deserialize, Serialize};

/// Classification of a single test-output error line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Syntax,
    Linting,
    Logic,
    TypeError,
    Import,
    Indentation,
    Runtime,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SYNTAX",
            ErrorKind::Linting => "LINTING",
            ErrorKind::Logic => "LOGIC",
            ErrorKind::TypeError => "TYPE_ERROR",
            ErrorKind::Import => "IMPORT",
            ErrorKind::Indentation => "INDENTATION",
            ErrorKind::Runtime => "RUNTIME",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

/// One structured error parsed out of a raw test log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub raw_message: String,
}

/// A patch candidate produced by the language model.
///
/// All fields default to empty so a partially-filled model response still
/// deserializes; the applier downgrades incomplete proposals to `Skipped`
/// rather than rejecting the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FixProposal {
    pub file: String,
    pub line: Option<u32>,
    pub kind: String,
    pub description: String,
    pub original_code: String,
    pub fixed_code: String,
    pub commit_message: String,
}

impl FixProposal {
    /// A proposal can be applied only when the target file and both code
    /// snippets are present.
    pub fn is_applicable(&self) -> bool {
        !self.file.is_empty() && !self.original_code.is_empty() && !self.fixed_code.is_empty()
    }
}

/// Terminal status of one application attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixStatus {
    Fixed,
    Failed,
    Skipped,
}

/// A fix proposal after the applier has attempted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedFix {
    #[serde(flatten)]
    pub proposal: FixProposal,
    pub status: FixStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AppliedFix {
    pub fn fixed(proposal: FixProposal) -> Self {
        Self {
            proposal,
            status: FixStatus::Fixed,
            reason: None,
        }
    }

    pub fn failed(proposal: FixProposal, reason: impl Into<String>) -> Self {
        Self {
            proposal,
            status: FixStatus::Failed,
            reason: Some(reason.into()),
        }
    }

    pub fn skipped(proposal: FixProposal) -> Self {
        Self {
            proposal,
            status: FixStatus::Skipped,
            reason: None,
        }
    }
}

/// Outcome recorded in the timeline for one pass through the loop.
///
/// Iteration 0 is the initial analysis; iterations 1..N are repair attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IterationStatus {
    Passed,
    Failed,
    NoFixes,
    ApplyFailed,
    CiPassed,
    Error,
}

/// One timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub status: IterationStatus,
    pub timestamp: String,
}

/// Language detected from the repository's top-level marker files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Node,
    Python,
    Go,
    Rust,
    Java,
}

/// Sandbox runtime selection for a detected language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeDescriptor {
    pub image: &'static str,
    pub install_cmd: &'static str,
    pub test_cmd: &'static str,
}

/// Fixed language → runtime table.
pub fn runtime_for(language: Language) -> RuntimeDescriptor {
    match language {
        Language::Node => RuntimeDescriptor {
            image: "node:20-slim",
            install_cmd: "npm install",
            test_cmd: "npm test",
        },
        Language::Python => RuntimeDescriptor {
            image: "python:3.11-slim",
            install_cmd: "pip install -r requirements.txt",
            test_cmd: "python -m pytest",
        },
        Language::Go => RuntimeDescriptor {
            image: "golang:1.22-alpine",
            install_cmd: "",
            test_cmd: "go test ./...",
        },
        Language::Rust => RuntimeDescriptor {
            image: "rust:1.79-slim",
            install_cmd: "",
            test_cmd: "cargo test",
        },
        Language::Java => RuntimeDescriptor {
            image: "maven:3.9-eclipse-temurin-17",
            install_cmd: "",
            test_cmd: "mvn -q test",
        },
    }
}

/// Terminal verdict of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    Passed,
    Failed,
}
