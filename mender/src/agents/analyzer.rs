//! Analyzer: clone the target repo, detect its runtime, and reproduce the
//! test results in the sandbox.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::json;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::core::types::{Language, RuntimeDescriptor, runtime_for};
use crate::events::RunEvents;
use crate::io::git::Git;
use crate::io::sandbox::{Sandbox, SandboxRequest};

const AGENT: &str = "analyzer";

/// Directories never descended into during test discovery.
const SKIPPED_DIRS: &[&str] = &["node_modules", "__pycache__", "vendor", "target"];

/// Outcome of one test execution in the sandbox.
#[derive(Debug, Clone)]
pub struct TestRun {
    pub exit_code: i32,
    /// Combined stdout+stderr, consumed by the classifier.
    pub log: String,
    pub passed: bool,
}

/// Full analysis of a freshly cloned working tree.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub language: Language,
    pub runtime: RuntimeDescriptor,
    pub test_files: Vec<String>,
    pub tests: TestRun,
}

/// Clone `repo_url` into `workdir`, shallow first with a full-clone retry.
#[instrument(skip_all, fields(repo_url))]
pub fn clone_repo(
    events: &RunEvents,
    workdir: &Path,
    repo_url: &str,
    token: Option<&str>,
) -> Result<()> {
    events.emit(AGENT, "clone_start", format!("Cloning {repo_url}"));
    Git::new(workdir)
        .clone_repo(repo_url, token)
        .with_context(|| format!("clone {repo_url}"))?;
    events.emit(AGENT, "clone_done", "Clone complete");
    Ok(())
}

/// Detect the project language from top-level marker files.
///
/// Markers are checked in a fixed order; repositories matching nothing are
/// treated as node projects.
pub fn detect_language(workdir: &Path) -> Language {
    let has = |name: &str| workdir.join(name).exists();
    if has("package.json") {
        Language::Node
    } else if has("requirements.txt") || has("setup.py") || has("pyproject.toml") {
        Language::Python
    } else if has("go.mod") {
        Language::Go
    } else if has("Cargo.toml") {
        Language::Rust
    } else if has("pom.xml") || has("build.gradle") {
        Language::Java
    } else {
        Language::Node
    }
}

static NODE_TESTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(test|spec)\.[cm]?[jt]sx?$").expect("valid regex"));
static PYTHON_TESTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|/)(test_[^/]*\.py|[^/]*_test\.py)$").expect("valid regex"));
static GO_TESTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_test\.go$").expect("valid regex"));
static RUST_TESTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|/)tests/[^/]+\.rs$").expect("valid regex"));
static JAVA_TESTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Test[^/]*|[^/]*Tests?)\.java$").expect("valid regex"));

fn test_pattern(language: Language) -> &'static Regex {
    match language {
        Language::Node => &NODE_TESTS,
        Language::Python => &PYTHON_TESTS,
        Language::Go => &GO_TESTS,
        Language::Rust => &RUST_TESTS,
        Language::Java => &JAVA_TESTS,
    }
}

/// Walk the tree collecting test files, skipping hidden and vendor dirs.
pub fn discover_test_files(workdir: &Path, language: Language) -> Vec<String> {
    let pattern = test_pattern(language);
    let mut files = Vec::new();

    let walker = WalkDir::new(workdir).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        if entry.depth() == 0 {
            return true;
        }
        if entry.file_type().is_dir() {
            return !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_ref());
        }
        true
    });

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(workdir) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        if pattern.is_match(&relative) {
            files.push(relative);
        }
    }

    files.sort();
    files
}

/// Run the runtime's install+test command in the sandbox.
#[instrument(skip_all, fields(image = runtime.image))]
pub fn run_tests(
    events: &RunEvents,
    sandbox: &dyn Sandbox,
    workdir: &Path,
    runtime: &RuntimeDescriptor,
    timeout: Duration,
) -> Result<TestRun> {
    let command = if runtime.install_cmd.is_empty() {
        runtime.test_cmd.to_string()
    } else {
        format!("{} && {}", runtime.install_cmd, runtime.test_cmd)
    };

    events.emit(AGENT, "tests_start", format!("Running `{command}`"));
    let result = sandbox.execute(&SandboxRequest {
        image: runtime.image.to_string(),
        workdir: workdir.to_path_buf(),
        command,
        timeout,
    })?;
    let passed = result.passed();
    info!(exit_code = result.exit_code, passed, "tests finished");
    events.emit_data(
        AGENT,
        "tests_done",
        if passed { "Tests passed" } else { "Tests failed" },
        json!({ "exitCode": result.exit_code, "passed": passed }),
    );

    Ok(TestRun {
        exit_code: result.exit_code,
        log: result.combined_log(),
        passed,
    })
}

/// Detect runtime, discover tests, and execute the suite once.
pub fn analyze(
    events: &RunEvents,
    sandbox: &dyn Sandbox,
    workdir: &Path,
    timeout: Duration,
) -> Result<Analysis> {
    let language = detect_language(workdir);
    let runtime = runtime_for(language);
    debug!(?language, image = runtime.image, "language detected");
    events.emit_data(
        AGENT,
        "detect_done",
        format!("Detected {language:?} project"),
        json!({ "language": language, "image": runtime.image }),
    );

    let test_files = discover_test_files(workdir, language);
    events.emit_data(
        AGENT,
        "tests_discovered",
        format!("Found {} test file(s)", test_files.len()),
        json!({ "testFiles": test_files }),
    );

    let tests = run_tests(events, sandbox, workdir, &runtime, timeout)?;
    Ok(Analysis {
        language,
        runtime,
        test_files,
        tests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::test_support::ScriptedSandbox;
    use std::fs;
    use std::sync::Arc;

    fn events() -> RunEvents {
        RunEvents::new(Arc::new(EventBus::new()), "run-test")
    }

    #[test]
    fn detects_language_in_marker_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(detect_language(temp.path()), Language::Node);

        fs::write(temp.path().join("Cargo.toml"), "[package]").expect("write");
        assert_eq!(detect_language(temp.path()), Language::Rust);

        // package.json outranks Cargo.toml.
        fs::write(temp.path().join("package.json"), "{}").expect("write");
        assert_eq!(detect_language(temp.path()), Language::Node);
    }

    #[test]
    fn discovers_python_tests_and_skips_vendor_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("src")).expect("mkdir");
        fs::create_dir_all(root.join("__pycache__")).expect("mkdir");
        fs::create_dir_all(root.join(".git")).expect("mkdir");
        fs::write(root.join("src/test_app.py"), "").expect("write");
        fs::write(root.join("src/helpers.py"), "").expect("write");
        fs::write(root.join("__pycache__/test_cached.py"), "").expect("write");
        fs::write(root.join(".git/test_hidden.py"), "").expect("write");

        let files = discover_test_files(root, Language::Python);
        assert_eq!(files, vec!["src/test_app.py"]);
    }

    #[test]
    fn discovers_node_spec_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("src")).expect("mkdir");
        fs::write(root.join("src/app.test.js"), "").expect("write");
        fs::write(root.join("src/app.spec.tsx"), "").expect("write");
        fs::write(root.join("src/app.js"), "").expect("write");

        let files = discover_test_files(root, Language::Node);
        assert_eq!(files, vec!["src/app.spec.tsx", "src/app.test.js"]);
    }

    #[test]
    fn install_cmd_is_omitted_when_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("go.mod"), "module demo").expect("write");
        let sandbox = ScriptedSandbox::passing("ok\n");

        let analysis = analyze(
            &events(),
            &sandbox,
            temp.path(),
            Duration::from_secs(5),
        )
        .expect("analyze");

        assert_eq!(analysis.language, Language::Go);
        assert!(analysis.tests.passed);
        let commands = sandbox.commands();
        assert_eq!(commands, vec!["go test ./...".to_string()]);
    }

    #[test]
    fn failing_tests_produce_combined_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("package.json"), "{}").expect("write");
        let sandbox = ScriptedSandbox::failing(1, "1 test failed", "TypeError: boom");

        let analysis = analyze(
            &events(),
            &sandbox,
            temp.path(),
            Duration::from_secs(5),
        )
        .expect("analyze");

        assert!(!analysis.tests.passed);
        assert!(analysis.tests.log.contains("1 test failed"));
        assert!(analysis.tests.log.contains("TypeError: boom"));
    }
}
