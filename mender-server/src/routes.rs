//! HTTP route handlers for the agent API.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use mender::core::branch::derive_branch;
use mender::io::github::parse_repo_url;
use mender::io::sandbox::docker_status;
use mender::pipeline::{RunRequest, run_managed};

use crate::state::{AppState, RunStatus};

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/run-agent", post(run_agent))
        .route("/results/{run_id}", get(get_results))
        .route("/runs", get(list_runs))
        .route("/health", get(health))
        .route("/docker-status", get(get_docker_status))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunAgentRequest {
    #[serde(default)]
    repo_url: String,
    #[serde(default)]
    team_name: String,
    #[serde(default)]
    leader_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunAgentResponse {
    status: &'static str,
    run_id: String,
    branch: String,
    message: String,
}

fn validation_error(error: &str, messages: Vec<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": error, "messages": messages })),
    )
        .into_response()
}

/// POST /api/run-agent — register a run and spawn its pipeline.
///
/// Always responds immediately; the pipeline runs on a blocking task and the
/// caller observes it through `/api/results/{runId}` or the WebSocket.
async fn run_agent(
    State(state): State<AppState>,
    Json(request): Json<RunAgentRequest>,
) -> Response {
    let mut messages = Vec::new();
    if request.repo_url.trim().is_empty() {
        messages.push("repoUrl is required".to_string());
    }
    if request.team_name.trim().is_empty() {
        messages.push("teamName is required".to_string());
    }
    if request.leader_name.trim().is_empty() {
        messages.push("leaderName is required".to_string());
    }
    if !messages.is_empty() {
        return validation_error("Validation failed", messages);
    }
    if parse_repo_url(request.repo_url.trim()).is_none() {
        return validation_error(
            "Invalid repository URL",
            vec!["repoUrl must look like https://github.com/{owner}/{repo}".to_string()],
        );
    }

    let run_id = Uuid::new_v4().to_string();
    let branch = derive_branch(&request.team_name, &request.leader_name);
    state.insert_run(
        &run_id,
        request.repo_url.trim(),
        &request.team_name,
        &request.leader_name,
        &branch,
    );
    info!(run_id = %run_id, repo = %request.repo_url, "run submitted");

    let pipeline_request = RunRequest {
        run_id: run_id.clone(),
        repo_url: request.repo_url.trim().to_string(),
        team_name: request.team_name,
        leader_name: request.leader_name,
    };
    spawn_pipeline(state, pipeline_request);

    (
        StatusCode::ACCEPTED,
        Json(RunAgentResponse {
            status: "running",
            run_id,
            branch,
            message: "Agent pipeline started; poll /api/results/{runId} for progress".to_string(),
        }),
    )
        .into_response()
}

/// Run the synchronous pipeline on a blocking task and record its outcome.
fn spawn_pipeline(state: AppState, request: RunRequest) {
    tokio::spawn(async move {
        let run_id = request.run_id.clone();
        let config = state.config.clone();
        let bus = state.bus.clone();
        let result =
            tokio::task::spawn_blocking(move || run_managed(&config, bus, request)).await;
        match result {
            Ok(report) => {
                state.finish_run(&run_id, RunStatus::from_report(&report), Some(report));
            }
            Err(err) => {
                error!(run_id = %run_id, error = %err, "pipeline task panicked");
                state.finish_run(&run_id, RunStatus::Error, None);
            }
        }
    });
}

/// GET /api/results/{run_id} — poll a run's progress or final report.
async fn get_results(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Response {
    let Some(entry) = state.get_run(&run_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Unknown run id" })),
        )
            .into_response();
    };

    match entry.status {
        RunStatus::Running => Json(json!({
            "status": "processing",
            "runId": entry.run_id,
            "startedAt": entry.started_at,
            "logs": state.bus.history(&run_id),
        }))
        .into_response(),
        status => Json(json!({
            "status": status,
            "runId": entry.run_id,
            "startedAt": entry.started_at,
            "completedAt": entry.completed_at,
            "result": entry.report,
        }))
        .into_response(),
    }
}

/// GET /api/runs — summaries of all known runs.
async fn list_runs(State(state): State<AppState>) -> Response {
    Json(json!({ "runs": state.summaries() })).into_response()
}

/// GET /api/health.
async fn health(State(state): State<AppState>) -> Response {
    Json(json!({ "status": "ok", "uptime": state.uptime_secs() })).into_response()
}

/// GET /api/docker-status — daemon probe (shells out, so off the async path).
async fn get_docker_status() -> Response {
    match tokio::task::spawn_blocking(docker_status).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "available": false, "error": err.to_string() })),
        )
            .into_response(),
    }
}
