// HTTP route handlers for the Arbiter API

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use arbiter_common::types::{
    Action, Challenge, EvaluationSummary, ExecutionOutcome, Submission, TestResult,
};
use arbiter_common::EngineError;
use arbiter_engine::{Evaluation, RunnerSpec};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::metrics;
use crate::AppState;

/// Failure of a request, rendered as `{ "error", "kind" }`
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    InvalidAction(String),
    /// Malformed query string or body
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidAction(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(e) => match e {
                EngineError::ChallengeNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::UnsupportedLanguage(_) | EngineError::SubmissionTooLarge { .. } => {
                    StatusCode::BAD_REQUEST
                }
                EngineError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
                EngineError::SandboxFault(_) | EngineError::Store(_) | EngineError::Config(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidAction(_) => "invalid_action",
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::Engine(e) => e.kind(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::InvalidAction(action) => {
                format!("Invalid action '{}' (expected compile, visible or hidden)", action)
            }
            ApiError::BadRequest(message) => message.clone(),
            ApiError::Engine(e) => e.to_string(),
        };

        if status.is_server_error() {
            error!(kind = self.kind(), error = %message, "Request failed");
        } else {
            warn!(kind = self.kind(), error = %message, "Request rejected");
        }

        (
            status,
            Json(serde_json::json!({
                "error": message,
                "kind": self.kind(),
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleCaseView {
    pub input: String,
    pub expected_output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub boilerplate_code: String,
    pub visible_test_cases: Vec<VisibleCaseView>,
}

impl From<Challenge> for ChallengeView {
    fn from(challenge: Challenge) -> Self {
        let visible_test_cases = challenge
            .visible_test_cases()
            .into_iter()
            .map(|case| VisibleCaseView {
                input: case.input,
                expected_output: case.expected_output,
            })
            .collect();

        Self {
            id: challenge.id,
            title: challenge.title,
            description: challenge.description,
            boilerplate_code: challenge.boilerplate_code,
            visible_test_cases,
        }
    }
}

/// GET /challenges/search/id?id={challengeId} - Challenge page content
pub async fn get_challenge(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<ChallengeView>, ApiError> {
    let Query(query) = query?;
    let challenge = state.store.get(&query.id).await?;
    info!(challenge_id = %query.id, "Challenge retrieved");
    Ok(Json(challenge.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateQuery {
    pub challenge_id: String,
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResultView {
    pub output: String,
    pub stderr: String,
    pub verdict: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl From<&ExecutionOutcome> for CompileResultView {
    fn from(outcome: &ExecutionOutcome) -> Self {
        Self {
            output: outcome.display_output(),
            stderr: outcome.stderr.clone(),
            verdict: outcome.verdict.to_string(),
            exit_code: outcome.exit_status.code(),
            timed_out: outcome.timed_out,
            duration_ms: outcome.duration_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompileResponse {
    pub result: CompileResultView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleResultView {
    pub input: String,
    pub actual_output: String,
    pub passed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleResponse {
    pub results: Vec<VisibleResultView>,
    pub summary: String,
    pub total_cases: usize,
    pub passed_cases: usize,
}

/// Hidden results never carry the expected output or a per-case flag
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenResultView {
    pub input: String,
    pub actual_output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenResponse {
    pub hidden_results: Vec<HiddenResultView>,
    pub summary: String,
    pub total_cases: usize,
    pub passed_cases: usize,
}

impl From<EvaluationSummary> for VisibleResponse {
    fn from(summary: EvaluationSummary) -> Self {
        let summary_line = summary.summary_line();
        let (total_cases, passed_cases) = (summary.total_cases(), summary.passed_cases());
        Self {
            results: summary
                .into_results()
                .into_iter()
                .map(|r: TestResult| VisibleResultView {
                    input: r.input,
                    actual_output: r.actual_output,
                    passed: r.passed,
                })
                .collect(),
            summary: summary_line,
            total_cases,
            passed_cases,
        }
    }
}

impl From<EvaluationSummary> for HiddenResponse {
    fn from(summary: EvaluationSummary) -> Self {
        let summary_line = summary.summary_line();
        let (total_cases, passed_cases) = (summary.total_cases(), summary.passed_cases());
        Self {
            hidden_results: summary
                .into_results()
                .into_iter()
                .map(|r: TestResult| HiddenResultView {
                    input: r.input,
                    actual_output: r.actual_output,
                })
                .collect(),
            summary: summary_line,
            total_cases,
            passed_cases,
        }
    }
}

/// POST /challenges/evaluate?challengeId={id}&action={action} - Evaluate a submission
pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    query: Result<Query<EvaluateQuery>, QueryRejection>,
    payload: Result<Json<EvaluateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let Json(payload) = payload?;
    let action: Action = query
        .action
        .parse()
        .map_err(|_| ApiError::InvalidAction(query.action.clone()))?;

    let start_time = Instant::now();
    let result = run_evaluation(&state, action, &query.challenge_id, payload).await;
    let seconds = start_time.elapsed().as_secs_f64();

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::record_evaluation(action.as_str(), outcome, seconds);

    let evaluation = result?;
    info!(
        challenge_id = %query.challenge_id,
        action = %action,
        elapsed_ms = (seconds * 1000.0) as u64,
        "Evaluation completed"
    );

    let response = match evaluation {
        Evaluation::Compile(outcome) => {
            metrics::record_verdict(outcome.verdict);
            Json(CompileResponse {
                result: CompileResultView::from(&outcome),
            })
            .into_response()
        }
        Evaluation::Visible(summary) => {
            summary.results().iter().for_each(|r| metrics::record_verdict(r.verdict));
            Json(VisibleResponse::from(summary)).into_response()
        }
        Evaluation::Hidden(summary) => {
            summary.results().iter().for_each(|r| metrics::record_verdict(r.verdict));
            Json(HiddenResponse::from(summary)).into_response()
        }
    };
    Ok(response)
}

async fn run_evaluation(
    state: &AppState,
    action: Action,
    challenge_id: &str,
    payload: EvaluateRequest,
) -> Result<Evaluation, EngineError> {
    let challenge = state.store.get(challenge_id).await?;

    let mut submission = Submission::new(challenge_id, payload.language, payload.code);
    // Only ad-hoc runs take caller input
    if action == Action::Compile {
        if let Some(input) = payload.input {
            submission = submission.with_stdin(input);
        }
    }

    state
        .orchestrator
        .evaluate(action, &submission, &challenge.test_cases)
        .await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageView {
    pub name: String,
    pub aliases: Vec<String>,
    pub version: String,
    pub compiled: bool,
    pub time_limit_ms: u64,
    pub memory_limit_mb: u64,
}

impl From<&RunnerSpec> for LanguageView {
    fn from(spec: &RunnerSpec) -> Self {
        Self {
            name: spec.name.clone(),
            aliases: spec.aliases.clone(),
            version: spec.version.clone(),
            compiled: spec.is_compiled(),
            time_limit_ms: spec.time_limit_ms,
            memory_limit_mb: spec.memory_limit_mb,
        }
    }
}

/// GET /languages - Registered languages and their limits
pub async fn list_languages(State(state): State<Arc<AppState>>) -> Json<Vec<LanguageView>> {
    let languages = state
        .orchestrator
        .pipeline()
        .registry()
        .languages()
        .iter()
        .map(|spec| LanguageView::from(spec.as_ref()))
        .collect();
    Json(languages)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: &'static str,
    pub backend: &'static str,
    pub available_slots: usize,
}

/// GET /status - Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<StatusView> {
    let pipeline = state.orchestrator.pipeline();
    Json(StatusView {
        status: "ok",
        backend: pipeline.sandbox_name(),
        available_slots: pipeline.available_slots(),
    })
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}
