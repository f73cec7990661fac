use crate::routes;
use crate::AppState;
use arbiter_common::config::EngineConfig;
use arbiter_common::store::MemoryChallengeStore;
use arbiter_common::types::{Challenge, TestCase};
use arbiter_engine::sandbox::ProcessSandbox;
use arbiter_engine::{CommandTemplate, LanguageRegistry, Orchestrator, Pipeline, RunnerSpec};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// Shell "language" so the router can be exercised without Docker
fn shell_registry() -> LanguageRegistry {
    let mut spec = RunnerSpec::new(
        "shell",
        "busybox:stable",
        ".sh",
        Some(CommandTemplate::new("sh", &["-n", "{source}"])),
        CommandTemplate::new("sh", &["{source}"]),
    );
    spec.aliases = vec!["sh".to_string()];
    spec.time_limit_ms = 500;
    LanguageRegistry::from_specs([spec]).unwrap()
}

fn doubling_challenge() -> Challenge {
    Challenge {
        id: "double".to_string(),
        title: "Double It".to_string(),
        description: "Print twice the input".to_string(),
        boilerplate_code: "read n\n".to_string(),
        test_cases: vec![
            TestCase::visible("1\n", "2"),
            TestCase::visible("5\n", "10"),
            TestCase::hidden("21\n", "42"),
            TestCase::hidden("-3\n", "-6"),
            TestCase::hidden("0\n", "1"),
        ],
    }
}

fn test_app(workspace_root: &std::path::Path) -> Router {
    test_app_with_origins(workspace_root, None)
}

fn test_app_with_origins(workspace_root: &std::path::Path, origins: Option<&[String]>) -> Router {
    let config = EngineConfig {
        workspace_root: workspace_root.to_path_buf(),
        ..EngineConfig::default()
    };
    let pipeline = Pipeline::new(
        Arc::new(shell_registry()),
        Arc::new(ProcessSandbox::new()),
        config.workspace_root.clone(),
        config.max_concurrent_sandboxes,
    );
    let state = Arc::new(AppState {
        orchestrator: Orchestrator::new(pipeline, &config),
        store: Arc::new(MemoryChallengeStore::from_challenges([doubling_challenge()])),
    });
    routes::app(state, "/api", origins)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn evaluate_request(challenge_id: &str, action: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!(
            "/api/challenges/evaluate?challengeId={}&action={}",
            challenge_id, action
        ))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

const DOUBLER: &str = "read n\necho $((n * 2))\n";

#[tokio::test]
async fn test_search_challenge_hides_hidden_cases() {
    let root = tempfile::tempdir().unwrap();
    let request = Request::builder()
        .uri("/api/challenges/search/id?id=double")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(test_app(root.path()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Double It");
    assert_eq!(body["boilerplateCode"], "read n\n");
    let visible = body["visibleTestCases"].as_array().unwrap();
    assert_eq!(visible.len(), 2);
    assert_eq!(visible[1]["expectedOutput"], "10");
    assert!(!body.to_string().contains("42"));
}

#[tokio::test]
async fn test_unknown_challenge_is_404() {
    let root = tempfile::tempdir().unwrap();
    let request = Request::builder()
        .uri("/api/challenges/search/id?id=nope")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(test_app(root.path()), request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "challenge_not_found");
}

#[tokio::test]
async fn test_compile_echoes_custom_input() {
    let root = tempfile::tempdir().unwrap();
    let request = evaluate_request(
        "double",
        "compile",
        serde_json::json!({"code": "cat", "language": "shell", "input": "hello\n"}),
    );

    let (status, body) = send(test_app(root.path()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["output"], "hello\n");
    assert_eq!(body["result"]["verdict"], "ok");
    assert_eq!(body["result"]["exitCode"], 0);
}

#[tokio::test]
async fn test_compile_without_input_uses_empty_stdin() {
    let root = tempfile::tempdir().unwrap();
    let request = evaluate_request(
        "double",
        "compile",
        serde_json::json!({"code": "cat; echo done", "language": "sh"}),
    );

    let (status, body) = send(test_app(root.path()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["output"], "done\n");
}

#[tokio::test]
async fn test_compile_error_is_reported_as_output() {
    let root = tempfile::tempdir().unwrap();
    let request = evaluate_request(
        "double",
        "compile",
        serde_json::json!({"code": "if then fi (", "language": "shell"}),
    );

    let (status, body) = send(test_app(root.path()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["verdict"], "compile_error");
    assert!(!body["result"]["output"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_visible_results_and_summary() {
    let root = tempfile::tempdir().unwrap();
    let request = evaluate_request(
        "double",
        "visible",
        serde_json::json!({"code": DOUBLER, "language": "shell", "input": "ignored"}),
    );

    let (status, body) = send(test_app(root.path()), request).await;

    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["input"], "1\n");
    assert_eq!(results[0]["actualOutput"], "2\n");
    assert_eq!(results[0]["passed"], true);
    assert_eq!(results[1]["passed"], true);
    assert_eq!(body["summary"], "2/2 test cases passed");
    assert_eq!(body["totalCases"], 2);
    assert_eq!(body["passedCases"], 2);
}

#[tokio::test]
async fn test_hidden_response_never_leaks_expected_output() {
    let root = tempfile::tempdir().unwrap();
    let request = evaluate_request(
        "double",
        "hidden",
        serde_json::json!({"code": DOUBLER, "language": "shell"}),
    );

    let (status, body) = send(test_app(root.path()), request).await;

    assert_eq!(status, StatusCode::OK);
    let hidden = body["hiddenResults"].as_array().unwrap();
    assert_eq!(hidden.len(), 3);
    for result in hidden {
        assert!(result.get("expectedOutput").is_none());
        assert!(result.get("passed").is_none());
    }
    assert!(!body.to_string().contains("expectedOutput"));
    assert_eq!(body["summary"], "2/3 test cases passed");
    assert_eq!(body["passedCases"], 2);
}

#[tokio::test]
async fn test_invalid_action_is_400() {
    let root = tempfile::tempdir().unwrap();
    let request = evaluate_request(
        "double",
        "submit",
        serde_json::json!({"code": DOUBLER, "language": "shell"}),
    );

    let (status, body) = send(test_app(root.path()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_action");
}

#[tokio::test]
async fn test_unsupported_language_is_400() {
    let root = tempfile::tempdir().unwrap();
    let request = evaluate_request(
        "double",
        "visible",
        serde_json::json!({"code": "x", "language": "cobol"}),
    );

    let (status, body) = send(test_app(root.path()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "unsupported_language");
}

#[tokio::test]
async fn test_evaluate_unknown_challenge_is_404() {
    let root = tempfile::tempdir().unwrap();
    let request = evaluate_request(
        "missing",
        "visible",
        serde_json::json!({"code": DOUBLER, "language": "shell"}),
    );

    let (status, _) = send(test_app(root.path()), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_languages_status_and_metrics() {
    let root = tempfile::tempdir().unwrap();
    let app = test_app(root.path());

    let (status, body) = send(
        app.clone(),
        Request::builder().uri("/api/languages").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "shell");
    assert_eq!(body[0]["compiled"], true);

    let (status, body) = send(
        app.clone(),
        Request::builder().uri("/status").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "process");
    assert_eq!(body["availableSlots"], 8);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_body_without_code_is_json_400() {
    let root = tempfile::tempdir().unwrap();
    let request = evaluate_request(
        "double",
        "visible",
        serde_json::json!({"language": "shell"}),
    );

    let (status, body) = send(test_app(root.path()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");
    assert!(body["error"].as_str().unwrap().contains("code"));
}

#[tokio::test]
async fn test_missing_challenge_id_is_json_400() {
    let root = tempfile::tempdir().unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/api/challenges/evaluate?action=visible")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({"code": DOUBLER, "language": "shell"}).to_string()))
        .unwrap();

    let (status, body) = send(test_app(root.path()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");
}

#[tokio::test]
async fn test_wrong_content_type_is_json_400() {
    let root = tempfile::tempdir().unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/api/challenges/evaluate?challengeId=double&action=visible")
        .header("content-type", "text/plain")
        .body(Body::from("print"))
        .unwrap();

    let (status, body) = send(test_app(root.path()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");
}

#[tokio::test]
async fn test_cors_preflight_for_evaluate() {
    let root = tempfile::tempdir().unwrap();
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/challenges/evaluate?challengeId=double&action=visible")
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .body(Body::empty())
        .unwrap();

    let response = test_app(root.path()).oneshot(request).await.unwrap();

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("access-control-allow-origin"));
    assert!(response.headers().contains_key("access-control-allow-methods"));
}

#[tokio::test]
async fn test_cors_restricted_origins() {
    let root = tempfile::tempdir().unwrap();
    let origins = vec!["http://localhost:3000".to_string()];
    let app = test_app_with_origins(root.path(), Some(&origins));

    let allowed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/challenges/search/id?id=double")
                .header("origin", "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    assert_eq!(
        allowed.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:3000"
    );

    let other = app
        .oneshot(
            Request::builder()
                .uri("/api/challenges/search/id?id=double")
                .header("origin", "http://evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(other.headers().get("access-control-allow-origin").is_none());
}
