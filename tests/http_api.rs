//! Request-handling surface, exercised without binding sockets.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header::CONTENT_TYPE};
use http_body_util::BodyExt;
use specchio::application::preview::PreviewSession;
use specchio::application::stats::PreviewStats;
use specchio::infra::http::{PreviewState, build_router};
use specchio::presentation::views::PreviewShell;
use tower::ServiceExt;

fn state(dir: &Path) -> PreviewState {
    let stats = Arc::new(PreviewStats::default());
    PreviewState {
        session: Arc::new(PreviewSession::new(
            dir,
            Duration::from_millis(10),
            stats,
        )),
        shell: Arc::new(PreviewShell::load(None, 8766)),
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn update_is_acknowledged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = build_router(state(dir.path()));

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/update")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r##"{"content": "# Hi", "filepath": "notes.md", "scroll_percent": 5.0}"##,
                ))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn malformed_payload_returns_structured_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = build_router(state(dir.path()));

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/update")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from("{not valid json"))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert!(json["message"].as_str().is_some_and(|m| !m.is_empty()));
}

#[tokio::test]
async fn stats_endpoint_reports_counters() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = build_router(state(dir.path()));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/stats")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["updates_processed"], 0);
    assert!(json["document_cache"]["hits"].is_u64());
    assert!(json["inclusion_cache"]["misses"].is_u64());
    assert!(json["average_processing_ms"].is_number());
}

#[tokio::test]
async fn root_serves_the_preview_shell() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = build_router(state(dir.path()));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let html = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(html.contains("id=\"content\""));
    assert!(html.contains("8766"));
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = build_router(state(dir.path()));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/nope")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
