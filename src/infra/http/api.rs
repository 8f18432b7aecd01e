//! Request-handling surface: the shell page, update submissions, and
//! processing counters.

use axum::{
    Json, Router, middleware,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::preview::PendingUpdate;
use crate::application::render::RenderOptions;
use crate::application::stats::StatsSnapshot;

use super::{PreviewState, log_responses};

pub fn build_router(state: PreviewState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/index.html", get(index))
        .route("/update", post(update))
        .route("/stats", get(stats))
        .layer(middleware::from_fn(log_responses))
        .with_state(state)
}

/// Inbound update payload. `filepath` is advisory only: inclusion targets
/// always resolve against the configured base directory.
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub filepath: Option<String>,
    #[serde(default = "default_true")]
    pub enable_wikilinks: bool,
    #[serde(default = "default_true")]
    pub enable_latex: bool,
    #[serde(default)]
    pub scroll_percent: Option<f64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct Acknowledgement {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

async fn index(State(state): State<PreviewState>) -> Html<String> {
    Html(state.shell.html().to_string())
}

async fn update(
    State(state): State<PreviewState>,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    status: "error",
                    message: rejection.body_text(),
                }),
            )
                .into_response();
        }
    };

    debug!(
        target = "infra::http::api",
        bytes = request.content.len(),
        filepath = request.filepath.as_deref().unwrap_or(""),
        wikilinks = request.enable_wikilinks,
        latex = request.enable_latex,
        "Queued preview update"
    );

    state.session.queue_update(PendingUpdate {
        text: request.content,
        options: RenderOptions {
            wikilinks: request.enable_wikilinks,
            latex: request.enable_latex,
        },
        scroll_percent: request.scroll_percent,
    });

    Json(Acknowledgement { status: "ok" }).into_response()
}

async fn stats(State(state): State<PreviewState>) -> Json<StatsSnapshot> {
    Json(state.session.stats().snapshot())
}
