mod api;
mod push;

pub use api::{UpdateRequest, build_router};
pub use push::build_push_router;

use std::sync::Arc;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::info;

use crate::application::preview::PreviewSession;
use crate::presentation::views::PreviewShell;

/// Shared state for both listeners.
#[derive(Clone)]
pub struct PreviewState {
    pub session: Arc<PreviewSession>,
    pub shell: Arc<PreviewShell>,
}

/// Log method, path, and status for every response.
pub(crate) async fn log_responses(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    info!(
        target = "infra::http",
        %method,
        path,
        status = response.status().as_u16(),
        "request"
    );
    response
}
