pub mod embeddings;

use axum::Router;
use axum::http::{Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;

/// Build the application router.
///
/// Route layout:
/// ```text
/// /v1/embeddings   POST   the caching proxy pipeline
/// anything else           404 / 405 in the OpenAI error shape
/// ```
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            embeddings::EMBEDDINGS_PATH,
            post(embeddings::create_embeddings).fallback(method_not_allowed),
        )
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Fallback for unknown paths. Routing is checked before authentication, so
/// these respond without a credential check.
async fn not_found(method: Method, uri: Uri) -> Response {
    let request_id = Uuid::new_v4().to_string();
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %uri.path(),
        status = 404,
        "Request complete"
    );
    AppError::NotFound(format!("no route for {}", uri.path())).into_response()
}

/// Fallback for known paths hit with the wrong method.
async fn method_not_allowed(method: Method, uri: Uri) -> Response {
    let request_id = Uuid::new_v4().to_string();
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %uri.path(),
        status = 405,
        "Request complete"
    );
    AppError::MethodNotAllowed(format!("{method} is not supported on {}", uri.path()))
        .into_response()
}
