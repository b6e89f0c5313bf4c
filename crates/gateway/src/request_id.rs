//! Per-request correlation ids.
//!
//! A task-local carries the id through the handler so the error envelope
//! can embed it without threading a value through every signature.

use {
    axum::{extract::Request, middleware::Next, response::Response},
    http::HeaderValue,
};

tokio::task_local! {
    static REQUEST_ID: String;
}

/// The current request's id, if we're inside the middleware scope.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

/// Accept an inbound `x-request-id` or mint one, scope it task-locally,
/// and echo it on the response.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut response = REQUEST_ID.scope(id.clone(), next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
