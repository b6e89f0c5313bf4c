//! Router assembly and the serve loop.

use std::future::Future;

use {
    axum::{
        extract::Request,
        middleware::{self, Next},
        response::Response,
        routing::{delete, get, post},
        Router,
    },
    tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer},
    tracing::info,
};

use crate::{
    request_id::request_id_middleware,
    routes::{admin, devices, messages, system, webhooks},
    state::AppState,
};

/// JSON bodies have no business being bigger than this.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

async fn count_requests(request: Request, next: Next) -> Response {
    let method = request.method().as_str().to_string();
    let response = next.run(request).await;
    rijan_metrics::counter!(
        rijan_metrics::HTTP_REQUESTS_TOTAL,
        "method" => method,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

#[must_use]
pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/tenants", post(admin::create_tenant).get(admin::list_tenants))
        .route(
            "/tenants/{tenant_id}",
            get(admin::get_tenant)
                .patch(admin::patch_tenant)
                .delete(admin::delete_tenant),
        )
        .route("/tenants/{tenant_id}/rotate-token", post(admin::rotate_token))
        .route("/tenants/{tenant_id}/devices", post(admin::create_device));

    let tenant_routes = Router::new()
        .route("/devices", get(devices::list_devices))
        .route("/devices/{device_id}", get(devices::get_device))
        .route("/devices/{device_id}/health", get(devices::device_health))
        .route("/devices/{device_id}/start", post(devices::start_device))
        .route("/devices/{device_id}/stop", post(devices::stop_device))
        .route("/devices/{device_id}/logout", post(devices::logout_device))
        .route("/devices/{device_id}/pairing/qr", post(devices::pairing_qr))
        .route("/devices/{device_id}/pairing/code", post(devices::pairing_code))
        .route("/devices/{device_id}/events", get(devices::list_events))
        .route("/devices/{device_id}/chats", get(devices::list_chats))
        .route("/devices/{device_id}/groups/create", post(devices::group_create))
        .route(
            "/devices/{device_id}/groups/participants/add",
            post(devices::group_participants_add),
        )
        .route(
            "/devices/{device_id}/groups/participants/remove",
            post(devices::group_participants_remove),
        )
        .route(
            "/devices/{device_id}/privacy/settings",
            get(devices::get_privacy).post(devices::set_privacy),
        )
        .route("/devices/{device_id}/messages", get(messages::list_messages))
        .route("/devices/{device_id}/messages/text", post(messages::send_text))
        .route("/devices/{device_id}/messages/media", post(messages::send_media))
        .route("/devices/{device_id}/messages/location", post(messages::send_location))
        .route("/devices/{device_id}/messages/contact", post(messages::send_contact))
        .route("/devices/{device_id}/messages/reaction", post(messages::send_reaction))
        .route("/devices/{device_id}/messages/poll", post(messages::send_poll))
        .route(
            "/devices/{device_id}/messages/{message_id}",
            delete(messages::delete_message),
        )
        .route(
            "/devices/{device_id}/messages/{message_id}/status",
            get(messages::message_status),
        )
        .route("/webhooks", post(webhooks::create_webhook).get(webhooks::list_webhooks))
        .route(
            "/webhooks/{webhook_id}",
            get(webhooks::get_webhook)
                .put(webhooks::update_webhook)
                .delete(webhooks::delete_webhook),
        )
        .route("/webhooks/{webhook_id}/test", post(webhooks::test_webhook))
        .route("/webhooks/{webhook_id}/dlq", get(webhooks::list_dlq));

    Router::new()
        .nest("/admin", admin_routes)
        .nest("/v1", tenant_routes)
        .route("/health", get(system::health))
        .route("/ready", get(system::ready))
        .route("/metrics", get(system::metrics))
        .layer(middleware::from_fn(count_requests))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Serve until the shutdown future resolves, then drain in-flight
/// requests.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "gateway listening");
    }
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
