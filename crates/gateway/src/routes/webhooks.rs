//! Tenant webhook subscriptions.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use {
    serde::Deserialize,
    serde_json::json,
};

use rijan_store::{NewWebhook, WebhookUpdate};

use crate::{auth_gate::TenantCtx, error::ApiError, state::AppState};

/// Every token a subscription may carry.
const KNOWN_EVENTS: [&str; 17] = [
    "message.received",
    "message.updated",
    "message.deleted",
    "receipt.delivery",
    "receipt.read",
    "device.connected",
    "device.disconnected",
    "group.created",
    "group.updated",
    "group.deleted",
    "participant.added",
    "participant.removed",
    "contact.updated",
    "chat.upserted",
    "chat.deleted",
    "webhook.test",
    "message.status",
];

fn validate_events(events: &[String]) -> Result<(), ApiError> {
    if events.is_empty() {
        return Err(ApiError::validation("events must not be empty"));
    }
    for event in events {
        if !KNOWN_EVENTS.contains(&event.as_str()) {
            return Err(
                ApiError::validation(format!("unknown event type {event:?}"))
                    .with_details(json!({ "known": KNOWN_EVENTS })),
            );
        }
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<(), ApiError> {
    let parsed =
        url::Url::parse(url).map_err(|_| ApiError::validation("url is not a valid URL"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::validation("url must be http or https"));
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebhookBody {
    url: String,
    secret: Option<String>,
    events: Vec<String>,
    retry_count: Option<i64>,
    timeout_ms: Option<i64>,
}

pub async fn create_webhook(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Json(body): Json<CreateWebhookBody>,
) -> Result<impl IntoResponse, ApiError> {
    validate_url(&body.url)?;
    validate_events(&body.events)?;
    let retry_count = body.retry_count.map(|n| n.clamp(0, 10));
    let timeout_ms = body.timeout_ms.map(|n| n.clamp(100, 60_000));

    let webhook = app
        .inner
        .store
        .webhooks()
        .create(NewWebhook {
            tenant_id: tenant.tenant_id.clone(),
            url: body.url,
            secret: body.secret,
            events: body.events,
            retry_count,
            timeout_ms,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "webhook": webhook }))))
}

pub async fn list_webhooks(
    State(app): State<AppState>,
    tenant: TenantCtx,
) -> Result<impl IntoResponse, ApiError> {
    let webhooks = app.inner.store.webhooks().list_by_tenant(&tenant.tenant_id).await?;
    Ok(Json(json!({ "webhooks": webhooks })))
}

pub async fn get_webhook(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(webhook_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let webhook = app
        .inner
        .store
        .webhooks()
        .find_scoped(&tenant.tenant_id, &webhook_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({ "webhook": webhook })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWebhookBody {
    url: Option<String>,
    /// `null` clears the secret; absent leaves it alone.
    #[serde(default, with = "double_option")]
    secret: Option<Option<String>>,
    events: Option<Vec<String>>,
    enabled: Option<bool>,
    retry_count: Option<i64>,
    timeout_ms: Option<i64>,
}

/// Distinguish "absent" from "present but null" for PATCH-style fields.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

pub async fn update_webhook(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(webhook_id): Path<String>,
    Json(body): Json<UpdateWebhookBody>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(url) = body.url.as_deref() {
        validate_url(url)?;
    }
    if let Some(events) = body.events.as_deref() {
        validate_events(events)?;
    }

    let webhook = app
        .inner
        .store
        .webhooks()
        .update(
            &tenant.tenant_id,
            &webhook_id,
            WebhookUpdate {
                url: body.url,
                secret: body.secret,
                events: body.events,
                enabled: body.enabled,
                retry_count: body.retry_count.map(|n| n.clamp(0, 10)),
                timeout_ms: body.timeout_ms.map(|n| n.clamp(100, 60_000)),
            },
        )
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({ "webhook": webhook })))
}

pub async fn delete_webhook(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(webhook_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !app
        .inner
        .store
        .webhooks()
        .delete(&tenant.tenant_id, &webhook_id)
        .await?
    {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/webhooks/{id}/test: synthetic delivery through the real
/// signing and retry path.
pub async fn test_webhook(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(webhook_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let webhook = app
        .inner
        .store
        .webhooks()
        .find_scoped(&tenant.tenant_id, &webhook_id)
        .await?
        .ok_or_else(ApiError::not_found)?;

    let outcome = app.inner.pipeline.deliver_test(&webhook).await;
    Ok(Json(json!({
        "delivered": outcome.ok,
        "attempts": outcome.attempts,
        "statusCode": outcome.status_code,
        "lastError": outcome.last_error,
    })))
}

/// GET /v1/webhooks/{id}/dlq: inspect dead letters for one webhook.
pub async fn list_dlq(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(webhook_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Ownership first; the DLQ table itself is keyed by webhook only.
    let webhook = app
        .inner
        .store
        .webhooks()
        .find_scoped(&tenant.tenant_id, &webhook_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let entries = app.inner.store.dlq().list_for_webhook(&webhook.id, 100).await?;
    Ok(Json(json!({ "deadLetters": entries })))
}
