//! Message production endpoints, the outbox's front door.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use {
    rijan_outbox::RateDecision,
    rijan_protocol::{Jid, OutgoingContent},
    rijan_store::{NewOutboxMessage, OutboxStatus},
    serde::Deserialize,
    serde_json::json,
};

use crate::{
    auth_gate::TenantCtx,
    error::ApiError,
    media_guard,
    routes::owned_device,
    state::AppState,
};

/// Shared production path: ownership → connected → recipient →
/// rate limit → idempotent enqueue.
async fn produce(
    app: &AppState,
    tenant: &TenantCtx,
    device_id: &str,
    to: &str,
    content: OutgoingContent,
    idempotency_key: Option<String>,
) -> Result<Response, ApiError> {
    let device = owned_device(app, tenant, device_id).await?;

    if !app.inner.engine.is_connected(&device.id).await {
        return Err(ApiError::state("device is not connected"));
    }

    let jid = Jid::normalize(to)?;

    let kind = content.kind();
    let decision = app.inner.limiter.check(&device.id, kind);
    let (limit, remaining, reset) = match decision {
        RateDecision::Denied {
            limit,
            retry_after_secs,
            reset_secs,
        } => {
            return Err(ApiError::new(
                crate::error::ErrorKind::RateLimited,
                format!("too many {kind} messages, retry later"),
            )
            .with_header("Retry-After", retry_after_secs.to_string())
            .with_header("X-RateLimit-Limit", limit.to_string())
            .with_header("X-RateLimit-Remaining", "0".to_string())
            .with_header("X-RateLimit-Reset", reset_secs.to_string()));
        }
        RateDecision::Allowed {
            limit,
            remaining,
            reset_secs,
        } => (limit, remaining, reset_secs),
    };

    let payload =
        serde_json::to_value(&content).map_err(|e| ApiError::internal(e.to_string()))?;
    let (row, deduplicated) = app
        .inner
        .outbox
        .enqueue(NewOutboxMessage {
            tenant_id: tenant.tenant_id.clone(),
            device_id: device.id.clone(),
            jid: jid.as_str().to_string(),
            message_type: kind.to_string(),
            payload,
            idempotency_key,
        })
        .await?;

    let status = if deduplicated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let mut response = (
        status,
        Json(json!({
            "id": row.id,
            "status": row.status,
            "deduplicated": deduplicated,
        })),
    )
        .into_response();
    let headers = response.headers_mut();
    for (name, value) in [
        ("X-RateLimit-Limit", limit.to_string()),
        ("X-RateLimit-Remaining", remaining.to_string()),
        ("X-RateLimit-Reset", reset.to_string()),
    ] {
        if let Ok(value) = value.parse() {
            headers.insert(name, value);
        }
    }
    Ok(response)
}

// ── Send endpoints ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBody {
    to: String,
    text: String,
    idempotency_key: Option<String>,
}

pub async fn send_text(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Json(body): Json<TextBody>,
) -> Result<Response, ApiError> {
    if body.text.is_empty() {
        return Err(ApiError::validation("text must not be empty"));
    }
    if body.text.len() > 64 * 1024 {
        return Err(ApiError::validation("text exceeds the 64 KiB limit"));
    }
    produce(
        &app,
        &tenant,
        &device_id,
        &body.to,
        OutgoingContent::Text { body: body.text },
        body.idempotency_key,
    )
    .await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBody {
    to: String,
    media_url: String,
    mime_type: Option<String>,
    caption: Option<String>,
    idempotency_key: Option<String>,
}

pub async fn send_media(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Json(body): Json<MediaBody>,
) -> Result<Response, ApiError> {
    // SSRF vetting happens before any connection; the probe then proves
    // the media is fetchable within the size/redirect/time budgets.
    let url = media_guard::validate_media_url(&body.media_url).await?;
    media_guard::probe_media_url(&media_guard::media_client(), url.as_str()).await?;

    produce(
        &app,
        &tenant,
        &device_id,
        &body.to,
        OutgoingContent::Media {
            url: Some(url.to_string()),
            bytes: None,
            mime_type: body.mime_type,
            caption: body.caption,
        },
        body.idempotency_key,
    )
    .await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationBody {
    to: String,
    latitude: f64,
    longitude: f64,
    name: Option<String>,
    idempotency_key: Option<String>,
}

pub async fn send_location(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Json(body): Json<LocationBody>,
) -> Result<Response, ApiError> {
    if !(-90.0..=90.0).contains(&body.latitude) || !(-180.0..=180.0).contains(&body.longitude) {
        return Err(ApiError::validation("latitude/longitude out of range"));
    }
    produce(
        &app,
        &tenant,
        &device_id,
        &body.to,
        OutgoingContent::Location {
            latitude: body.latitude,
            longitude: body.longitude,
            name: body.name,
        },
        body.idempotency_key,
    )
    .await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactBody {
    to: String,
    full_name: String,
    vcard: Option<String>,
    idempotency_key: Option<String>,
}

pub async fn send_contact(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Json(body): Json<ContactBody>,
) -> Result<Response, ApiError> {
    let full_name = body.full_name.trim().to_string();
    if full_name.is_empty() {
        return Err(ApiError::validation("fullName must not be empty"));
    }
    let vcard = body.vcard.unwrap_or_else(|| {
        format!("BEGIN:VCARD\nVERSION:3.0\nFN:{full_name}\nEND:VCARD")
    });
    produce(
        &app,
        &tenant,
        &device_id,
        &body.to,
        OutgoingContent::Contact { full_name, vcard },
        body.idempotency_key,
    )
    .await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionBody {
    to: String,
    message_id: String,
    emoji: String,
    idempotency_key: Option<String>,
}

pub async fn send_reaction(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Json(body): Json<ReactionBody>,
) -> Result<Response, ApiError> {
    if body.message_id.is_empty() {
        return Err(ApiError::validation("messageId must not be empty"));
    }
    produce(
        &app,
        &tenant,
        &device_id,
        &body.to,
        OutgoingContent::Reaction {
            message_id: body.message_id,
            emoji: body.emoji,
        },
        body.idempotency_key,
    )
    .await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollBody {
    to: String,
    name: String,
    options: Vec<String>,
    selectable_count: Option<i64>,
    idempotency_key: Option<String>,
}

pub async fn send_poll(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Json(body): Json<PollBody>,
) -> Result<Response, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::validation("name must not be empty"));
    }
    if body.options.len() < 2 || body.options.len() > 12 {
        return Err(ApiError::validation("polls need 2-12 options"));
    }
    produce(
        &app,
        &tenant,
        &device_id,
        &body.to,
        OutgoingContent::Poll {
            name: body.name,
            options: body.options,
            selectable_count: body.selectable_count.unwrap_or(1).clamp(1, 12),
        },
        body.idempotency_key,
    )
    .await
}

// ── Status & tombstones ──────────────────────────────────────────────────────

pub async fn message_status(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path((device_id, message_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let row = app
        .inner
        .store
        .outbox()
        .find_scoped(&tenant.tenant_id, &device.id, &message_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({ "message": row })))
}

#[derive(Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    limit: Option<i64>,
}

pub async fn list_messages(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let status = query
        .status
        .as_deref()
        .map(OutboxStatus::parse)
        .transpose()
        .map_err(|_| ApiError::validation("unknown status filter"))?;
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let messages = app
        .inner
        .store
        .outbox()
        .list_scoped(&tenant.tenant_id, &device.id, status, limit)
        .await?;
    Ok(Json(json!({ "messages": messages })))
}

/// DELETE /v1/devices/{d}/messages/{id}: enqueue a protocol-side
/// tombstone for an already-sent message.
pub async fn delete_message(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path((device_id, message_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let row = app
        .inner
        .store
        .outbox()
        .find_scoped(&tenant.tenant_id, &device.id, &message_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let Some(wa_message_id) = row.wa_message_id else {
        return Err(ApiError::state("message has not been sent yet"));
    };

    produce(
        &app,
        &tenant,
        &device_id,
        &row.jid,
        OutgoingContent::Delete {
            message_id: wa_message_id,
        },
        None,
    )
    .await
}
