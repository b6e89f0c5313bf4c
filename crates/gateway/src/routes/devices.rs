//! Tenant-scoped device lifecycle, pairing, and read endpoints.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};

use {
    rijan_protocol::Jid,
    rijan_store::EventFilter,
    serde::Deserialize,
    serde_json::json,
};

use crate::{auth_gate::TenantCtx, error::ApiError, routes::owned_device, state::AppState};

pub async fn list_devices(
    State(app): State<AppState>,
    tenant: TenantCtx,
) -> Result<impl IntoResponse, ApiError> {
    let devices = app.inner.store.devices().list_by_tenant(&tenant.tenant_id).await?;
    Ok(Json(json!({ "devices": devices })))
}

pub async fn get_device(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let session = app.inner.store.sessions().find(&device.id).await?;
    Ok(Json(json!({ "device": device, "session": session })))
}

pub async fn device_health(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let health = app.inner.engine.health(&device).await;
    Ok(Json(health))
}

pub async fn start_device(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    app.inner.engine.start(&tenant.tenant_id, &device.id).await?;
    let device = owned_device(&app, &tenant, &device_id).await?;
    Ok(Json(json!({ "device": device })))
}

pub async fn stop_device(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    app.inner.engine.stop(&device.id).await?;
    let device = owned_device(&app, &tenant, &device_id).await?;
    Ok(Json(json!({ "device": device })))
}

pub async fn logout_device(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    app.inner.engine.logout(&tenant.tenant_id, &device.id).await?;
    let device = owned_device(&app, &tenant, &device_id).await?;
    Ok(Json(json!({ "device": device })))
}

pub async fn pairing_qr(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let pairing = app.inner.engine.request_qr(&device.id).await?;
    Ok(Json(pairing))
}

#[derive(Deserialize)]
pub struct PairingCodeBody {
    phone: String,
}

pub async fn pairing_code(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Json(body): Json<PairingCodeBody>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let phone = body.phone.trim();
    if phone.is_empty() || !phone.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::validation("phone must be bare international digits"));
    }
    let pairing = app.inner.engine.request_pairing_code(&device.id, phone).await?;
    Ok(Json(pairing))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    since: Option<i64>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    limit: Option<i64>,
}

pub async fn list_events(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let events = app
        .inner
        .store
        .events()
        .list_scoped(
            &tenant.tenant_id,
            &device.id,
            &EventFilter {
                since: query.since,
                event_type: query.event_type,
                limit: query.limit,
            },
        )
        .await?;
    Ok(Json(json!({ "events": events })))
}

#[derive(Deserialize)]
pub struct ChatsQuery {
    limit: Option<i64>,
}

pub async fn list_chats(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Query(query): Query<ChatsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let chats = app
        .inner
        .store
        .chats()
        .list_scoped(&tenant.tenant_id, &device.id, limit)
        .await?;
    Ok(Json(json!({ "chats": chats })))
}

// ── Groups ───────────────────────────────────────────────────────────────────

fn parse_participants(raw: &[String]) -> Result<Vec<Jid>, ApiError> {
    if raw.is_empty() {
        return Err(ApiError::validation("participants must not be empty"));
    }
    raw.iter()
        .map(|p| Jid::normalize(p).map_err(ApiError::from))
        .collect()
}

#[derive(Deserialize)]
pub struct GroupCreateBody {
    subject: String,
    participants: Vec<String>,
}

pub async fn group_create(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Json(body): Json<GroupCreateBody>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let subject = body.subject.trim();
    if subject.is_empty() || subject.len() > 100 {
        return Err(ApiError::validation("subject must be 1-100 characters"));
    }
    let participants = parse_participants(&body.participants)?;
    let group = app.inner.engine.group_create(&device.id, subject, &participants).await?;
    Ok(Json(json!({ "groupJid": group.as_str() })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMembersBody {
    group_jid: String,
    participants: Vec<String>,
}

pub async fn group_participants_add(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Json(body): Json<GroupMembersBody>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let group = Jid::normalize(&body.group_jid)?;
    if !group.is_group() {
        return Err(ApiError::validation("groupJid must be a group address"));
    }
    let participants = parse_participants(&body.participants)?;
    app.inner.engine.group_add(&device.id, &group, &participants).await?;
    Ok(Json(json!({ "added": participants.len() })))
}

pub async fn group_participants_remove(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Json(body): Json<GroupMembersBody>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let group = Jid::normalize(&body.group_jid)?;
    if !group.is_group() {
        return Err(ApiError::validation("groupJid must be a group address"));
    }
    let participants = parse_participants(&body.participants)?;
    app.inner.engine.group_remove(&device.id, &group, &participants).await?;
    Ok(Json(json!({ "removed": participants.len() })))
}

// ── Privacy ──────────────────────────────────────────────────────────────────

pub async fn get_privacy(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    let settings = app.inner.engine.privacy_settings(&device.id).await?;
    Ok(Json(json!({ "settings": settings })))
}

#[derive(Deserialize)]
pub struct PrivacyBody {
    name: String,
    value: String,
}

pub async fn set_privacy(
    State(app): State<AppState>,
    tenant: TenantCtx,
    Path(device_id): Path<String>,
    Json(body): Json<PrivacyBody>,
) -> Result<impl IntoResponse, ApiError> {
    let device = owned_device(&app, &tenant, &device_id).await?;
    const KNOWN: [&str; 6] = [
        "lastSeen",
        "online",
        "profilePhoto",
        "status",
        "readReceipts",
        "groupsAdd",
    ];
    if !KNOWN.contains(&body.name.as_str()) {
        return Err(ApiError::validation("unknown privacy setting"));
    }
    app.inner
        .engine
        .set_privacy_setting(&device.id, &body.name, &body.value)
        .await?;
    Ok(Json(json!({ "updated": body.name })))
}
