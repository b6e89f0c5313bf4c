//! Master-key-gated tenant and device provisioning.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use {
    rijan_common::prefixed_id,
    rijan_crypto::{issue_tenant_token, token_fingerprint},
    rijan_store::{NewAuditEntry, TenantStatus},
    serde::Deserialize,
    serde_json::json,
};

use crate::{auth_gate::AdminGate, error::ApiError, state::AppState};

const TOKEN_TTL_DAYS: u32 = 365;

#[derive(Deserialize)]
pub struct CreateTenantBody {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchTenantBody {
    status: TenantStatus,
}

#[derive(Deserialize)]
pub struct CreateDeviceBody {
    label: String,
}

async fn audit_admin(
    app: &AppState,
    tenant_id: Option<&str>,
    action: &str,
    resource_type: &str,
    resource_id: &str,
) {
    if let Err(e) = app
        .inner
        .store
        .audit()
        .append(NewAuditEntry {
            tenant_id,
            actor: "master",
            action,
            resource_type: Some(resource_type),
            resource_id: Some(resource_id),
            ..Default::default()
        })
        .await
    {
        tracing::warn!(action, "audit append failed: {e}");
    }
}

/// POST /admin/tenants. The token appears exactly once, here.
pub async fn create_tenant(
    State(app): State<AppState>,
    _: AdminGate,
    Json(body): Json<CreateTenantBody>,
) -> Result<impl IntoResponse, ApiError> {
    let name = body.name.trim();
    if name.is_empty() || name.len() > 120 {
        return Err(ApiError::validation("name must be 1-120 characters"));
    }

    let tenant_id = prefixed_id("tenant");
    let token = issue_tenant_token(&app.inner.master, &tenant_id, TOKEN_TTL_DAYS);
    let tenant = app
        .inner
        .store
        .tenants()
        .create_with_id(&tenant_id, name, &token_fingerprint(&token))
        .await?;

    audit_admin(&app, Some(&tenant.id), "tenant.created", "tenant", &tenant.id).await;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "tenant": tenant, "token": token })),
    ))
}

pub async fn list_tenants(
    State(app): State<AppState>,
    _: AdminGate,
) -> Result<impl IntoResponse, ApiError> {
    let tenants = app.inner.store.tenants().list().await?;
    Ok(Json(json!({ "tenants": tenants })))
}

pub async fn get_tenant(
    State(app): State<AppState>,
    _: AdminGate,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = app
        .inner
        .store
        .tenants()
        .find(&tenant_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({ "tenant": tenant })))
}

/// PATCH /admin/tenants/{t}: suspend or re-activate.
pub async fn patch_tenant(
    State(app): State<AppState>,
    _: AdminGate,
    Path(tenant_id): Path<String>,
    Json(body): Json<PatchTenantBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.status == TenantStatus::Deleted {
        return Err(ApiError::validation("use DELETE to remove a tenant"));
    }
    if !app.inner.store.tenants().set_status(&tenant_id, body.status).await? {
        return Err(ApiError::not_found());
    }
    if body.status == TenantStatus::Suspended {
        app.inner.engine.stop_tenant(&tenant_id).await;
    }
    audit_admin(&app, Some(&tenant_id), "tenant.status_changed", "tenant", &tenant_id).await;

    let tenant = app
        .inner
        .store
        .tenants()
        .find(&tenant_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({ "tenant": tenant })))
}

/// DELETE /admin/tenants/{t}: tombstone; devices go down with it.
pub async fn delete_tenant(
    State(app): State<AppState>,
    _: AdminGate,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    app.inner.engine.stop_tenant(&tenant_id).await;
    if !app.inner.store.tenants().soft_delete(&tenant_id).await? {
        return Err(ApiError::not_found());
    }
    audit_admin(&app, Some(&tenant_id), "tenant.deleted", "tenant", &tenant_id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/tenants/{t}/rotate-token. Invalidates the old token.
pub async fn rotate_token(
    State(app): State<AppState>,
    _: AdminGate,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let token = issue_tenant_token(&app.inner.master, &tenant_id, TOKEN_TTL_DAYS);
    if !app
        .inner
        .store
        .tenants()
        .set_api_key_hash(&tenant_id, &token_fingerprint(&token))
        .await?
    {
        return Err(ApiError::not_found());
    }
    audit_admin(&app, Some(&tenant_id), "tenant.token_rotated", "tenant", &tenant_id).await;
    Ok(Json(json!({ "token": token })))
}

/// POST /admin/tenants/{t}/devices
pub async fn create_device(
    State(app): State<AppState>,
    _: AdminGate,
    Path(tenant_id): Path<String>,
    Json(body): Json<CreateDeviceBody>,
) -> Result<impl IntoResponse, ApiError> {
    let label = body.label.trim();
    if label.is_empty() || label.len() > 120 {
        return Err(ApiError::validation("label must be 1-120 characters"));
    }
    // The tenant must exist and not be tombstoned.
    if app.inner.store.tenants().find(&tenant_id).await?.is_none() {
        return Err(ApiError::not_found());
    }

    let device = app.inner.store.devices().create(&tenant_id, label).await?;
    audit_admin(&app, Some(&tenant_id), "device.created", "device", &device.id).await;
    Ok((StatusCode::CREATED, Json(json!({ "device": device }))))
}
