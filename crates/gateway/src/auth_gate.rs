//! The two authentication gates.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use {
    rijan_crypto::{token_fingerprint, verify_tenant_token},
    rijan_store::{NewAuditEntry, TenantStatus},
    tracing::warn,
};

use crate::{
    error::{ApiError, ErrorKind},
    state::AppState,
};

/// A request that passed the master-key gate.
pub struct AdminGate;

/// A request that passed the tenant-token gate, with its resolved tenant.
#[derive(Debug, Clone)]
pub struct TenantCtx {
    pub tenant_id: String,
    pub name: String,
    pub status: TenantStatus,
}

fn client_ip(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

fn user_agent(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for AdminGate
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);

        let submitted = parts
            .headers
            .get("x-master-key")
            .and_then(|v| v.to_str().ok());

        let ok = submitted.is_some_and(|plain| app.inner.master.verify(plain));
        if ok {
            return Ok(AdminGate);
        }

        // Failed admin auth is always worth an audit row.
        let ip = client_ip(parts);
        let ua = user_agent(parts);
        if let Err(e) = app
            .inner
            .store
            .audit()
            .append(NewAuditEntry {
                actor: "unknown",
                action: "admin.auth.failed",
                ip_address: ip.as_deref(),
                user_agent: ua.as_deref(),
                ..Default::default()
            })
            .await
        {
            warn!("failed to audit admin auth failure: {e}");
        }

        Err(ApiError::auth("invalid master key"))
    }
}

/// Pull the bearer token out of `Authorization` or `X-API-Key`.
fn extract_token(parts: &Parts) -> Option<String> {
    if let Some(auth) = parts
        .headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }
    parts
        .headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

impl<S> FromRequestParts<S> for TenantCtx
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);

        let Some(token) = extract_token(parts) else {
            return Err(ApiError::auth("missing API token"));
        };

        let check = verify_tenant_token(&app.inner.master, &token);
        if check.expired {
            return Err(ApiError::new(ErrorKind::AuthExpired, "token has expired"));
        }
        if !check.valid {
            return Err(ApiError::auth("invalid API token"));
        }

        let tenant = app
            .inner
            .store
            .tenants()
            .find_by_api_key_hash(&token_fingerprint(&token))
            .await?
            .ok_or_else(|| ApiError::auth("unknown API token"))?;

        if tenant.status != TenantStatus::Active {
            return Err(ApiError::auth("tenant is suspended"));
        }

        Ok(TenantCtx {
            tenant_id: tenant.id,
            name: tenant.name,
            status: tenant.status,
        })
    }
}
