pub mod admin;
pub mod devices;
pub mod messages;
pub mod system;
pub mod webhooks;

use rijan_store::Device;

use crate::{auth_gate::TenantCtx, error::ApiError, state::AppState};

/// Resolve a device under the caller's tenant. A foreign or unknown
/// device is a plain 404 — never a 403, which would leak existence.
pub(crate) async fn owned_device(
    app: &AppState,
    tenant: &TenantCtx,
    device_id: &str,
) -> Result<Device, ApiError> {
    app.inner
        .store
        .devices()
        .find_scoped(&tenant.tenant_id, device_id)
        .await?
        .ok_or_else(ApiError::not_found)
}
