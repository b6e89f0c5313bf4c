//! QR rendering for the pairing flow.

use {base64::Engine as _, qrcode::QrCode};

use crate::error::{Error, Result};

/// Render a pairing payload as an SVG data URL. Clients that prefer to
/// draw their own code can use the raw payload returned alongside it.
pub fn qr_svg_data_url(payload: &str) -> Result<String> {
    let code = QrCode::new(payload.as_bytes()).map_err(|e| Error::Qr(e.to_string()))?;
    let svg = code
        .render::<qrcode::render::svg::Color>()
        .min_dimensions(256, 256)
        .build();
    let encoded = base64::engine::general_purpose::STANDARD.encode(svg);
    Ok(format!("data:image/svg+xml;base64,{encoded}"))
}
