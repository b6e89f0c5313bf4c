//! SSRF guard for caller-supplied media URLs.
//!
//! Every URL is vetted before any outbound connection: scheme must be
//! http(s), and every resolved address must be publicly routable. The
//! bounded fetch then enforces the redirect, size, and time budgets,
//! re-vetting each redirect hop.

use std::net::IpAddr;

use {futures::StreamExt, url::Url};

use crate::error::ApiError;

/// Hard cap on a media download.
pub const MAX_MEDIA_BYTES: u64 = 50 * 1024 * 1024;
/// Redirect hops allowed before giving up.
pub const MAX_REDIRECTS: usize = 5;
/// Connect + read budget for the whole fetch.
pub const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// `true` if the address is publicly routable — not loopback, private,
/// link-local, CGNAT, ULA, or any other internal range.
#[must_use]
pub fn is_public_ip(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (CGNAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24 (IETF protocol assignments)
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0))
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_public_ip(IpAddr::V4(mapped));
            }
            !(v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                // fe80::/10 (link-local)
                || (v6.segments()[0] & 0xFFC0) == 0xFE80)
        }
    }
}

/// Parse and vet a URL: scheme, then every resolved address. Performs a
/// DNS lookup but never opens a connection.
pub async fn validate_media_url(raw: &str) -> Result<Url, ApiError> {
    let url = Url::parse(raw).map_err(|_| ApiError::validation("mediaUrl is not a valid URL"))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::validation("mediaUrl must be http or https"));
    }
    let Some(host) = url.host_str() else {
        return Err(ApiError::validation("mediaUrl has no host"));
    };

    // Literal addresses skip DNS.
    if let Ok(addr) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if !is_public_ip(addr) {
            return Err(ApiError::validation("mediaUrl resolves to a private address"));
        }
        return Ok(url);
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| ApiError::validation("mediaUrl host does not resolve"))?
        .map(|sa| sa.ip())
        .collect();
    if addrs.is_empty() {
        return Err(ApiError::validation("mediaUrl host does not resolve"));
    }
    if addrs.iter().any(|addr| !is_public_ip(*addr)) {
        return Err(ApiError::validation("mediaUrl resolves to a private address"));
    }
    Ok(url)
}

/// Bounded fetch proving the URL is deliverable: follows up to five
/// redirects (re-vetting each hop), streams at most 50 MiB, and gives
/// up after the time budget. The body is discarded — the protocol
/// client performs the real transfer at send time.
pub async fn probe_media_url(client: &reqwest::Client, raw: &str) -> Result<(), ApiError> {
    let mut url = validate_media_url(raw).await?;

    let fetch = async {
        for _ in 0..=MAX_REDIRECTS {
            let response = client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| ApiError::validation(format!("mediaUrl unreachable: {e}")))?;

            if response.status().is_redirection() {
                let Some(location) = response
                    .headers()
                    .get(http::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                else {
                    return Err(ApiError::validation("mediaUrl redirect without location"));
                };
                let next = url
                    .join(location)
                    .map_err(|_| ApiError::validation("mediaUrl redirect is invalid"))?;
                url = validate_media_url(next.as_str()).await?;
                continue;
            }

            if !response.status().is_success() {
                return Err(ApiError::validation(format!(
                    "mediaUrl responded with http {}",
                    response.status().as_u16()
                )));
            }

            if let Some(length) = response.content_length() {
                if length > MAX_MEDIA_BYTES {
                    return Err(ApiError::validation("media exceeds the 50 MiB limit"));
                }
            }

            let mut total: u64 = 0;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk =
                    chunk.map_err(|e| ApiError::validation(format!("media read failed: {e}")))?;
                total += chunk.len() as u64;
                if total > MAX_MEDIA_BYTES {
                    return Err(ApiError::validation("media exceeds the 50 MiB limit"));
                }
            }
            return Ok(());
        }
        Err(ApiError::validation("mediaUrl exceeded five redirects"))
    };

    tokio::time::timeout(FETCH_TIMEOUT, fetch)
        .await
        .map_err(|_| ApiError::validation("media fetch timed out"))?
}

/// A reqwest client for media probing: redirects are followed manually
/// so every hop gets vetted.
#[must_use]
pub fn media_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges_are_not_public() {
        let private = [
            "127.0.0.1",
            "127.8.8.8",
            "10.0.0.1",
            "172.16.5.5",
            "192.168.1.1",
            "169.254.169.254",
            "100.64.0.1",
            "0.0.0.0",
            "::1",
            "fe80::1",
            "fc00::1",
            "fd12::34",
            "::ffff:127.0.0.1",
            "::ffff:10.0.0.1",
        ];
        for ip in private {
            assert!(!is_public_ip(ip.parse().unwrap()), "{ip} must be private");
        }
    }

    #[test]
    fn public_addresses_pass() {
        let public = ["93.184.216.34", "8.8.8.8", "2606:2800:220:1:248:1893:25c8:1946"];
        for ip in public {
            assert!(is_public_ip(ip.parse().unwrap()), "{ip} must be public");
        }
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        for url in ["ftp://example.com/x", "file:///etc/passwd", "gopher://x"] {
            let err = validate_media_url(url).await.unwrap_err();
            assert_eq!(err.kind, crate::error::ErrorKind::Validation);
        }
    }

    #[tokio::test]
    async fn rejects_literal_private_hosts_without_any_io() {
        for url in [
            "http://127.0.0.1:8080/x.jpg",
            "http://169.254.169.254/latest/meta-data",
            "http://10.1.2.3/x",
            "http://[::1]/x",
            "http://[fe80::1]/x",
            "http://0.0.0.0/x",
        ] {
            let err = validate_media_url(url).await.unwrap_err();
            assert_eq!(err.kind, crate::error::ErrorKind::Validation, "{url}");
        }
    }

    #[tokio::test]
    async fn rejects_garbage_urls() {
        assert!(validate_media_url("not a url").await.is_err());
        assert!(validate_media_url("http://").await.is_err());
    }
}
