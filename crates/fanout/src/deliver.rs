//! Signed webhook delivery with bounded retries.

use std::time::Duration;

use {
    hmac::{Hmac, Mac},
    sha2::Sha256,
    tracing::{debug, warn},
};

use rijan_store::Webhook;

type HmacSha256 = Hmac<Sha256>;

/// Knobs for the delivery loop. The defaults are the wire contract;
/// tests shrink the backoff schedule.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub backoff: Vec<Duration>,
    pub user_agent: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backoff: vec![
                Duration::from_millis(1000),
                Duration::from_millis(5000),
                Duration::from_millis(15000),
            ],
            user_agent: format!("rijan-wa/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Terminal result of one delivery batch (all attempts for one webhook).
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub ok: bool,
    pub attempts: i64,
    pub status_code: Option<i64>,
    pub last_error: Option<String>,
}

/// Hex HMAC-SHA256 of the raw body. An absent secret signs with the
/// empty key — allowed, but receivers get no authenticity from it.
#[must_use]
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Whether a response status is worth another attempt.
fn retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// POST `body` to the webhook, retrying per the backoff schedule up to
/// `retry_count` extra attempts. Returns after the first success,
/// the first non-retryable response, or exhaustion.
pub async fn deliver(
    client: &reqwest::Client,
    config: &DispatchConfig,
    webhook: &Webhook,
    body: &[u8],
) -> DeliveryOutcome {
    let signature = sign_payload(webhook.secret.as_deref().unwrap_or(""), body);
    let max_attempts = webhook.retry_count.max(0) + 1;
    let timeout = Duration::from_millis(webhook.timeout_ms.max(1) as u64);

    let mut status_code = None;
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        let response = client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", &config.user_agent)
            .header("X-Rijan-Signature", &signature)
            .header("X-Rijan-Attempt", attempt.to_string())
            .timeout(timeout)
            .body(body.to_vec())
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                status_code = Some(i64::from(status));
                if response.status().is_success() {
                    debug!(webhook_id = %webhook.id, attempt, status, "webhook delivered");
                    return DeliveryOutcome {
                        ok: true,
                        attempts: attempt,
                        status_code,
                        last_error: None,
                    };
                }
                last_error = Some(format!("http {status}"));
                if !retryable_status(status) {
                    warn!(webhook_id = %webhook.id, status, "webhook rejected, not retrying");
                    return DeliveryOutcome {
                        ok: false,
                        attempts: attempt,
                        status_code,
                        last_error,
                    };
                }
            }
            Err(e) => {
                last_error = Some(e.to_string());
                status_code = None;
            }
        }

        if attempt < max_attempts {
            let idx = (attempt as usize - 1).min(config.backoff.len().saturating_sub(1));
            if let Some(delay) = config.backoff.get(idx) {
                tokio::time::sleep(*delay).await;
            }
        }
    }

    warn!(webhook_id = %webhook.id, attempts = max_attempts, ?last_error, "webhook delivery exhausted");
    DeliveryOutcome {
        ok: false,
        attempts: max_attempts,
        status_code,
        last_error,
    }
}
