//! Liveness, readiness, and the Prometheus scrape.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};

use serde_json::json;

use crate::state::{AppState, READY_MAX_HEARTBEAT_AGE_SECS};

/// GET /health: 200 whenever the process can answer at all.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// GET /ready: 200 only when the store answers and both workers have a
/// fresh heartbeat.
pub async fn ready(State(app): State<AppState>) -> Response {
    let store_ok = app.inner.store.ping().await.is_ok();
    let sender_ok = app
        .inner
        .sender_heartbeat
        .is_fresh(READY_MAX_HEARTBEAT_AGE_SECS);
    let fanout_ok = app
        .inner
        .fanout_heartbeat
        .is_fresh(READY_MAX_HEARTBEAT_AGE_SECS);

    let body = json!({
        "store": store_ok,
        "senderWorker": sender_ok,
        "fanoutWorker": fanout_ok,
    });
    let status = if store_ok && sender_ok && fanout_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// GET /metrics: refresh point-in-time gauges, then render the scrape.
pub async fn metrics(State(app): State<AppState>) -> Response {
    let Some(handle) = app.inner.metrics.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics not enabled").into_response();
    };

    if let Ok(counts) = app.inner.store.devices().count_by_status().await {
        for status in rijan_store::DeviceStatus::all() {
            let count = counts
                .iter()
                .find(|(s, _)| *s == status)
                .map_or(0, |(_, c)| *c);
            rijan_metrics::gauge!(rijan_metrics::DEVICES, "status" => status.as_str())
                .set(count as f64);
        }
    }
    if let Ok(counts) = app.inner.store.outbox().count_by_status().await {
        for (status, count) in counts {
            rijan_metrics::gauge!(rijan_metrics::OUTBOX_MESSAGES, "status" => status.as_str())
                .set(count as f64);
        }
    }
    if let Ok(active) = app.inner.store.webhooks().count_enabled().await {
        rijan_metrics::gauge!(rijan_metrics::WEBHOOKS_ACTIVE).set(active as f64);
    }
    if let Ok(size) = app.inner.store.dlq().size().await {
        rijan_metrics::gauge!(rijan_metrics::WEBHOOK_DLQ_SIZE).set(size as f64);
    }
    rijan_metrics::gauge!(rijan_metrics::UPTIME_SECONDS)
        .set(app.inner.started_at.elapsed().as_secs_f64());
    rijan_metrics::gauge!(rijan_metrics::WORKER_HEARTBEAT_AGE_SECONDS, "worker" => "sender")
        .set(heartbeat_age(&app.inner.sender_heartbeat));
    rijan_metrics::gauge!(rijan_metrics::WORKER_HEARTBEAT_AGE_SECONDS, "worker" => "fanout")
        .set(heartbeat_age(&app.inner.fanout_heartbeat));
    if let Some(rss) = process_rss_bytes() {
        rijan_metrics::gauge!(rijan_metrics::MEMORY_RSS_BYTES).set(rss as f64);
    }

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
        .into_response()
}

fn heartbeat_age(heartbeat: &rijan_common::Heartbeat) -> f64 {
    let age = heartbeat.age_secs();
    if age == i64::MAX {
        -1.0
    } else {
        age as f64
    }
}

fn process_rss_bytes() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = sysinfo::System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).map(sysinfo::Process::memory)
}
