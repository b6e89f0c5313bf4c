use std::{sync::Arc, time::Instant};

use {
    rijan_common::Heartbeat,
    rijan_crypto::MasterKey,
    rijan_fanout::EventPipeline,
    rijan_lifecycle::DeviceEngine,
    rijan_metrics::MetricsHandle,
    rijan_outbox::{OutboxService, RateLimiter},
    rijan_store::Store,
};

/// How stale a worker heartbeat may be before `/ready` flips to 503.
pub const READY_MAX_HEARTBEAT_AGE_SECS: i64 = 30;

/// Everything the handlers share. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub store: Store,
    pub engine: Arc<DeviceEngine>,
    pub outbox: OutboxService,
    pub pipeline: Arc<EventPipeline>,
    pub limiter: RateLimiter,
    pub master: MasterKey,
    pub metrics: Option<MetricsHandle>,
    pub sender_heartbeat: Heartbeat,
    pub fanout_heartbeat: Heartbeat,
    pub started_at: Instant,
    /// `development` switches error bodies to include internal detail.
    pub run_env: String,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: Store,
        engine: Arc<DeviceEngine>,
        outbox: OutboxService,
        pipeline: Arc<EventPipeline>,
        limiter: RateLimiter,
        master: MasterKey,
        metrics: Option<MetricsHandle>,
        sender_heartbeat: Heartbeat,
        fanout_heartbeat: Heartbeat,
        run_env: String,
    ) -> Self {
        let state = Self {
            inner: Arc::new(AppStateInner {
                store,
                engine,
                outbox,
                pipeline,
                limiter,
                master,
                metrics,
                sender_heartbeat,
                fanout_heartbeat,
                started_at: Instant::now(),
                run_env,
            }),
        };
        crate::error::set_development(state.is_development());
        state
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        self.inner.run_env == "development"
    }
}
