use async_trait::async_trait;

/// An event captured from a device, ready for persistence and fan-out.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub tenant_id: String,
    pub device_id: String,
    pub event_type: String,
    pub data: serde_json::Value,
}

/// Where the lifecycle engine hands events off. The pipeline is the real
/// implementation; tests substitute recorders.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Enqueue an event. Must return quickly — socket callbacks ride on
    /// this path.
    async fn publish(&self, event: GatewayEvent);
}
