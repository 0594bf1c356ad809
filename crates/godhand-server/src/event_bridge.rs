use std::sync::Arc;

use tokio::sync::broadcast;

use godhand_core::SessionEvent;

use crate::client::ClientRegistry;

/// Subscribes to the session manager's event broadcast and forwards each
/// event to the WebSocket clients bound to its session.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    pub fn start(&self, mut rx: broadcast::Receiver<SessionEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(json) = serialize_event(&event) {
                            registry.broadcast_to_session(&event.session_id, &json);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<SessionEvent>,
) -> tokio::task::JoinHandle<()> {
    EventBridge::new(registry).start(rx)
}

/// Wire form of an event: the tagged `ExecEvent` plus its `session_id`.
pub fn serialize_event(event: &SessionEvent) -> Option<String> {
    let mut value = serde_json::to_value(&event.event).ok()?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "session_id".into(),
            serde_json::Value::String(event.session_id.to_string()),
        );
    }
    serde_json::to_string(&value).ok()
}
