use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use godhand_core::protocol::ClientMessage;
use godhand_core::{ExecEvent, SessionId};
use godhand_engine::{SessionError, SessionManager};

/// Unique connection identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected WebSocket client, bound to exactly one session.
pub struct Client {
    pub id: ClientId,
    session_id: SessionId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Client {
    fn new(id: ClientId, session_id: SessionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            session_id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a client observing `session_id`; returns its id and the
    /// receiving end of its send queue.
    pub fn register(&self, session_id: SessionId) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients
            .insert(id.clone(), Arc::new(Client::new(id.clone(), session_id, tx)));
        (id, rx)
    }

    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    pub fn get(&self, client_id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(client_id).map(|c| Arc::clone(c.value()))
    }

    /// Queue a message for one client. Drops the message if the queue is full.
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        let Some(client) = self.get(client_id) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %client_id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a message for every client watching `session_id`.
    pub fn broadcast_to_session(&self, session_id: &SessionId, message: &str) -> usize {
        let mut delivered = 0;
        for entry in self.clients.iter() {
            let client = entry.value();
            if client.is_connected()
                && client.session_id == *session_id
                && client.tx.try_send(message.to_string()).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Drop clients that have not answered a ping within `timeout`. Their
    /// writer loops end once the send queue closes.
    pub fn cleanup_dead_clients(&self, timeout: Duration) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|e| !e.value().is_alive(timeout))
            .map(|e| e.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        dead.len()
    }
}

fn error_frame(message: impl Into<String>) -> Option<String> {
    serde_json::to_string(&ExecEvent::error(message)).ok()
}

/// Route one client frame to the session.
async fn handle_frame(
    raw: &str,
    client_id: &ClientId,
    registry: &ClientRegistry,
    manager: &SessionManager,
) {
    let Some(session_id) = registry.get(client_id).map(|c| c.session_id().clone()) else {
        return;
    };

    let frame: ClientMessage = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(client_id = %client_id, error = %e, "unparseable frame");
            if let Some(json) = error_frame(format!("无法解析消息: {e}")) {
                registry.send_to(client_id, json);
            }
            return;
        }
    };

    let result = match frame {
        ClientMessage::Submit { message, mode } => manager
            .submit(&session_id, &message, mode)
            .await
            .map(|_| ()),
        ClientMessage::Confirm { confirm } => {
            manager.confirm(&session_id, confirm).await.map(|_| ())
        }
    };

    match result {
        // The session already told its observers.
        Ok(()) | Err(SessionError::SessionBusy(_)) => {}
        Err(e) => {
            tracing::debug!(session_id = %session_id, kind = e.error_kind(), "frame rejected");
            if let Some(json) = error_frame(e.to_string()) {
                registry.send_to(client_id, json);
            }
        }
    }
}

/// Split the socket into a writer (send queue plus heartbeat ping) and a
/// reader (client frames). Returns when either side ends.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    manager: Arc<SessionManager>,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    handle_frame(text.as_str(), &reader_cid, &reader_registry, &manager).await;
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.get(&reader_cid) {
                        client.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    let writer_abort = writer.abort_handle();
    let reader_abort = reader.abort_handle();
    tokio::select! {
        _ = writer => reader_abort.abort(),
        _ = reader => writer_abort.abort(),
    }

    registry.unregister(&client_id);
}

/// Periodically drop clients that stopped answering pings.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients(timeout);
            if removed > 0 {
                tracing::info!(removed, "dead client cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_unique() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
        assert!(a.0.starts_with("client_"));
    }

    #[test]
    fn register_and_unregister() {
        let registry = ClientRegistry::new(32);
        let (id1, _rx1) = registry.register(SessionId::new());
        let (id2, _rx2) = registry.register(SessionId::new());
        assert_eq!(registry.count(), 2);

        registry.unregister(&id1);
        assert_eq!(registry.count(), 1);
        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn broadcast_reaches_only_session_clients() {
        let registry = ClientRegistry::new(32);
        let session = SessionId::new();
        let (_a, mut rx_a) = registry.register(session.clone());
        let (_b, mut rx_b) = registry.register(session.clone());
        let (_c, mut rx_c) = registry.register(SessionId::new());

        assert_eq!(registry.broadcast_to_session(&session, "hello"), 2);
        assert_eq!(rx_a.try_recv().unwrap(), "hello");
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn send_to_full_queue_drops() {
        let registry = ClientRegistry::new(2);
        let (id, _rx) = registry.register(SessionId::new());
        assert!(registry.send_to(&id, "msg1".into()));
        assert!(registry.send_to(&id, "msg2".into()));
        assert!(!registry.send_to(&id, "msg3".into()));
        assert!(!registry.send_to(&ClientId::new(), "nobody".into()));
    }

    #[test]
    fn cleanup_removes_silent_clients() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register(SessionId::new());
        let (_live, _rx2) = registry.register(SessionId::new());

        registry.get(&id).unwrap().last_pong.store(0, Ordering::Relaxed);

        assert_eq!(registry.cleanup_dead_clients(Duration::from_secs(90)), 1);
        assert_eq!(registry.count(), 1);
    }
}
