//! Streaming channel over `tokio-tungstenite`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use godhand_core::protocol::ClientMessage;
use godhand_core::{ExecEvent, SessionId};

use crate::error::{Result, TransportError};
use crate::transport::{EventStream, StreamConnector};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects to `{base_url}/ws/{session_id}`.
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    /// Accepts `ws://`, `wss://`, `http://` or `https://` base URLs.
    pub fn new(base_url: &str) -> Self {
        let trimmed = base_url.trim_end_matches('/');
        let base_url = if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else {
            trimmed.to_string()
        };
        Self { base_url }
    }

    pub fn url_for(&self, session_id: &SessionId) -> String {
        format!("{}/ws/{}", self.base_url, session_id)
    }
}

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self, session_id: &SessionId) -> Result<Box<dyn EventStream>> {
        let url = self.url_for(session_id);
        let (mut ws, _) = connect_async(&url)
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("{url}: {e}")))?;

        // The server greets each connection with a system event naming the
        // session it opened.
        let hello = tokio::time::timeout(HELLO_TIMEOUT, read_frame(&mut ws))
            .await
            .map_err(|_| TransportError::ConnectFailed("no greeting from server".into()))??
            .ok_or(TransportError::ChannelClosed)?;
        let assigned = hello
            .get("session_id")
            .and_then(Value::as_str)
            .map(SessionId::from_raw)
            .ok_or_else(|| TransportError::Protocol("greeting without session_id".into()))?;
        debug!(requested = %session_id, assigned = %assigned, "stream greeting received");

        Ok(Box::new(WsEventStream {
            ws,
            session_id: assigned,
        }))
    }
}

pub struct WsEventStream {
    ws: WsStream,
    session_id: SessionId,
}

/// Next text frame as JSON. `Ok(None)` on a clean close.
async fn read_frame(ws: &mut WsStream) -> Result<Option<Value>> {
    while let Some(msg) = ws.next().await {
        match msg.map_err(|_| TransportError::ChannelClosed)? {
            Message::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

#[async_trait]
impl EventStream for WsEventStream {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.ws
            .send(Message::text(json))
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn next_event(&mut self) -> Result<Option<ExecEvent>> {
        match read_frame(&mut self.ws).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_base_urls_become_ws() {
        let sid = SessionId::from_raw("sess_1");
        assert_eq!(
            WsConnector::new("http://127.0.0.1:8000/").url_for(&sid),
            "ws://127.0.0.1:8000/ws/sess_1"
        );
        assert_eq!(
            WsConnector::new("https://host.example").url_for(&sid),
            "wss://host.example/ws/sess_1"
        );
        assert_eq!(
            WsConnector::new("ws://localhost:9").url_for(&sid),
            "ws://localhost:9/ws/sess_1"
        );
    }

    #[tokio::test]
    async fn refused_connection_is_connect_failed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = WsConnector::new(&format!("ws://127.0.0.1:{port}"));
        let err = connector.connect(&SessionId::new()).await.err().unwrap();
        assert!(matches!(err, TransportError::ConnectFailed(_)));
    }
}
