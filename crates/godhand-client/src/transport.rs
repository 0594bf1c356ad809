//! Seams between the gateway and the network.

use async_trait::async_trait;

use godhand_core::protocol::{ClientMessage, FallbackRequest, FallbackResponse};
use godhand_core::{ExecEvent, SessionId};

use crate::error::Result;

/// Opens the streaming channel for one session.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// `session_id` is the id the client asks for; the stream reports the
    /// one the server actually assigned.
    async fn connect(&self, session_id: &SessionId) -> Result<Box<dyn EventStream>>;
}

/// An open bidirectional event stream.
#[async_trait]
pub trait EventStream: Send {
    fn session_id(&self) -> &SessionId;

    async fn send(&mut self, message: &ClientMessage) -> Result<()>;

    /// Next server event. `Ok(None)` means the server closed the stream.
    async fn next_event(&mut self) -> Result<Option<ExecEvent>>;

    async fn close(&mut self);
}

/// Request/response channel used once streaming is given up.
#[async_trait]
pub trait FallbackChannel: Send + Sync {
    async fn execute(&self, request: &FallbackRequest) -> Result<FallbackResponse>;
}
