//! Client side of the GodHand transport: a connection state machine that
//! streams over WebSocket and falls back to HTTP.

pub mod error;
pub mod gateway;
pub mod http;
pub mod transport;
pub mod ws;

pub use error::TransportError;
pub use gateway::{
    fallback_events, ConnectionState, Gateway, GatewayNotice, ReconnectPolicy, SubmitObserver,
    SubmitReport,
};
pub use http::HttpFallback;
pub use transport::{EventStream, FallbackChannel, StreamConnector};
pub use ws::WsConnector;
