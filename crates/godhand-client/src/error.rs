use thiserror::Error;

/// Failures on the way to (or back from) the server.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("http error: {0}")]
    Http(String),

    /// The server answered with an error body.
    #[error("server rejected request ({status} {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },
}

impl TransportError {
    /// Whether the streaming channel should be considered lost.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::ConnectFailed(_) | Self::ChannelClosed)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Self::ConnectFailed(e.to_string())
        } else if e.is_decode() {
            Self::Protocol(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(TransportError::ChannelClosed.to_string(), "channel closed");
        let rejected = TransportError::Rejected {
            status: 409,
            code: "session_busy".into(),
            message: "session sess_1 is busy".into(),
        };
        assert!(rejected.to_string().contains("409 session_busy"));
    }

    #[test]
    fn disconnect_classification() {
        assert!(TransportError::ChannelClosed.is_disconnect());
        assert!(TransportError::ConnectFailed("refused".into()).is_disconnect());
        assert!(!TransportError::Protocol("bad frame".into()).is_disconnect());
    }

    #[test]
    fn json_errors_are_protocol_errors() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(TransportError::from(err), TransportError::Protocol(_)));
    }
}
