//! Request/response channel over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::instrument;

use godhand_core::protocol::{ErrorBody, FallbackRequest, FallbackResponse, HealthStatus, ParseResponse};

use crate::error::{Result, TransportError};
use crate::transport::FallbackChannel;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpFallback {
    client: Client,
    base_url: String,
}

impl HttpFallback {
    /// `request_timeout` must outlast the server's own execution bound.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Probe the server before opening the stream.
    pub async fn health(&self) -> Result<HealthStatus> {
        let resp = self.client.get(self.url("/api/health")).send().await?;
        read_json(resp).await
    }

    /// Compile without executing.
    pub async fn parse(&self, command: &str) -> Result<ParseResponse> {
        let request = FallbackRequest {
            command: command.to_string(),
            session_id: None,
            mode: Default::default(),
        };
        let resp = self
            .client
            .post(self.url("/api/parse"))
            .json(&request)
            .send()
            .await?;
        read_json(resp).await
    }
}

#[async_trait]
impl FallbackChannel for HttpFallback {
    #[instrument(skip(self, request), fields(session_id = ?request.session_id))]
    async fn execute(&self, request: &FallbackRequest) -> Result<FallbackResponse> {
        let resp = self
            .client
            .post(self.url("/api/execute"))
            .json(request)
            .send()
            .await?;
        read_json(resp).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    Err(match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => TransportError::Rejected {
            status: status.as_u16(),
            code: body.code,
            message: body.message,
        },
        Err(_) => TransportError::Http(format!("{status}: {text}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let fb = HttpFallback::new("http://127.0.0.1:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(fb.url("/api/health"), "http://127.0.0.1:8000/api/health");
    }

    #[tokio::test]
    async fn unreachable_server_is_connect_failed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let fb = HttpFallback::new(&format!("http://127.0.0.1:{port}"), Duration::from_secs(5)).unwrap();
        let err = fb.health().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed(_)), "{err:?}");
    }
}
