//! Client-side connection state machine.
//!
//! The gateway prefers the streaming channel. A failed connect is retried a
//! bounded number of times on the injected clock; after that the gateway
//! settles in `Degraded` and routes submissions through the request/response
//! fallback.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use godhand_core::clock::{Clock, TokioClock};
use godhand_core::protocol::{ClientMessage, FallbackRequest, FallbackResponse};
use godhand_core::{ExecEvent, ExecutionMode, SessionId};

use crate::error::{Result, TransportError};
use crate::transport::{EventStream, FallbackChannel, StreamConnector};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Streaming given up; submissions use the fallback channel.
    Degraded,
}

#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub max_reconnects: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_reconnects: 5,
            delay: Duration::from_secs(3),
        }
    }
}

/// Connection-level news for the user interface.
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayNotice {
    Connected { session_id: SessionId },
    Reconnecting { attempt: u32, max: u32 },
    /// The stream dropped while this instruction was in flight. It may have
    /// partially run.
    Interrupted { instruction: String },
    Degraded,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubmitReport {
    /// The stream delivered a terminal event.
    Completed(ExecEvent),
    Interrupted,
    /// Ran over the fallback channel.
    Fallback(FallbackResponse),
}

/// Receives the events of one submission.
pub trait SubmitObserver: Send {
    fn on_event(&mut self, event: &ExecEvent);

    /// The server is holding for approval. Return the answer to send.
    fn on_confirmation(&mut self, prompt: &str) -> bool;
}

pub struct Gateway {
    connector: Arc<dyn StreamConnector>,
    fallback: Arc<dyn FallbackChannel>,
    clock: Arc<dyn Clock>,
    policy: ReconnectPolicy,
    state: ConnectionState,
    stream: Option<Box<dyn EventStream>>,
    session_id: Option<SessionId>,
    attempts: u32,
    notices: broadcast::Sender<GatewayNotice>,
}

impl Gateway {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        fallback: Arc<dyn FallbackChannel>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            connector,
            fallback,
            clock: Arc::new(TokioClock),
            policy,
            state: ConnectionState::Disconnected,
            stream: None,
            session_id: None,
            attempts: 0,
            notices,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts
    }

    pub fn notices(&self) -> broadcast::Receiver<GatewayNotice> {
        self.notices.subscribe()
    }

    fn notify(&self, notice: GatewayNotice) {
        let _ = self.notices.send(notice);
    }

    /// Open the stream, retrying per the policy. Ends `Connected` or
    /// `Degraded`.
    pub async fn connect(&mut self) -> ConnectionState {
        if self.state == ConnectionState::Degraded {
            return self.state;
        }

        loop {
            let requested = SessionId::new();
            self.state = ConnectionState::Connecting;
            debug!(session_id = %requested, attempt = self.attempts, "connecting");

            match self.connector.connect(&requested).await {
                Ok(stream) => {
                    let session_id = stream.session_id().clone();
                    info!(session_id = %session_id, "stream connected");
                    self.stream = Some(stream);
                    self.session_id = Some(session_id.clone());
                    self.state = ConnectionState::Connected;
                    self.attempts = 0;
                    self.notify(GatewayNotice::Connected { session_id });
                    return self.state;
                }
                Err(e) => {
                    self.state = ConnectionState::Disconnected;
                    self.attempts += 1;
                    if self.attempts > self.policy.max_reconnects {
                        return self.degrade(&e);
                    }
                    warn!(
                        attempt = self.attempts,
                        max = self.policy.max_reconnects,
                        error = %e,
                        "connect failed, retrying"
                    );
                    self.notify(GatewayNotice::Reconnecting {
                        attempt: self.attempts,
                        max: self.policy.max_reconnects,
                    });
                    self.clock.sleep(self.policy.delay).await;
                }
            }
        }
    }

    fn degrade(&mut self, last_error: &TransportError) -> ConnectionState {
        warn!(
            attempts = self.attempts,
            error = %last_error,
            "reconnects exhausted, switching to fallback channel"
        );
        self.stream = None;
        self.state = ConnectionState::Degraded;
        self.notify(GatewayNotice::Degraded);
        self.state
    }

    /// Send an instruction and forward its events to `observer` until the
    /// batch terminates.
    pub async fn submit(
        &mut self,
        text: &str,
        mode: Option<ExecutionMode>,
        observer: &mut dyn SubmitObserver,
    ) -> Result<SubmitReport> {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Connecting
        ) {
            self.connect().await;
        }
        if self.state == ConnectionState::Degraded {
            return self.submit_fallback(text, mode, observer).await;
        }

        let outcome = match self.stream.as_mut() {
            Some(stream) => drive(stream.as_mut(), text, mode, observer).await,
            None => Err(TransportError::ChannelClosed),
        };

        match outcome {
            Ok(terminal) => Ok(SubmitReport::Completed(terminal)),
            Err(e) if e.is_disconnect() => Ok(self.interrupted(text, &e).await),
            Err(e) => Err(e),
        }
    }

    async fn interrupted(&mut self, text: &str, cause: &TransportError) -> SubmitReport {
        warn!(error = %cause, "stream dropped mid-instruction");
        self.stream = None;
        self.state = ConnectionState::Disconnected;
        self.notify(GatewayNotice::Interrupted {
            instruction: text.to_string(),
        });

        self.attempts += 1;
        if self.attempts > self.policy.max_reconnects {
            self.degrade(cause);
            return SubmitReport::Interrupted;
        }
        self.notify(GatewayNotice::Reconnecting {
            attempt: self.attempts,
            max: self.policy.max_reconnects,
        });
        self.clock.sleep(self.policy.delay).await;
        self.connect().await;
        SubmitReport::Interrupted
    }

    async fn submit_fallback(
        &mut self,
        text: &str,
        mode: Option<ExecutionMode>,
        observer: &mut dyn SubmitObserver,
    ) -> Result<SubmitReport> {
        let request = FallbackRequest {
            command: text.to_string(),
            session_id: self.session_id.clone(),
            mode: mode.unwrap_or_default(),
        };
        let response = self.fallback.execute(&request).await?;
        for event in fallback_events(&response) {
            observer.on_event(&event);
        }
        Ok(SubmitReport::Fallback(response))
    }

    /// Answer a pending confirmation over the stream.
    pub async fn confirm(&mut self, accepted: bool) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(TransportError::ChannelClosed)?;
        stream.send(&ClientMessage::Confirm { confirm: accepted }).await
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close().await;
        }
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Disconnected;
        }
    }
}

/// Pump one submission through an open stream. System events that arrive
/// mid-flight are approval prompts.
async fn drive(
    stream: &mut dyn EventStream,
    text: &str,
    mode: Option<ExecutionMode>,
    observer: &mut dyn SubmitObserver,
) -> Result<ExecEvent> {
    stream.send(&ClientMessage::submit(text, mode)).await?;

    loop {
        let event = match stream.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => return Err(TransportError::ChannelClosed),
            Err(TransportError::Protocol(reason)) => {
                warn!(reason = %reason, "skipping unreadable frame");
                continue;
            }
            Err(e) => return Err(e),
        };

        observer.on_event(&event);
        if let ExecEvent::System { content } = &event {
            let accepted = observer.on_confirmation(content);
            stream.send(&ClientMessage::Confirm { confirm: accepted }).await?;
        }
        if event.is_terminal() {
            return Ok(event);
        }
    }
}

/// Replay a fallback response as the events a stream would have carried.
pub fn fallback_events(response: &FallbackResponse) -> Vec<ExecEvent> {
    let mut events = vec![ExecEvent::parsed(&response.actions)];

    for result in &response.results {
        let content = response
            .actions
            .iter()
            .find(|a| a.sequence_index() == result.sequence_index)
            .map(|a| a.description().to_string())
            .unwrap_or_default();
        if let Some(url) = &result.screenshot {
            events.push(ExecEvent::Screenshot {
                content: content.clone(),
                sequence_index: result.sequence_index,
                url: url.clone(),
            });
        }
        events.push(ExecEvent::Result {
            content,
            sequence_index: result.sequence_index,
            success: result.success,
            output: result.output.clone(),
            error: result.error.clone(),
            attempt_count: result.attempt_count,
        });
    }

    let total = response.actions.len();
    let done = if response.timed_out {
        format!("执行超时: 已完成 {}/{total} 个动作", response.results.len())
    } else {
        let ok = response.results.iter().filter(|r| r.success).count();
        format!("执行完成: {ok}/{total} 成功")
    };
    events.push(ExecEvent::done(done));
    events
}
