//! Client gateway against a live in-process server.

use std::sync::Arc;
use std::time::Duration;

use godhand_client::{
    ConnectionState, Gateway, GatewayNotice, HttpFallback, ReconnectPolicy, SubmitObserver,
    SubmitReport, WsConnector,
};
use godhand_core::clock::RecordingClock;
use godhand_core::{ExecEvent, ExecutionMode};
use godhand_engine::mock::ScriptedBackend;
use godhand_engine::{
    Compiler, Executor, ExecutorConfig, RuleResolver, SessionConfig, SessionManager,
};
use godhand_server::{start, ServerConfig, ServerHandle};

const CALCULATOR: &str = "打开计算器 然后输入123 然后按加号 然后输入456 然后按等于";

async fn boot() -> ServerHandle {
    let compiler = Arc::new(Compiler::new(Arc::new(RuleResolver)));
    let executor = Arc::new(Executor::new(
        Arc::new(ScriptedBackend::succeeding()),
        ExecutorConfig::default(),
    ));
    let manager = SessionManager::new(compiler, executor, SessionConfig::default());
    let config = ServerConfig {
        port: 0,
        fallback_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    start(config, Arc::new(manager)).await.unwrap()
}

fn dead_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[derive(Default)]
struct Recorder {
    events: Vec<ExecEvent>,
    prompts: Vec<String>,
    answer: bool,
}

impl SubmitObserver for Recorder {
    fn on_event(&mut self, event: &ExecEvent) {
        self.events.push(event.clone());
    }

    fn on_confirmation(&mut self, prompt: &str) -> bool {
        self.prompts.push(prompt.to_string());
        self.answer
    }
}

impl Recorder {
    fn count(&self, event_type: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

#[tokio::test]
async fn streams_a_calculator_batch() {
    let handle = boot().await;
    let base = format!("http://{}", handle.addr);
    let mut gateway = Gateway::new(
        Arc::new(WsConnector::new(&base)),
        Arc::new(HttpFallback::new(&base, Duration::from_secs(5)).unwrap()),
        ReconnectPolicy::default(),
    );

    let mut recorder = Recorder::default();
    let report = gateway.submit(CALCULATOR, None, &mut recorder).await.unwrap();

    assert!(matches!(report, SubmitReport::Completed(ExecEvent::Done { .. })));
    assert_eq!(gateway.state(), ConnectionState::Connected);
    assert_eq!(recorder.count("parsed"), 1);
    assert_eq!(recorder.count("result"), 5);
    assert!(recorder.prompts.is_empty());

    let session_id = gateway.session_id().cloned().unwrap();
    assert!(handle.manager().contains(&session_id));

    gateway.close().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn confirm_mode_round_trip() {
    let handle = boot().await;
    let base = format!("http://{}", handle.addr);
    let mut gateway = Gateway::new(
        Arc::new(WsConnector::new(&base)),
        Arc::new(HttpFallback::new(&base, Duration::from_secs(5)).unwrap()),
        ReconnectPolicy::default(),
    );

    let mut recorder = Recorder {
        answer: true,
        ..Default::default()
    };
    let report = gateway
        .submit("打开计算器", Some(ExecutionMode::Confirm), &mut recorder)
        .await
        .unwrap();

    assert!(matches!(report, SubmitReport::Completed(ExecEvent::Done { .. })));
    assert_eq!(recorder.prompts.len(), 1);
    assert_eq!(recorder.count("result"), 1);

    gateway.close().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn degrades_to_http_when_streaming_is_unreachable() {
    let handle = boot().await;
    let clock = Arc::new(RecordingClock::new());
    let fallback = HttpFallback::new(&format!("http://{}", handle.addr), Duration::from_secs(5));
    let mut gateway = Gateway::new(
        Arc::new(WsConnector::new(&format!("ws://127.0.0.1:{}", dead_port()))),
        Arc::new(fallback.unwrap()),
        ReconnectPolicy::default(),
    )
    .with_clock(clock.clone());
    let mut notices = gateway.notices();

    let mut recorder = Recorder::default();
    let report = gateway.submit(CALCULATOR, None, &mut recorder).await.unwrap();

    let SubmitReport::Fallback(response) = report else {
        panic!("expected a fallback report");
    };
    assert!(!response.timed_out);
    assert_eq!(response.results.len(), 5);
    assert!(response.results.iter().all(|r| r.success));
    assert_eq!(gateway.state(), ConnectionState::Degraded);

    assert_eq!(clock.sleep_count(), 5);
    assert!(clock.sleeps().iter().all(|d| *d == Duration::from_secs(3)));

    assert_eq!(recorder.count("parsed"), 1);
    assert_eq!(recorder.count("result"), 5);
    assert_eq!(recorder.count("done"), 1);

    let mut degraded = 0;
    while let Ok(notice) = notices.try_recv() {
        if notice == GatewayNotice::Degraded {
            degraded += 1;
        }
    }
    assert_eq!(degraded, 1);

    handle.shutdown().await;
}
