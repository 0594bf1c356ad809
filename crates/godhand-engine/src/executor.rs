//! Runs compiled actions against an [`ActionBackend`], one at a time.
//!
//! Per action the executor emits `progress`, `executing`, an optional
//! `screenshot` and `result`; a batch ends with exactly one `done` unless it
//! was cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use godhand_core::clock::{Clock, TokioClock};
use godhand_core::traits::{ActionBackend, ConfirmationGate, EventSink};
use godhand_core::{Action, ActionKind, ActionResult, ExecEvent, ExecutionMode};
use godhand_telemetry::MetricsRecorder;

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Extra attempts for a transient failure.
    pub retry_bound: u32,
    pub retry_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_bound: 1,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every action ran; `done` was emitted.
    Completed,
    /// The user declined a gated action; `done` was emitted.
    Declined,
    /// The session went away; no `done`.
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub results: Vec<ActionResult>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}

pub struct Executor {
    backend: Arc<dyn ActionBackend>,
    clock: Arc<dyn Clock>,
    config: ExecutorConfig,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Executor {
    pub fn new(backend: Arc<dyn ActionBackend>, config: ExecutorConfig) -> Self {
        Self {
            backend,
            clock: Arc::new(TokioClock),
            config,
            metrics: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Run one action with retries. Emits `executing`, `screenshot` and
    /// `result`.
    pub async fn execute(&self, action: &Action, sink: &dyn EventSink) -> ActionResult {
        let never = CancellationToken::new();
        match self.execute_cancellable(action, sink, &never).await {
            Some(result) => result,
            None => ActionResult::failed(action, "cancelled", 1),
        }
    }

    pub async fn run_batch(
        &self,
        actions: &[Action],
        mode: ExecutionMode,
        sink: &dyn EventSink,
        gate: &dyn ConfirmationGate,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        self.run_batch_observed(actions, mode, sink, gate, cancel, &|_: &ActionResult| {})
            .await
    }

    /// [`run_batch`](Self::run_batch) that also hands each result to
    /// `on_result` as soon as it exists, so a caller bounded by a timeout
    /// still sees the finished part.
    #[instrument(skip_all, fields(actions = actions.len(), mode = %mode))]
    pub async fn run_batch_observed(
        &self,
        actions: &[Action],
        mode: ExecutionMode,
        sink: &dyn EventSink,
        gate: &dyn ConfirmationGate,
        cancel: &CancellationToken,
        on_result: &(dyn Fn(&ActionResult) + Send + Sync),
    ) -> BatchOutcome {
        let total = actions.len();
        let mut results = Vec::with_capacity(total);

        for (i, action) in actions.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.finish(BatchStatus::Cancelled, results);
            }

            if mode.requires_confirmation(action.kind()) {
                let approved = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return self.finish(BatchStatus::Cancelled, results),
                    approved = gate.confirm(action) => approved,
                };
                if !approved {
                    let skipped = total - i;
                    sink.emit(ExecEvent::done(format!("已取消，跳过剩余 {skipped} 个动作")));
                    return self.finish(BatchStatus::Declined, results);
                }
            }

            sink.emit(ExecEvent::Progress {
                content: format!("步骤 {}/{}", i + 1, total),
                current: i + 1,
                total,
            });

            let Some(result) = self.execute_cancellable(action, sink, cancel).await else {
                return self.finish(BatchStatus::Cancelled, results);
            };
            on_result(&result);
            results.push(result);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        sink.emit(ExecEvent::done(format!("执行完成: {succeeded}/{total} 成功")));
        self.finish(BatchStatus::Completed, results)
    }

    fn finish(&self, status: BatchStatus, results: Vec<ActionResult>) -> BatchOutcome {
        if let Some(metrics) = &self.metrics {
            let label = match status {
                BatchStatus::Completed => "completed",
                BatchStatus::Declined => "declined",
                BatchStatus::Cancelled => "cancelled",
            };
            metrics.counter_inc("batches_total", &[("status", label)], 1);
        }
        BatchOutcome { status, results }
    }

    /// `None` when cancelled before a result exists.
    async fn execute_cancellable(
        &self,
        action: &Action,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Option<ActionResult> {
        sink.emit(ExecEvent::Executing {
            content: action.description().to_string(),
            sequence_index: action.sequence_index(),
        });

        let started = Instant::now();
        let result = if action.kind() == ActionKind::Unknown {
            ActionResult::failed(action, format!("无法识别的指令: {}", action.description()), 1)
        } else {
            self.attempt(action, cancel).await?
        };
        self.record(action, &result, started.elapsed());

        if let Some(url) = &result.screenshot {
            sink.emit(ExecEvent::Screenshot {
                content: format!("{} 截图", action.description()),
                sequence_index: action.sequence_index(),
                url: url.clone(),
            });
        }
        sink.emit(ExecEvent::result(action, &result));
        Some(result)
    }

    async fn attempt(&self, action: &Action, cancel: &CancellationToken) -> Option<ActionResult> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                outcome = self.backend.run(action) => outcome,
            };

            match outcome {
                Ok(out) => {
                    return Some(
                        ActionResult::succeeded(action, out.output, attempts)
                            .with_screenshot(out.screenshot),
                    );
                }
                Err(err) if err.is_retryable() && attempts <= self.config.retry_bound => {
                    warn!(
                        kind = %action.kind(),
                        sequence_index = action.sequence_index(),
                        attempt = attempts,
                        error = %err,
                        "transient backend failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        _ = self.clock.sleep(self.config.retry_delay) => {}
                    }
                }
                Err(err) => {
                    debug!(kind = %action.kind(), attempts, error = %err, "action failed");
                    return Some(ActionResult::failed(action, err.message, attempts));
                }
            }
        }
    }

    fn record(&self, action: &Action, result: &ActionResult, elapsed: Duration) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let outcome = if result.success { "success" } else { "failure" };
        metrics.counter_inc(
            "actions_total",
            &[("kind", action.kind().as_str()), ("outcome", outcome)],
            1,
        );
        metrics.histogram_observe(
            "action_duration_ms",
            &[("kind", action.kind().as_str())],
            elapsed.as_secs_f64() * 1000.0,
        );
        if result.attempt_count > 1 {
            metrics.counter_inc("action_retries_total", &[], u64::from(result.attempt_count - 1));
        }
    }
}
