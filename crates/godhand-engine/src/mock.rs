//! Deterministic collaborators for tests: no GUI, no classifier.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use godhand_core::traits::{ActionBackend, BackendOutput, ConfirmationGate, EventSink, IntentResolver};
use godhand_core::{Action, ActionSpec, BackendError, CompileError, ExecEvent};

/// One pre-programmed backend response.
#[derive(Clone, Debug)]
pub enum ScriptedStep {
    Ok(BackendOutput),
    Err(BackendError),
    /// Sleep on the tokio timer, then answer with the inner step.
    Delay(Duration, Box<ScriptedStep>),
}

impl ScriptedStep {
    pub fn delayed(delay: Duration, inner: ScriptedStep) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Backend that answers from a script, then falls back to a default step.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<ScriptedStep>>,
    fallback: Option<ScriptedStep>,
    calls: Mutex<Vec<Action>>,
    call_count: AtomicUsize,
}

impl ScriptedBackend {
    /// Plays `steps` in order, then succeeds.
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Vec::new())
    }

    /// Answers every call with `step`.
    pub fn always(step: ScriptedStep) -> Self {
        Self {
            fallback: Some(step),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<Action> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ActionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, action: &Action) -> Result<BackendOutput, BackendError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().push(action.clone());

        let step = self
            .script
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| {
                ScriptedStep::Ok(BackendOutput::text(format!("ok: {}", action.description())))
            });

        let mut step = step;
        loop {
            match step {
                ScriptedStep::Ok(out) => return Ok(out),
                ScriptedStep::Err(err) => return Err(err),
                ScriptedStep::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
            }
        }
    }
}

/// Resolver answering from a clause table. Unlisted clauses resolve to nothing.
#[derive(Default)]
pub struct ScriptedResolver {
    table: HashMap<String, Result<Vec<ActionSpec>, CompileError>>,
    call_count: AtomicUsize,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, clause: &str, specs: Vec<ActionSpec>) -> Self {
        self.table.insert(clause.to_string(), Ok(specs));
        self
    }

    pub fn with_error(mut self, clause: &str, error: CompileError) -> Self {
        self.table.insert(clause.to_string(), Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl IntentResolver for ScriptedResolver {
    async fn resolve(&self, clause: &str) -> Result<Vec<ActionSpec>, CompileError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.table.get(clause).cloned().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Sink that keeps every event in memory.
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<ExecEvent>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecEvent> {
        self.events.lock().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.event_type()).collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl EventSink for EventCollector {
    fn emit(&self, event: ExecEvent) {
        self.events.lock().push(event);
    }
}

/// Gate with a fixed answer that remembers which actions it was asked about.
pub struct ManualGate {
    answer: bool,
    asked: Mutex<Vec<usize>>,
}

impl ManualGate {
    pub fn approving() -> Self {
        Self {
            answer: true,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn declining() -> Self {
        Self {
            answer: false,
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Sequence indices of the gated actions, in order.
    pub fn asked(&self) -> Vec<usize> {
        self.asked.lock().clone()
    }
}

#[async_trait]
impl ConfirmationGate for ManualGate {
    async fn confirm(&self, action: &Action) -> bool {
        self.asked.lock().push(action.sequence_index());
        self.answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use godhand_core::ActionKind;

    fn click() -> Action {
        Action::new(ActionSpec::new(ActionKind::Click, "点击"), 0)
    }

    #[tokio::test]
    async fn script_plays_in_order_then_succeeds() {
        let backend = ScriptedBackend::new(vec![ScriptedStep::Err(BackendError::transient("busy"))]);
        assert!(backend.run(&click()).await.is_err());
        let out = backend.run(&click()).await.unwrap();
        assert_eq!(out.output, "ok: 点击");
        assert_eq!(backend.call_count(), 2);
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_step_waits() {
        let backend = ScriptedBackend::always(ScriptedStep::delayed(
            Duration::from_secs(5),
            ScriptedStep::Ok(BackendOutput::text("late")),
        ));
        let started = tokio::time::Instant::now();
        let out = backend.run(&click()).await.unwrap();
        assert_eq!(out.output, "late");
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn resolver_table_lookup() {
        let resolver = ScriptedResolver::new().with("截图", vec![ActionSpec::new(ActionKind::Screenshot, "截图")]);
        assert_eq!(resolver.resolve("截图").await.unwrap().len(), 1);
        assert!(resolver.resolve("别的").await.unwrap().is_empty());
        assert_eq!(resolver.call_count(), 2);
    }
}
