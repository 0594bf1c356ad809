//! Session registry: history, event routing, confirmation and run dispatch.
//!
//! Each session runs at most one batch at a time on its own task. Session
//! state sits behind a `parking_lot::Mutex` that is never held across an
//! `.await`; a confirmation suspend waits on a oneshot instead.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use godhand_core::ids::RunId;
use godhand_core::protocol::ExportReceipt;
use godhand_core::traits::{AutoApprove, ConfirmationGate, EventSink, HistoryStore};
use godhand_core::{
    Action, ActionResult, CompileError, EventRecord, ExecEvent, ExecutionMode, SessionEvent,
    SessionId, SessionSnapshot,
};
use godhand_telemetry::MetricsRecorder;

use crate::compiler::Compiler;
use crate::error::SessionError;
use crate::executor::Executor;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Cap on `command_history`. `None` keeps everything.
    pub history_limit: Option<usize>,
    /// Cap on `event_log`. `None` keeps everything.
    pub event_log_limit: Option<usize>,
    pub persist_on_close: bool,
    /// Capacity of the broadcast channel feeding observers.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: None,
            event_log_limit: None,
            persist_on_close: false,
            event_capacity: 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    /// Compiled and dispatched.
    Started { actions: Vec<Action> },
    /// Held until `confirm` (confirm-first mode).
    AwaitingConfirmation,
    /// Compilation failed; an `error` event was emitted.
    Rejected(CompileError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConfirmOutcome {
    /// A held instruction was compiled; carries what `submit` would have.
    Dispatched(SubmitOutcome),
    /// A held instruction was dropped.
    Discarded,
    /// A suspended batch was told to continue (`true`) or stop (`false`).
    GateResolved(bool),
}

/// What one fallback call produced.
#[derive(Clone, Debug)]
pub struct SyncOutcome {
    pub session_id: SessionId,
    pub actions: Vec<Action>,
    pub results: Vec<ActionResult>,
    pub timed_out: bool,
}

struct SessionState {
    mode: ExecutionMode,
    command_history: VecDeque<String>,
    event_log: VecDeque<EventRecord>,
    next_seq: u64,
    pending_confirmation: Option<String>,
    pending_gate: Option<oneshot::Sender<bool>>,
    active_run: Option<RunId>,
}

impl SessionState {
    fn is_busy(&self) -> bool {
        self.active_run.is_some() || self.pending_confirmation.is_some()
    }
}

/// Server-side state for one client connection lifetime.
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    history_limit: Option<usize>,
    event_log_limit: Option<usize>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(id: SessionId, config: &SessionConfig, events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            history_limit: config.history_limit,
            event_log_limit: config.event_log_limit,
            events,
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState {
                mode: ExecutionMode::default(),
                command_history: VecDeque::new(),
                event_log: VecDeque::new(),
                next_seq: 0,
                pending_confirmation: None,
                pending_gate: None,
                active_run: None,
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn mode(&self) -> ExecutionMode {
        self.state.lock().mode
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().is_busy()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn command_history(&self) -> Vec<String> {
        self.state.lock().command_history.iter().cloned().collect()
    }

    pub fn event_log(&self) -> Vec<EventRecord> {
        self.state.lock().event_log.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            session_id: self.id.clone(),
            execution_mode: state.mode,
            created_at: self.created_at,
            exported_at: Utc::now(),
            command_history: state.command_history.iter().cloned().collect(),
            event_log: state.event_log.iter().cloned().collect(),
        }
    }

    fn finish_run(&self, run: &RunId) {
        let mut state = self.state.lock();
        if state.active_run.as_ref() == Some(run) {
            state.active_run = None;
            state.pending_gate = None;
        }
    }
}

impl EventSink for Session {
    /// Append to the event log, then fan out to observers. A `done` releases
    /// the run slot before observers see it.
    fn emit(&self, event: ExecEvent) {
        {
            let mut state = self.state.lock();
            if matches!(event, ExecEvent::Done { .. }) {
                state.active_run = None;
                state.pending_gate = None;
            }
            let record = EventRecord {
                seq: state.next_seq,
                timestamp: Utc::now(),
                event: event.clone(),
            };
            state.next_seq += 1;
            state.event_log.push_back(record);
            if let Some(limit) = self.event_log_limit {
                while state.event_log.len() > limit {
                    state.event_log.pop_front();
                }
            }
        }
        // No receivers just means nobody is watching.
        let _ = self.events.send(SessionEvent {
            session_id: self.id.clone(),
            event,
        });
    }
}

/// Gate that parks the batch until `SessionManager::confirm` answers.
struct SessionGate {
    session: Arc<Session>,
}

#[async_trait]
impl ConfirmationGate for SessionGate {
    async fn confirm(&self, action: &Action) -> bool {
        let (tx, rx) = oneshot::channel();
        self.session.state.lock().pending_gate = Some(tx);
        self.session.emit(ExecEvent::system(format!(
            "需要确认: {}（回复 confirm 继续，cancel 取消）",
            action.description()
        )));
        rx.await.unwrap_or(false)
    }
}

pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<Session>>,
    compiler: Arc<Compiler>,
    executor: Arc<Executor>,
    store: Option<Arc<dyn HistoryStore>>,
    events: broadcast::Sender<SessionEvent>,
    metrics: Arc<MetricsRecorder>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(compiler: Arc<Compiler>, executor: Arc<Executor>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            sessions: DashMap::new(),
            compiler,
            executor,
            store: None,
            events,
            metrics: Arc::new(MetricsRecorder::new()),
            config,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    fn require(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
        self.get(id).ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    /// Register a session under `requested`, or under a fresh id when none
    /// is given or the requested one is taken.
    pub fn open(&self, requested: Option<SessionId>) -> SessionId {
        self.open_with(requested, |_| ()).0
    }

    /// Like [`open`](Self::open), but runs `attach` with the assigned id
    /// before the creation event goes out, so an observer bound there sees it.
    pub fn open_with<T>(
        &self,
        requested: Option<SessionId>,
        attach: impl FnOnce(&SessionId) -> T,
    ) -> (SessionId, T) {
        let mut candidate = requested.unwrap_or_default();
        let session = loop {
            match self.sessions.entry(candidate.clone()) {
                Entry::Occupied(_) => {
                    debug!(session_id = %candidate, "requested session id in use, minting a new one");
                    candidate = SessionId::new();
                }
                Entry::Vacant(slot) => {
                    let session = Arc::new(Session::new(
                        candidate.clone(),
                        &self.config,
                        self.events.clone(),
                    ));
                    slot.insert(Arc::clone(&session));
                    break session;
                }
            }
        };

        self.metrics.counter_inc("sessions_opened_total", &[], 1);
        self.metrics.gauge_set("sessions_active", &[], self.sessions.len() as f64);
        info!(session_id = %session.id, "session opened");
        let attached = attach(&session.id);
        session.emit(ExecEvent::system(format!("会话已创建: {}", session.id)));
        (session.id.clone(), attached)
    }

    /// Accept an instruction. Rejects with `SessionBusy` while a batch runs
    /// or an instruction waits for confirmation.
    pub async fn submit(
        &self,
        id: &SessionId,
        text: &str,
        mode: Option<ExecutionMode>,
    ) -> Result<SubmitOutcome, SessionError> {
        let session = self.require(id)?;
        self.metrics.counter_inc("instructions_submitted_total", &[], 1);

        enum Next {
            Hold,
            Run(RunId, ExecutionMode),
        }

        let next = {
            let mut state = session.state.lock();
            if state.is_busy() {
                None
            } else {
                if let Some(mode) = mode {
                    state.mode = mode;
                }
                push_capped(&mut state.command_history, text.to_string(), self.config.history_limit);
                if state.mode.confirms_instruction() {
                    state.pending_confirmation = Some(text.to_string());
                    Some(Next::Hold)
                } else {
                    let run = RunId::new();
                    state.active_run = Some(run.clone());
                    Some(Next::Run(run, state.mode))
                }
            }
        };

        match next {
            None => Err(self.reject_busy(&session)),
            Some(Next::Hold) => {
                session.emit(ExecEvent::system(format!(
                    "待确认指令: {text}（回复 confirm 执行，cancel 取消）"
                )));
                Ok(SubmitOutcome::AwaitingConfirmation)
            }
            Some(Next::Run(run, mode)) => Ok(self.dispatch(&session, text, run, mode).await),
        }
    }

    /// Answer a pending confirmation: a held instruction first, otherwise a
    /// batch suspended at a gated action.
    pub async fn confirm(&self, id: &SessionId, accepted: bool) -> Result<ConfirmOutcome, SessionError> {
        let session = self.require(id)?;

        enum Pending {
            Instruction(String, Option<RunId>, ExecutionMode),
            Gate(oneshot::Sender<bool>),
        }

        let pending = {
            let mut state = session.state.lock();
            if let Some(text) = state.pending_confirmation.take() {
                let run = accepted.then(RunId::new);
                state.active_run = run.clone();
                Some(Pending::Instruction(text, run, state.mode))
            } else {
                state.pending_gate.take().map(Pending::Gate)
            }
        };

        match pending {
            Some(Pending::Instruction(text, Some(run), mode)) => {
                Ok(ConfirmOutcome::Dispatched(self.dispatch(&session, &text, run, mode).await))
            }
            Some(Pending::Instruction(text, None, _)) => {
                debug!(session_id = %id, instruction = %text, "held instruction discarded");
                session.emit(ExecEvent::done("已取消执行"));
                Ok(ConfirmOutcome::Discarded)
            }
            Some(Pending::Gate(tx)) => {
                // The batch may have been cancelled meanwhile; nothing to tell then.
                let _ = tx.send(accepted);
                Ok(ConfirmOutcome::GateResolved(accepted))
            }
            None => Err(SessionError::NothingToConfirm(id.clone())),
        }
    }

    /// Compile and spawn the run. The caller has already claimed `run`.
    async fn dispatch(
        &self,
        session: &Arc<Session>,
        text: &str,
        run: RunId,
        mode: ExecutionMode,
    ) -> SubmitOutcome {
        session.emit(ExecEvent::thinking("正在理解指令..."));

        let actions = match self.compiler.compile(text).await {
            Ok(actions) => actions,
            Err(err) => {
                session.finish_run(&run);
                self.reject_compile(session, &err);
                return SubmitOutcome::Rejected(err);
            }
        };

        session.emit(ExecEvent::parsed(&actions));
        debug!(session_id = %session.id, run_id = %run, actions = actions.len(), "dispatching batch");

        let task_session = Arc::clone(session);
        let executor = Arc::clone(&self.executor);
        let batch = actions.clone();
        tokio::spawn(async move {
            let gate = SessionGate {
                session: Arc::clone(&task_session),
            };
            let outcome = executor
                .run_batch(&batch, mode, task_session.as_ref(), &gate, &task_session.cancel)
                .await;
            task_session.finish_run(&run);
            debug!(
                session_id = %task_session.id,
                run_id = %run,
                status = ?outcome.status,
                succeeded = outcome.succeeded(),
                "batch finished"
            );
        });

        SubmitOutcome::Started { actions }
    }

    /// Request/response execution for the fallback channel. Always runs as
    /// `auto`; bounded by `timeout`, returning partial results if it fires.
    pub async fn execute_sync(
        &self,
        id: Option<&SessionId>,
        text: &str,
        timeout: Duration,
    ) -> Result<SyncOutcome, SessionError> {
        let session = match id.and_then(|id| self.get(id)) {
            Some(session) => session,
            None => Arc::new(Session::new(
                id.cloned().unwrap_or_default(),
                &self.config,
                self.events.clone(),
            )),
        };
        self.metrics.counter_inc("instructions_submitted_total", &[("channel", "fallback")], 1);

        let run = {
            let mut state = session.state.lock();
            if state.is_busy() {
                None
            } else {
                push_capped(&mut state.command_history, text.to_string(), self.config.history_limit);
                let run = RunId::new();
                state.active_run = Some(run.clone());
                Some(run)
            }
        };
        let Some(run) = run else {
            return Err(self.reject_busy(&session));
        };

        session.emit(ExecEvent::thinking("正在理解指令..."));
        let actions = match self.compiler.compile(text).await {
            Ok(actions) => actions,
            Err(err) => {
                session.finish_run(&run);
                self.reject_compile(&session, &err);
                return Err(err.into());
            }
        };
        session.emit(ExecEvent::parsed(&actions));

        let collected: Arc<Mutex<Vec<ActionResult>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        let on_result = move |r: &ActionResult| sink.lock().push(r.clone());
        let batch = self.executor.run_batch_observed(
            &actions,
            ExecutionMode::Auto,
            session.as_ref(),
            &AutoApprove,
            &session.cancel,
            &on_result,
        );

        let timed_out = tokio::time::timeout(timeout, batch).await.is_err();
        let results = collected.lock().clone();
        if timed_out {
            warn!(
                session_id = %session.id,
                completed = results.len(),
                total = actions.len(),
                "fallback execution timed out"
            );
            session.emit(ExecEvent::done(format!(
                "执行超时: 已完成 {}/{} 个动作",
                results.len(),
                actions.len()
            )));
        }
        session.finish_run(&run);

        Ok(SyncOutcome {
            session_id: session.id.clone(),
            actions,
            results,
            timed_out,
        })
    }

    pub fn export(&self, id: &SessionId) -> Result<SessionSnapshot, SessionError> {
        Ok(self.require(id)?.snapshot())
    }

    /// Hand the current snapshot to the history store.
    pub fn persist(&self, id: &SessionId) -> Result<ExportReceipt, SessionError> {
        let store = self.store.as_ref().ok_or(SessionError::StoreUnavailable)?;
        let snapshot = self.export(id)?;
        store.save(&snapshot)?;
        self.metrics.counter_inc("history_exports_total", &[], 1);
        Ok(ExportReceipt {
            session_id: snapshot.session_id,
            exported_at: snapshot.exported_at,
            command_count: snapshot.command_history.len(),
            event_count: snapshot.event_log.len(),
        })
    }

    /// Tear down a session: cancel its batch (and any confirmation wait),
    /// unregister it and optionally persist its history. Actions already
    /// applied stay applied.
    pub fn close(&self, id: &SessionId) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        session.cancel.cancel();
        self.metrics.gauge_set("sessions_active", &[], self.sessions.len() as f64);

        if self.config.persist_on_close {
            if let Some(store) = &self.store {
                if let Err(e) = store.save(&session.snapshot()) {
                    warn!(session_id = %id, error = %e, "failed to persist session on close");
                }
            }
        }
        info!(session_id = %id, "session closed");
        true
    }

    /// Close every session. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.close(id)).count()
    }

    fn reject_busy(&self, session: &Session) -> SessionError {
        self.metrics.counter_inc("busy_rejections_total", &[], 1);
        session.emit(ExecEvent::error("当前有指令正在执行或等待确认，请稍后再试"));
        SessionError::SessionBusy(session.id.clone())
    }

    fn reject_compile(&self, session: &Session, err: &CompileError) {
        self.metrics
            .counter_inc("compile_errors_total", &[("kind", err.error_kind())], 1);
        session.emit(ExecEvent::error(format!("无法理解指令: {err}")));
    }
}

fn push_capped<T>(deque: &mut VecDeque<T>, item: T, limit: Option<usize>) {
    deque.push_back(item);
    if let Some(limit) = limit {
        while deque.len() > limit {
            deque.pop_front();
        }
    }
}
