use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::Level;

use godhand_client::{
    Gateway, GatewayNotice, HttpFallback, ReconnectPolicy, SubmitObserver, SubmitReport,
    WsConnector,
};
use godhand_core::{ExecEvent, ExecutionMode, SessionId};
use godhand_engine::{
    Compiler, Executor, ExecutorConfig, LocalBackend, RuleResolver, SessionConfig, SessionManager,
};
use godhand_settings::GodHandSettings;
use godhand_store::{Database, HistoryRepo, SqliteHistoryStore};
use godhand_telemetry::{init_telemetry, MetricsRecorder, TelemetryConfig, TelemetryGuard};

#[derive(Parser)]
#[command(name = "godhand", version, about = "Natural-language desktop automation host")]
struct Cli {
    /// Settings file (defaults to ~/.godhand/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the automation server.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Keep history in memory only.
        #[arg(long)]
        no_store: bool,
    },
    /// Send one instruction to a running server and stream its progress.
    Send {
        instruction: String,
        /// auto, confirm or cautious.
        #[arg(long)]
        mode: Option<ExecutionMode>,
        #[arg(long)]
        server: Option<String>,
        /// Approve every confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
    /// Check whether a server is up.
    Health {
        #[arg(long)]
        server: Option<String>,
    },
    /// Compile an instruction locally and print the actions.
    Parse { instruction: String },
    /// Read exports saved in the history store.
    History {
        /// List the exports of this session.
        session_id: Option<String>,
        /// Print one export in full.
        #[arg(long, conflicts_with = "session_id")]
        show: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => godhand_settings::load_settings_from_path(path),
        None => godhand_settings::load_settings(),
    }
    .context("failed to load settings")?;

    match cli.command {
        Command::Serve { host, port, no_store } => serve(settings, host, port, no_store).await,
        Command::Send {
            instruction,
            mode,
            server,
            yes,
        } => send(settings, &instruction, mode, server, yes).await,
        Command::Health { server } => health(settings, server).await,
        Command::Parse { instruction } => parse(settings, &instruction).await,
        Command::History { session_id, show } => history(settings, session_id, show),
    }
}

fn telemetry(settings: &GodHandSettings, json: bool) -> TelemetryGuard {
    init_telemetry(TelemetryConfig {
        log_level: settings.logging.level.parse().unwrap_or(Level::INFO),
        json,
        ..Default::default()
    })
}

fn compiler(settings: &GodHandSettings) -> Arc<Compiler> {
    Arc::new(Compiler::with_connectives(
        Arc::new(RuleResolver),
        settings.compiler.connectives.clone(),
    ))
}

async fn serve(
    mut settings: GodHandSettings,
    host: Option<String>,
    port: Option<u16>,
    no_store: bool,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }

    let telemetry = telemetry(&settings, settings.logging.json);
    let metrics = telemetry
        .metrics()
        .unwrap_or_else(|| Arc::new(MetricsRecorder::new()));

    let work_dir = std::env::current_dir().context("cannot resolve working directory")?;
    let executor = Executor::new(
        Arc::new(LocalBackend::new(work_dir)),
        ExecutorConfig {
            retry_bound: settings.executor.retry_bound,
            retry_delay: Duration::from_millis(settings.executor.retry_delay_ms),
        },
    )
    .with_metrics(Arc::clone(&metrics));

    let session_config = SessionConfig {
        history_limit: settings.session.history_limit,
        event_log_limit: settings.session.event_log_limit,
        persist_on_close: settings.server.persist_on_close,
        ..Default::default()
    };
    let mut manager = SessionManager::new(compiler(&settings), Arc::new(executor), session_config)
        .with_metrics(metrics);

    if !no_store {
        let db_path = godhand_settings::resolve_path(&settings.store.db_path);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let db = Database::open(&db_path)
            .with_context(|| format!("cannot open history database {}", db_path.display()))?;
        tracing::info!(path = %db_path.display(), "history store opened");
        manager = manager.with_store(Arc::new(SqliteHistoryStore::new(db)));
    }

    let config = godhand_server::ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        heartbeat_interval: Duration::from_millis(settings.server.heartbeat_interval_ms),
        fallback_timeout: Duration::from_millis(settings.server.fallback_timeout_ms),
        ..Default::default()
    };
    let handle = godhand_server::start(config, Arc::new(manager))
        .await
        .context("failed to start server")?;
    tracing::info!(addr = %handle.addr, version = %settings.version, "godhand ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

/// Prints events as they arrive and asks on stdin when the server holds.
struct ConsolePrinter {
    assume_yes: bool,
}

impl SubmitObserver for ConsolePrinter {
    fn on_event(&mut self, event: &ExecEvent) {
        match event {
            ExecEvent::Result {
                content,
                success,
                output,
                error,
                attempt_count,
                ..
            } => {
                let mark = if *success { "✓" } else { "✗" };
                let detail = output.as_deref().or(error.as_deref()).unwrap_or_default();
                println!("  {mark} {content} ({attempt_count}) {detail}");
            }
            ExecEvent::Parsed { content, actions } => {
                println!("[parsed] {content}");
                for action in actions {
                    println!("  {}. {}", action.sequence_index() + 1, action.description());
                }
            }
            other => println!("[{}] {}", other.event_type(), other.content()),
        }
    }

    fn on_confirmation(&mut self, _prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        print!("确认执行? [y/N] ");
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes" | "是")
    }
}

async fn send(
    settings: GodHandSettings,
    instruction: &str,
    mode: Option<ExecutionMode>,
    server: Option<String>,
    yes: bool,
) -> anyhow::Result<()> {
    let _telemetry = telemetry(&settings, false);
    let server = server.unwrap_or_else(|| settings.client.server_url.clone());

    // The HTTP call waits for the whole batch; give it room past the server bound.
    let request_timeout =
        Duration::from_millis(settings.server.fallback_timeout_ms) + Duration::from_secs(10);
    let fallback = Arc::new(HttpFallback::new(&server, request_timeout)?);
    match fallback.health().await {
        Ok(status) => tracing::debug!(sessions = status.sessions, "server healthy"),
        Err(e) => tracing::warn!(error = %e, "health check failed"),
    }

    let mut gateway = Gateway::new(
        Arc::new(WsConnector::new(&server)),
        fallback,
        ReconnectPolicy {
            max_reconnects: settings.client.max_reconnects,
            delay: Duration::from_millis(settings.client.reconnect_delay_ms),
        },
    );

    let mut notices = gateway.notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match notice {
                GatewayNotice::Connected { session_id } => eprintln!("已连接 ({session_id})"),
                GatewayNotice::Reconnecting { attempt, max } => {
                    eprintln!("连接失败，重试中 ({attempt}/{max})...")
                }
                GatewayNotice::Interrupted { instruction } => {
                    eprintln!("连接中断，指令可能已部分执行: {instruction}")
                }
                GatewayNotice::Degraded => eprintln!("实时连接不可用，改用 HTTP 模式"),
            }
        }
    });

    let mut printer = ConsolePrinter { assume_yes: yes };
    let report = gateway.submit(instruction, mode, &mut printer).await;
    gateway.close().await;

    match report? {
        SubmitReport::Completed(ExecEvent::Error { content }) => {
            bail!("instruction rejected: {content}")
        }
        SubmitReport::Completed(_) => Ok(()),
        SubmitReport::Interrupted => bail!("connection lost while the instruction was running"),
        SubmitReport::Fallback(response) if response.timed_out => {
            bail!("instruction timed out after {} actions", response.results.len())
        }
        SubmitReport::Fallback(_) => Ok(()),
    }
}

async fn health(settings: GodHandSettings, server: Option<String>) -> anyhow::Result<()> {
    let _telemetry = telemetry(&settings, false);
    let server = server.unwrap_or_else(|| settings.client.server_url.clone());
    let status = HttpFallback::new(&server, Duration::from_secs(10))?
        .health()
        .await
        .with_context(|| format!("{server} is not reachable"))?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn parse(settings: GodHandSettings, instruction: &str) -> anyhow::Result<()> {
    let _telemetry = telemetry(&settings, false);
    let actions = compiler(&settings).compile(instruction).await?;
    println!("{}", serde_json::to_string_pretty(&actions)?);
    Ok(())
}

fn history(
    settings: GodHandSettings,
    session_id: Option<String>,
    show: Option<String>,
) -> anyhow::Result<()> {
    let _telemetry = telemetry(&settings, false);
    let db_path = godhand_settings::resolve_path(&settings.store.db_path);
    if !db_path.exists() {
        bail!("no history database at {}", db_path.display());
    }
    let repo = HistoryRepo::new(
        Database::open(&db_path)
            .with_context(|| format!("cannot open history database {}", db_path.display()))?,
    );

    let json = match (show, session_id) {
        (Some(export_id), _) => serde_json::to_string_pretty(&repo.get(&export_id)?)?,
        (None, Some(session_id)) => {
            let rows = repo.list_for_session(&SessionId::from_raw(session_id))?;
            serde_json::to_string_pretty(&rows)?
        }
        (None, None) => bail!("pass a session id, or --show <export id>"),
    };
    println!("{json}");
    Ok(())
}
