//! Settings tree. Every struct deserializes with `default`, so a user file
//! only needs the keys it overrides.

use serde::{Deserialize, Serialize};

/// Root settings object, mirrored by `~/.godhand/settings.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GodHandSettings {
    pub version: String,
    pub name: String,
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub executor: ExecutorSettings,
    pub compiler: CompilerSettings,
    pub client: ClientSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

impl Default for GodHandSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "godhand".to_string(),
            server: ServerSettings::default(),
            session: SessionSettings::default(),
            executor: ExecutorSettings::default(),
            compiler: CompilerSettings::default(),
            client: ClientSettings::default(),
            store: StoreSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Host network settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    pub port: u16,
    /// WebSocket ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Upper bound on one `/api/execute` call.
    pub fallback_timeout_ms: u64,
    /// Write the session snapshot to the history store when a socket closes.
    pub persist_on_close: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            heartbeat_interval_ms: 30_000,
            fallback_timeout_ms: 60_000,
            persist_on_close: false,
        }
    }
}

/// Per-session retention caps. `None` keeps everything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_log_limit: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorSettings {
    /// Extra attempts granted to a transient backend failure.
    pub retry_bound: u32,
    pub retry_delay_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            retry_bound: 1,
            retry_delay_ms: 1_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerSettings {
    /// Markers that split an instruction into clauses. Longest match wins.
    pub connectives: Vec<String>,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            connectives: ["然后", "再", "and then", "then", "，", ";"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Settings for `godhand send` / `godhand health`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Base URL of the host, `http://` or `https://`.
    pub server_url: String,
    pub max_reconnects: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            max_reconnects: 5,
            reconnect_delay_ms: 3_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// History database path, relative to `~/.godhand` unless absolute.
    pub db_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "history.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}
