//! Configuration file support for ticketflow
//!
//! Reads from .ticketflow/config.toml

use crate::notify::Priority;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Store settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Ticket creation settings
    #[serde(default)]
    pub tickets: TicketConfig,

    /// Closing digest settings
    #[serde(default)]
    pub summary: SummaryConfig,

    /// Notification defaults
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// HTTP API settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Log filter
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Explicit database file. TICKETFLOW_DB_PATH still wins when set.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Connections kept in the pool
    /// Default: 8
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a writer waits on a locked database before failing
    /// Default: 5000
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TicketConfig {
    /// Prefix of generated external codes, e.g. "TCK" -> TCK-20261018-3fa2c1
    #[serde(default = "default_code_prefix")]
    pub code_prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SummaryConfig {
    /// Earliest comments rendered into the closing digest
    /// Default: 10
    #[serde(default = "default_max_comments")]
    pub max_comments: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotificationConfig {
    #[serde(default = "default_normal")]
    pub new_ticket_priority: Priority,

    #[serde(default = "default_high")]
    pub progress_request_priority: Priority,

    /// Hours until a notification stops showing in feeds (unset = never)
    #[serde(default)]
    pub expire_after_hours: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request-handling threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogConfig {
    /// tracing EnvFilter directive, overridden by RUST_LOG
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_code_prefix() -> String {
    "TCK".to_string()
}

fn default_max_comments() -> usize {
    10
}

fn default_normal() -> Priority {
    Priority::Normal
}

fn default_high() -> Priority {
    Priority::High
}

fn default_port() -> u16 {
    3040
}

fn default_workers() -> usize {
    4
}

fn default_log_filter() -> String {
    "ticketflow=info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            code_prefix: default_code_prefix(),
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_comments: default_max_comments(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            new_ticket_priority: default_normal(),
            progress_request_priority: default_high(),
            expire_after_hours: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            workers: default_workers(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Load config from .ticketflow/config.toml
    /// Returns default config if file doesn't exist or doesn't parse
    pub fn load() -> Self {
        if let Some(path) = Self::find_config_path() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config")
                    }
                }
            }
        }
        Self::default()
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".ticketflow").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }
}
