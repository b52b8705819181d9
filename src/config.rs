//! Server configuration: serde-deserialized from a JSON file, with every
//! field defaulted so a missing file or empty object yields a runnable
//! config. Environment overrides are applied after load.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::logging::{self, LogSettings};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP listen port.
    pub port: u16,
    /// 0 = level/level, 1 = level/edge, 2 = edge/level, 3 = edge/edge
    /// (listener trigger / connection trigger).
    pub trig_mode: u8,
    /// Idle connections are evicted after this long without traffic.
    pub idle_timeout_ms: u64,
    pub worker_threads: usize,
    /// Root directory for static HTTP content.
    pub static_root: PathBuf,
    /// How long a request waits for a store handle before reporting busy.
    pub store_acquire_ms: u64,
    pub log: LogConfig,
    pub db: DbConfig,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1316,
            trig_mode: 3,
            idle_timeout_ms: 60_000,
            worker_threads: 40,
            static_root: PathBuf::from("./resources"),
            store_acquire_ms: 3_000,
            log: LogConfig::default(),
            db: DbConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub level: String,
    pub dir: PathBuf,
    pub suffix: String,
    /// 0 selects synchronous logging.
    pub queue_capacity: usize,
    pub max_lines: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            dir: PathBuf::from("./log"),
            suffix: ".log".to_string(),
            queue_capacity: 1024,
            max_lines: logging::DEFAULT_MAX_LINES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub pool_size: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "courier".to_string(),
            password: String::new(),
            name: "courier".to_string(),
            pool_size: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_secret: String,
    pub token_issuer: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: "courier-dev-secret".to_string(),
            token_issuer: "courier".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&raw)?;
        config.apply_env();
        Ok(config)
    }

    /// `MYSQL_HOST` overrides the configured database host.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("MYSQL_HOST") {
            if !host.is_empty() {
                self.db.host = host;
            }
        }
    }

    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            dir: self.log.dir.clone(),
            suffix: self.log.suffix.clone(),
            level: logging::parse_level(&self.log.level),
            queue_capacity: self.log.queue_capacity,
            max_lines: self.log.max_lines,
        }
    }
}
