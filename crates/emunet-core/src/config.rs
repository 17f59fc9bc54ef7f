//! Configuration system for emunet.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $EMUNET_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/emunet/config.toml
//!   3. ~/.config/emunet/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration. Each daemon role reads its own section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmunetConfig {
    pub dispatcher: DispatcherConfig,
    pub agent: AgentConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub listen_addr: SocketAddr,
    /// Fixed number of delivery workers.
    pub worker_count: usize,
    /// Bounded job queue size. Enqueue beyond this is rejected.
    pub queue_capacity: usize,
    /// Port every host agent listens on.
    pub agent_port: u16,
    /// Per-delivery HTTP timeout.
    pub request_timeout_ms: u64,
    /// Interval of the stats log line. 0 = off.
    pub stats_interval_secs: u64,
}

/// Where the agent keeps its rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleTableBackend {
    /// In-process table (tests, hosts without the tc programs).
    Memory,
    /// Pinned kernel hash map at `pin_path`.
    Pinned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub listen_addr: SocketAddr,
    /// Admission gate size: concurrent rule updates in flight.
    pub max_in_flight: usize,
    /// How long a request waits for admission before "busy".
    pub admission_timeout_ms: u64,
    pub rule_table: RuleTableBackend,
    pub pin_path: PathBuf,
    pub table_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Base URL of the identity cache service.
    pub url: String,
    /// Bind address when running the cache role.
    pub listen_addr: SocketAddr,
    /// Record lifetime, refreshed on every write.
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub request_timeout_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8082)),
            worker_count: 1000,
            queue_capacity: 1_000_000,
            agent_port: 12345,
            request_timeout_ms: 5000,
            stats_interval_secs: 10,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 12345)),
            max_in_flight: 1000,
            admission_timeout_ms: 100,
            rule_table: RuleTableBackend::Memory,
            pin_path: PathBuf::from("/sys/fs/bpf/tc_emu/maps/MAC_HANDLE_EMU"),
            table_capacity: crate::wire::DEFAULT_TABLE_CAPACITY,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:6380".into(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 6380)),
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 60,
            request_timeout_ms: 2000,
        }
    }
}

impl DispatcherConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl AgentConfig {
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("emunet")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl EmunetConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            EmunetConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("EMUNET_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&EmunetConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply EMUNET_* overrides. Unparseable values are ignored.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn set<T: std::str::FromStr>(slot: &mut T, value: Option<String>) {
            if let Some(parsed) = value.and_then(|v| v.parse().ok()) {
                *slot = parsed;
            }
        }

        set(
            &mut self.dispatcher.listen_addr,
            var("EMUNET_DISPATCHER__LISTEN_ADDR"),
        );
        set(
            &mut self.dispatcher.worker_count,
            var("EMUNET_DISPATCHER__WORKER_COUNT"),
        );
        set(
            &mut self.dispatcher.queue_capacity,
            var("EMUNET_DISPATCHER__QUEUE_CAPACITY"),
        );
        set(
            &mut self.dispatcher.agent_port,
            var("EMUNET_DISPATCHER__AGENT_PORT"),
        );
        set(&mut self.agent.listen_addr, var("EMUNET_AGENT__LISTEN_ADDR"));
        set(
            &mut self.agent.admission_timeout_ms,
            var("EMUNET_AGENT__ADMISSION_TIMEOUT_MS"),
        );
        if let Some(v) = var("EMUNET_AGENT__RULE_TABLE") {
            match v.as_str() {
                "memory" => self.agent.rule_table = RuleTableBackend::Memory,
                "pinned" => self.agent.rule_table = RuleTableBackend::Pinned,
                _ => {}
            }
        }
        if let Some(v) = var("EMUNET_CACHE__URL") {
            self.cache.url = v;
        }
        set(&mut self.cache.listen_addr, var("EMUNET_CACHE__LISTEN_ADDR"));
        set(&mut self.cache.ttl_secs, var("EMUNET_CACHE__TTL_SECS"));
    }
}
