use crate::domain::value_objects::{NodeId, ParseNodeIdError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("server host cannot be empty")]
    EmptyHost,
    #[error("server port cannot be 0")]
    InvalidPort,
    #[error(transparent)]
    InvalidNodeId(#[from] ParseNodeIdError),
    #[error("queue cap must be at least 1")]
    ZeroQueueCap,
    #[error("{0} must be greater than 0")]
    ZeroInterval(&'static str),
    #[error("landing and staging directories must differ: {0}")]
    SameDirectories(PathBuf),
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    // Initial upstream server
    pub server_host: String,
    pub server_port: u16,

    // Device identity, six hex octets
    pub node_id: String,

    // File gather settings
    pub landing_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub delete_after_send: bool,
    pub queue_cap: usize,
    pub gather_enabled: bool,
    pub gather_interval_secs: u64,

    // Timing
    pub config_sync_interval_secs: u64,
    pub idle_wait_secs: u64,
    pub error_backoff_ms: u64,
    pub connect_timeout_secs: u64,
    pub io_timeout_secs: u64,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 5000,
            node_id: "00:00:00:00:00:00".to_string(),
            landing_dir: PathBuf::from("data/store"),
            staging_dir: PathBuf::from("data/queue"),
            delete_after_send: true,
            queue_cap: 20,
            gather_enabled: true,
            gather_interval_secs: 30,
            config_sync_interval_secs: 10,
            idle_wait_secs: 10,
            error_backoff_ms: 1000,
            connect_timeout_secs: 5,
            io_timeout_secs: 30,
            debug: false,
        }
    }
}

impl Config {
    /// Check the values the engine cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.server_port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        self.node_id()?;
        if self.queue_cap == 0 {
            return Err(ConfigError::ZeroQueueCap);
        }
        let intervals = [
            ("gather_interval_secs", self.gather_interval_secs),
            ("config_sync_interval_secs", self.config_sync_interval_secs),
            ("idle_wait_secs", self.idle_wait_secs),
            ("error_backoff_ms", self.error_backoff_ms),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("io_timeout_secs", self.io_timeout_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroInterval(*name));
        }
        if self.landing_dir == self.staging_dir {
            return Err(ConfigError::SameDirectories(self.landing_dir.clone()));
        }
        Ok(())
    }

    pub fn node_id(&self) -> Result<NodeId, ParseNodeIdError> {
        self.node_id.parse()
    }

    pub fn gather_interval(&self) -> Duration {
        Duration::from_secs(self.gather_interval_secs)
    }

    pub fn config_sync_interval(&self) -> Duration {
        Duration::from_secs(self.config_sync_interval_secs)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_secs(self.idle_wait_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Read a JSON config file. Missing keys take their defaults.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn env_string(name: &str, current: String) -> String {
    std::env::var(name).unwrap_or(current)
}

fn env_parse<T: FromStr>(name: &str, current: T) -> T {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(current),
        Err(_) => current,
    }
}

fn env_bool(name: &str, current: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(current)
}

/// Load configuration: optional JSON file from `UPLINK_CONFIG_PATH`, then
/// environment overrides, then validation.
pub fn load_config() -> Result<Config, ConfigError> {
    let base = match std::env::var("UPLINK_CONFIG_PATH") {
        Ok(path) => load_config_file(Path::new(&path))?,
        Err(_) => Config::default(),
    };

    let server_host = env_string("UPLINK_SERVER_HOST", base.server_host);
    let server_port = env_parse("UPLINK_SERVER_PORT", base.server_port);
    let node_id = env_string("UPLINK_NODE_ID", base.node_id);

    let landing_dir = std::env::var("UPLINK_LANDING_DIR")
        .map(PathBuf::from)
        .unwrap_or(base.landing_dir);
    let staging_dir = std::env::var("UPLINK_STAGING_DIR")
        .map(PathBuf::from)
        .unwrap_or(base.staging_dir);

    let delete_after_send = env_bool("UPLINK_DELETE_AFTER_SEND", base.delete_after_send);
    let queue_cap = env_parse("UPLINK_QUEUE_CAP", base.queue_cap);
    let gather_enabled = env_bool("UPLINK_GATHER_ENABLED", base.gather_enabled);
    let gather_interval_secs = env_parse("UPLINK_GATHER_INTERVAL_SECS", base.gather_interval_secs);

    let config_sync_interval_secs =
        env_parse("UPLINK_CONFIG_SYNC_INTERVAL_SECS", base.config_sync_interval_secs);
    let idle_wait_secs = env_parse("UPLINK_IDLE_WAIT_SECS", base.idle_wait_secs);
    let error_backoff_ms = env_parse("UPLINK_ERROR_BACKOFF_MS", base.error_backoff_ms);
    let connect_timeout_secs = env_parse("UPLINK_CONNECT_TIMEOUT_SECS", base.connect_timeout_secs);
    let io_timeout_secs = env_parse("UPLINK_IO_TIMEOUT_SECS", base.io_timeout_secs);

    let debug = std::env::var("DEBUG").is_ok() || base.debug;

    let cfg = Config {
        server_host,
        server_port,
        node_id,
        landing_dir,
        staging_dir,
        delete_after_send,
        queue_cap,
        gather_enabled,
        gather_interval_secs,
        config_sync_interval_secs,
        idle_wait_secs,
        error_backoff_ms,
        connect_timeout_secs,
        io_timeout_secs,
        debug,
    };
    cfg.validate()?;
    Ok(cfg)
}
