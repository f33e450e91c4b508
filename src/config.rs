//! Configuration management for Windgate.
//!
//! Configuration is read from an optional YAML file and then overridden by
//! `WINDGATE__SECTION__FIELD` environment variables, e.g.
//! `WINDGATE__BACKEND__KIND=distributed` or
//! `WINDGATE__BACKEND__ENDPOINTS=redis://a:6379,redis://b:6379`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{GateError, Result};
use crate::ratelimit::MAX_SHARDS;

/// Main configuration for the Windgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Default limit and window
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Decision backend selection
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

/// Limit applied when no tier resolves, and the window for every decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Admissions per window when neither tenant nor model tier is known
    #[serde(default = "default_limit")]
    pub default_limit: u64,

    /// Window width in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            window_secs: default_window_secs(),
        }
    }
}

impl LimitsConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_limit() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    3600
}

/// Which decider implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process logs; correct for a single gateway process only.
    #[default]
    Local,
    /// Redis sorted sets, shared by every gateway process.
    Distributed,
}

/// What the HTTP layer answers when the backend is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request.
    Open,
    /// Refuse the request with 503.
    #[default]
    Closed,
}

/// Backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Local or distributed
    #[serde(default)]
    pub kind: BackendKind,

    /// Redis URLs, one per shard, in shard order
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Namespace for store keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Bound on one store round trip in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Answer used when the store cannot be reached
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// How often the local backend drops idle event logs (disabled if unset)
    #[serde(default)]
    pub local_evict_interval_secs: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            endpoints: default_endpoints(),
            key_prefix: default_key_prefix(),
            timeout_ms: default_timeout_ms(),
            failure_policy: FailurePolicy::default(),
            local_evict_interval_secs: None,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_endpoints() -> Vec<String> {
    vec!["redis://127.0.0.1:6379/0".to_string()]
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

fn default_timeout_ms() -> u64 {
    250
}

impl GateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GateConfig =
            serde_yaml::from_str(yaml).map_err(|e| GateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Layer the optional YAML file and `WINDGATE__*` environment variables,
    /// then validate.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("WINDGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("backend.endpoints"),
        );

        let config: GateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the deciders would refuse at request time anyway.
    pub fn validate(&self) -> Result<()> {
        if self.limits.default_limit == 0 {
            return Err(GateError::Config("limits.default_limit must be > 0".to_string()));
        }
        if self.limits.window_secs == 0 {
            return Err(GateError::Config("limits.window_secs must be > 0".to_string()));
        }
        if self.backend.timeout_ms == 0 {
            return Err(GateError::Config("backend.timeout_ms must be > 0".to_string()));
        }
        if self.backend.local_evict_interval_secs == Some(0) {
            return Err(GateError::Config(
                "backend.local_evict_interval_secs must be > 0".to_string(),
            ));
        }
        if self.backend.kind == BackendKind::Distributed {
            if self.backend.endpoints.is_empty() {
                return Err(GateError::Config(
                    "backend.endpoints must list at least one shard".to_string(),
                ));
            }
            if self.backend.endpoints.len() > MAX_SHARDS {
                return Err(GateError::Config(format!(
                    "backend.endpoints lists {} shards, at most {} are supported",
                    self.backend.endpoints.len(),
                    MAX_SHARDS
                )));
            }
        }
        Ok(())
    }
}
