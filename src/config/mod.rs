//! One structured config record per component, constructed once from
//! explicit defaults and validated at startup, instead of merging default
//! objects into user-provided options at every call site.

#[cfg(test)]
mod tests;

use crate::constants::*;
use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DispatcherConfig {
    #[validate(range(min = 1))]
    pub max_parallel_tasks: usize,
    pub retry_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub timeout_ms: u64,
    pub max_queue_size: usize,
    pub retention_hours: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: DEFAULT_MAX_PARALLEL_TASKS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff_base_ms: DEFAULT_RETRY_BACKOFF_BASE_MS,
            retry_backoff_max_ms: DEFAULT_RETRY_BACKOFF_MAX_MS,
            timeout_ms: DEFAULT_TASK_TIMEOUT_MS,
            max_queue_size: MAX_QUEUE_SIZE,
            retention_hours: TASK_RETENTION_HOURS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EventBusConfig {
    #[validate(range(min = 1))]
    pub subscriber_high_water: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            subscriber_high_water: DEFAULT_SUBSCRIBER_HIGH_WATER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PatternStoreConfig {
    #[validate(range(min = 1))]
    pub max_patterns: usize,
    #[validate(range(min = 0.0, max = 1.0))]
    pub learning_rate: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_confidence_threshold: f64,
}

impl Default for PatternStoreConfig {
    fn default() -> Self {
        Self {
            max_patterns: DEFAULT_MAX_PATTERNS,
            learning_rate: DEFAULT_LEARNING_RATE,
            min_confidence_threshold: DEFAULT_MIN_CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub enable_stream_fallback: bool,
    pub handshake_timeout_ms: u64,
    pub keep_alive_interval_ms: u64,
    pub max_retries: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7800,
            enable_stream_fallback: true,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            keep_alive_interval_ms: DEFAULT_KEEP_ALIVE_INTERVAL_MS,
            max_retries: DEFAULT_TRANSPORT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CuratorConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub low_confidence_threshold: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub auto_approve_threshold: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub auto_reject_threshold: f64,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
            auto_approve_threshold: DEFAULT_AUTO_APPROVE_THRESHOLD,
            auto_reject_threshold: DEFAULT_AUTO_REJECT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LearningLoopConfig {
    pub interval_ms: u64,
    pub auto_apply_enabled: bool,
}

impl Default for LearningLoopConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_LEARNING_INTERVAL_MS,
            auto_apply_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryConfig {
    /// Only meaningful when built with the `persistent-memory` feature.
    pub sled_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub enable_auth: bool,
    pub allowed_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            api_key: None,
            enable_auth: true,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Top-level config: one record per component, constructed once and
/// validated at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub dispatcher: DispatcherConfig,
    pub event_bus: EventBusConfig,
    pub pattern_store: PatternStoreConfig,
    pub transport: TransportConfig,
    pub curator: CuratorConfig,
    pub learning_loop: LearningLoopConfig,
    pub memory: MemoryConfig,
    pub api: ApiConfig,
}

impl Config {
    /// Defaults for every component, no environment access. Used by tests
    /// and by any embedding that wires the fleet core programmatically.
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Loads config from environment (with `.env` support), falling back
    /// to defaults for anything unset, then validates the whole record.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("loaded .env file from {:?}", path),
            Err(_) => tracing::debug!("no .env file found, using process environment"),
        }

        let mut config = Self::default();

        if let Ok(v) = env::var("FLEET_MAX_PARALLEL_TASKS") {
            config.dispatcher.max_parallel_tasks = v
                .parse()
                .map_err(|_| FleetError::Configuration("FLEET_MAX_PARALLEL_TASKS must be a positive integer".into()))?;
        }
        if let Ok(v) = env::var("FLEET_RETRY_ATTEMPTS") {
            config.dispatcher.retry_attempts = v
                .parse()
                .map_err(|_| FleetError::Configuration("FLEET_RETRY_ATTEMPTS must be an integer".into()))?;
        }
        if let Ok(v) = env::var("FLEET_TASK_TIMEOUT_MS") {
            config.dispatcher.timeout_ms = v
                .parse()
                .map_err(|_| FleetError::Configuration("FLEET_TASK_TIMEOUT_MS must be an integer".into()))?;
        }

        if let Ok(v) = env::var("FLEET_TRANSPORT_HOST") {
            config.transport.host = v;
        }
        if let Ok(v) = env::var("FLEET_TRANSPORT_PORT") {
            config.transport.port = v
                .parse()
                .map_err(|_| FleetError::Configuration("FLEET_TRANSPORT_PORT must be a u16".into()))?;
        }
        if let Ok(v) = env::var("FLEET_ENABLE_STREAM_FALLBACK") {
            config.transport.enable_stream_fallback = v == "true" || v == "1";
        }

        if let Ok(v) = env::var("FLEET_LEARNING_RATE") {
            config.pattern_store.learning_rate = v
                .parse()
                .map_err(|_| FleetError::Configuration("FLEET_LEARNING_RATE must be a float".into()))?;
        }

        config.api.api_key = env::var("FLEET_API_KEY").ok();
        if let Ok(v) = env::var("FLEET_API_HOST") {
            config.api.host = v;
        }
        if let Ok(v) = env::var("FLEET_API_PORT") {
            config.api.port = v
                .parse()
                .map_err(|_| FleetError::Configuration("FLEET_API_PORT must be a u16".into()))?;
        }
        if let Ok(v) = env::var("FLEET_ALLOWED_ORIGINS") {
            config.api.allowed_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if config.api.enable_auth {
            if let Some(key) = &config.api.api_key {
                if key.trim().len() < 32 {
                    return Err(FleetError::Configuration(
                        "FLEET_API_KEY must be at least 32 characters when auth is enabled".into(),
                    ));
                }
            }
        }

        config
            .dispatcher
            .validate()
            .map_err(|e| FleetError::Configuration(e.to_string()))?;
        config
            .event_bus
            .validate()
            .map_err(|e| FleetError::Configuration(e.to_string()))?;
        config
            .pattern_store
            .validate()
            .map_err(|e| FleetError::Configuration(e.to_string()))?;
        config
            .curator
            .validate()
            .map_err(|e| FleetError::Configuration(e.to_string()))?;

        Ok(config)
    }
}
