//! System-wide default tunables. Components accept a config record that
//! may override every value here; these are only the fallback defaults.

// Dispatcher
pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 8;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 100;
pub const DEFAULT_RETRY_BACKOFF_MAX_MS: u64 = 10_000;
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 30_000;
pub const TASK_POLL_INTERVAL_MS: u64 = 50;
pub const MAX_QUEUE_SIZE: usize = 10_000;
pub const TASK_RETENTION_HOURS: i64 = 24;
pub const DISPATCHER_CLEANUP_INTERVAL_SECS: u64 = 300;

// Event bus
pub const DEFAULT_SUBSCRIBER_HIGH_WATER: usize = 1_000;

// Pattern store
pub const DEFAULT_MAX_PATTERNS: usize = 10_000;
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;
pub const DEFAULT_MIN_CONFIDENCE_THRESHOLD: f64 = 0.3;

// Transport
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_KEEP_ALIVE_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_TRANSPORT_MAX_RETRIES: u32 = 5;
pub const LATENCY_SAMPLE_RING_SIZE: usize = 100;

// Curator
pub const DEFAULT_LOW_CONFIDENCE_THRESHOLD: f64 = 0.4;
pub const DEFAULT_AUTO_APPROVE_THRESHOLD: f64 = 0.85;
pub const DEFAULT_AUTO_REJECT_THRESHOLD: f64 = 0.15;

// Learning loop
pub const DEFAULT_LEARNING_INTERVAL_MS: u64 = 3_600_000;
pub const HIGH_CONFIDENCE_LOW_USAGE_CONFIDENCE: f64 = 0.8;
pub const HIGH_CONFIDENCE_LOW_USAGE_MAX_USAGE: u64 = 10;
pub const AUTO_APPLY_MAX_STRATEGIES: usize = 3;
pub const AUTO_APPLY_MIN_CONFIDENCE: f64 = 0.9;
pub const AUTO_APPLY_MIN_SUCCESS_RATE: f64 = 0.8;
