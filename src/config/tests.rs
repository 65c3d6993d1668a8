use super::*;
use serial_test::serial;
use std::env;

fn cleanup_env() {
    for key in [
        "FLEET_MAX_PARALLEL_TASKS",
        "FLEET_RETRY_ATTEMPTS",
        "FLEET_TASK_TIMEOUT_MS",
        "FLEET_TRANSPORT_HOST",
        "FLEET_TRANSPORT_PORT",
        "FLEET_ENABLE_STREAM_FALLBACK",
        "FLEET_LEARNING_RATE",
        "FLEET_API_KEY",
        "FLEET_API_HOST",
        "FLEET_API_PORT",
        "FLEET_ALLOWED_ORIGINS",
    ] {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn defaults_validate() {
    cleanup_env();
    let config = Config::load().expect("defaults must validate");
    assert_eq!(config.dispatcher.max_parallel_tasks, DEFAULT_MAX_PARALLEL_TASKS);
    assert_eq!(config.curator.auto_reject_threshold, DEFAULT_AUTO_REJECT_THRESHOLD);
    cleanup_env();
}

#[test]
#[serial]
fn rejects_short_api_key_when_auth_enabled() {
    cleanup_env();
    env::set_var("FLEET_API_KEY", "too-short");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_env();
}

#[test]
#[serial]
fn accepts_long_api_key() {
    cleanup_env();
    env::set_var("FLEET_API_KEY", "a".repeat(32));
    let config = Config::load().expect("32-char key should be accepted");
    assert_eq!(config.api.api_key.as_deref(), Some("a".repeat(32)).as_deref());
    cleanup_env();
}

#[test]
#[serial]
fn overrides_dispatcher_parallelism_from_env() {
    cleanup_env();
    env::set_var("FLEET_MAX_PARALLEL_TASKS", "16");
    let config = Config::load().unwrap();
    assert_eq!(config.dispatcher.max_parallel_tasks, 16);
    cleanup_env();
}

#[test]
#[serial]
fn rejects_invalid_numeric_override() {
    cleanup_env();
    env::set_var("FLEET_MAX_PARALLEL_TASKS", "not-a-number");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_env();
}

#[test]
#[serial]
fn rejects_zero_parallelism_on_validation() {
    cleanup_env();
    env::set_var("FLEET_MAX_PARALLEL_TASKS", "0");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_env();
}

#[test]
fn parses_allowed_origins_list() {
    let mut config = Config::defaults();
    config.api.allowed_origins = "http://a.com, http://b.com,,".split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    assert_eq!(config.api.allowed_origins, vec!["http://a.com", "http://b.com"]);
}
