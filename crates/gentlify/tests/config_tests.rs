//! Environment-variable configuration loading.
//!
//! Each test uses a unique prefix so parallel tests never read each
//! other's process-global environment.

use std::env;

use gentlify::{ConfigError, Throttle, ThrottleConfig};

fn set(prefix: &str, name: &str, value: &str) {
    env::set_var(format!("{prefix}_{name}"), value);
}

#[test]
fn loads_scalar_fields() {
    let prefix = "GENTLIFY_TEST_SCALARS";
    set(prefix, "MAX_CONCURRENCY", "20");
    set(prefix, "INITIAL_CONCURRENCY", "4");
    set(prefix, "MIN_DISPATCH_INTERVAL", "0.05");
    set(prefix, "MAX_DISPATCH_INTERVAL", "15.0");
    set(prefix, "FAILURE_THRESHOLD", "5");
    set(prefix, "FAILURE_WINDOW", "120.0");
    set(prefix, "COOLING_PERIOD", "45.0");
    set(prefix, "SAFE_CEILING_DECAY_MULTIPLIER", "3.0");
    set(prefix, "JITTER_FRACTION", "0.25");
    set(prefix, "TOTAL_TASKS", "500");

    let config = ThrottleConfig::from_env_with_prefix(prefix).unwrap();
    assert_eq!(config.max_concurrency, 20);
    assert_eq!(config.initial_concurrency, Some(4));
    assert_eq!(config.min_dispatch_interval, 0.05);
    assert_eq!(config.max_dispatch_interval, 15.0);
    assert_eq!(config.failure_threshold, 5);
    assert_eq!(config.failure_window, 120.0);
    assert_eq!(config.cooling_period, 45.0);
    assert_eq!(config.safe_ceiling_decay_multiplier, 3.0);
    assert_eq!(config.jitter_fraction, 0.25);
    assert_eq!(config.total_tasks, 500);
}

#[test]
fn unset_variables_keep_defaults() {
    let config = ThrottleConfig::from_env_with_prefix("GENTLIFY_TEST_UNSET").unwrap();
    assert_eq!(config.max_concurrency, 5);
    assert_eq!(config.min_dispatch_interval, 0.2);
    assert!(config.token_budget.is_none());
    assert!(config.circuit_breaker.is_none());
}

#[test]
fn token_budget_requires_both_variables() {
    let prefix = "GENTLIFY_TEST_TB_FULL";
    set(prefix, "TOKEN_BUDGET_MAX", "5000");
    set(prefix, "TOKEN_BUDGET_WINDOW", "60.0");
    let config = ThrottleConfig::from_env_with_prefix(prefix).unwrap();
    let budget = config.token_budget.unwrap();
    assert_eq!(budget.max_tokens, 5000);
    assert_eq!(budget.window_seconds, 60.0);
}

#[test]
fn lone_token_budget_variable_is_ignored() {
    let prefix = "GENTLIFY_TEST_TB_PARTIAL";
    set(prefix, "TOKEN_BUDGET_MAX", "5000");
    let config = ThrottleConfig::from_env_with_prefix(prefix).unwrap();
    assert!(config.token_budget.is_none());
}

#[test]
fn any_breaker_variable_constructs_the_breaker_with_defaults() {
    let prefix = "GENTLIFY_TEST_CB_PARTIAL";
    set(prefix, "CIRCUIT_BREAKER_OPEN_DURATION", "12.5");
    let config = ThrottleConfig::from_env_with_prefix(prefix).unwrap();
    let breaker = config.circuit_breaker.unwrap();
    assert_eq!(breaker.open_duration, 12.5);
    assert_eq!(breaker.consecutive_failures, 10);
    assert_eq!(breaker.half_open_max_calls, 1);
}

#[test]
fn all_breaker_variables_are_honored() {
    let prefix = "GENTLIFY_TEST_CB_FULL";
    set(prefix, "CIRCUIT_BREAKER_CONSECUTIVE_FAILURES", "4");
    set(prefix, "CIRCUIT_BREAKER_OPEN_DURATION", "20.0");
    set(prefix, "CIRCUIT_BREAKER_HALF_OPEN_MAX_CALLS", "2");
    let config = ThrottleConfig::from_env_with_prefix(prefix).unwrap();
    let breaker = config.circuit_breaker.unwrap();
    assert_eq!(breaker.consecutive_failures, 4);
    assert_eq!(breaker.open_duration, 20.0);
    assert_eq!(breaker.half_open_max_calls, 2);
}

#[test]
fn unparsable_values_name_the_variable() {
    let prefix = "GENTLIFY_TEST_BAD_INT";
    set(prefix, "MAX_CONCURRENCY", "not-a-number");
    let err = ThrottleConfig::from_env_with_prefix(prefix).unwrap_err();
    match err {
        ConfigError::Env { var, .. } => {
            assert_eq!(var, "GENTLIFY_TEST_BAD_INT_MAX_CONCURRENCY");
        }
        other => panic!("expected Env error, got {other}"),
    }
}

#[test]
fn loaded_values_are_still_validated() {
    let prefix = "GENTLIFY_TEST_INVALID_COMBO";
    set(prefix, "MIN_DISPATCH_INTERVAL", "5.0");
    set(prefix, "MAX_DISPATCH_INTERVAL", "1.0");
    let err = ThrottleConfig::from_env_with_prefix(prefix).unwrap_err();
    assert!(err.to_string().contains("max_dispatch_interval"));
}

#[test]
fn whitespace_around_values_is_tolerated() {
    let prefix = "GENTLIFY_TEST_TRIM";
    set(prefix, "MAX_CONCURRENCY", " 7 ");
    let config = ThrottleConfig::from_env_with_prefix(prefix).unwrap();
    assert_eq!(config.max_concurrency, 7);
}

#[tokio::test]
async fn throttle_builds_from_a_prefixed_environment() {
    let prefix = "GENTLIFY_TEST_THROTTLE";
    set(prefix, "MAX_CONCURRENCY", "3");
    set(prefix, "MIN_DISPATCH_INTERVAL", "0.0");
    set(prefix, "JITTER_FRACTION", "0.0");

    let throttle = Throttle::from_env_with_prefix(prefix).unwrap();
    let snap = throttle.snapshot();
    assert_eq!(snap.concurrency, 3);
    assert_eq!(snap.max_concurrency, 3);

    let slot = throttle.acquire().await.unwrap();
    slot.succeed();
    assert_eq!(throttle.snapshot().completed_tasks, 1);
}
