use crate::config::{Config, DEFAULT_SUBSCRIPTION, DEFAULT_TOPIC};
use std::env;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;

// Global lock to prevent race conditions when modifying environment variables in tests
static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn get_env_lock() -> &'static Mutex<()> {
    ENV_LOCK.get_or_init(|| Mutex::new(()))
}

const RELAY_VARS: &[&str] = &[
    "RELAY_TOPIC",
    "RELAY_SCRAPE_URLS",
    "RELAY_PUBLISH_INTERVAL_SECS",
    "RELAY_ACK_TIMEOUT_MS",
    "RELAY_LABELS",
    "RELAY_SUBSCRIPTION",
    "RELAY_IDENTITY_ATTRIBUTE",
    "RELAY_CACHE_KEY_ATTRIBUTE",
    "RELAY_MAX_IN_FLIGHT",
    "RELAY_SOURCE_LABEL",
    "RELAY_MAX_STALENESS_SECS",
    "RELAY_RECEIVER_LABELS",
];

fn clear_relay_env() {
    for key in RELAY_VARS {
        // SAFETY: env access is serialized by ENV_LOCK
        unsafe { env::remove_var(key) };
    }
}

fn set(key: &str, value: &str) {
    // SAFETY: env access is serialized by ENV_LOCK
    unsafe { env::set_var(key, value) };
}

#[test]
fn test_config_defaults() {
    let _guard = get_env_lock().lock().unwrap();
    clear_relay_env();

    let config = Config::from_env().unwrap();

    assert_eq!(config.publisher.topic, DEFAULT_TOPIC);
    assert!(config.publisher.scrape_urls.is_empty());
    assert_eq!(config.publisher.publish_interval, Duration::from_secs(60));
    assert_eq!(config.publisher.ack_timeout, Duration::from_secs(5));
    assert!(config.publisher.labels.is_empty());

    assert_eq!(config.receiver.subscription, DEFAULT_SUBSCRIPTION);
    assert_eq!(config.receiver.identity_attribute, "deviceId");
    assert_eq!(config.receiver.cache_key_attribute, None);
    assert_eq!(config.receiver.max_in_flight, 64);
    assert_eq!(config.receiver.source_label, None);
    assert_eq!(config.receiver.max_staleness, None);
}

#[test]
fn test_config_from_relay_vars() {
    let _guard = get_env_lock().lock().unwrap();
    clear_relay_env();
    set("RELAY_TOPIC", "/devices/dev-7/events/metrics");
    set("RELAY_SCRAPE_URLS", "http://127.0.0.1:9100/metrics");
    set("RELAY_PUBLISH_INTERVAL_SECS", "15");
    set("RELAY_ACK_TIMEOUT_MS", "250");
    set("RELAY_LABELS", "instance=dev-7,location=roof");
    set("RELAY_CACHE_KEY_ATTRIBUTE", "deviceNumId");
    set("RELAY_MAX_IN_FLIGHT", "8");
    set("RELAY_SOURCE_LABEL", "relay_source");
    set("RELAY_MAX_STALENESS_SECS", "600");

    let config = Config::from_env().unwrap();
    clear_relay_env();

    let options = config.publisher.to_options();
    assert_eq!(options.topic, "/devices/dev-7/events/metrics");
    assert_eq!(options.interval, Duration::from_secs(15));
    assert_eq!(options.ack_timeout, Duration::from_millis(250));
    assert_eq!(config.publisher.scrape_urls.len(), 1);
    assert_eq!(config.publisher.labels["location"], "roof");

    let options = config.receiver.to_options();
    assert_eq!(options.cache_key_attribute.as_deref(), Some("deviceNumId"));
    assert_eq!(options.max_in_flight, 8);
    assert_eq!(options.source_label.as_deref(), Some("relay_source"));
    assert_eq!(options.max_staleness, Some(Duration::from_secs(600)));
}

#[test]
fn test_config_rejects_bad_values() {
    let _guard = get_env_lock().lock().unwrap();

    clear_relay_env();
    set("RELAY_PUBLISH_INTERVAL_SECS", "soon");
    assert!(Config::from_env().is_err());

    clear_relay_env();
    set("RELAY_PUBLISH_INTERVAL_SECS", "0");
    assert!(Config::from_env().is_err());

    clear_relay_env();
    set("RELAY_MAX_IN_FLIGHT", "0");
    assert!(Config::from_env().is_err());

    clear_relay_env();
    set("RELAY_SCRAPE_URLS", "not a url");
    assert!(Config::from_env().is_err());

    clear_relay_env();
}
