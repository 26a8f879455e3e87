use std::time::Duration;

use app_config::AppConfig;

#[test]
fn test_load_default_config() {
    let cfg = AppConfig::load().unwrap();
    assert_eq!(cfg.db_port, 5432);
    assert_eq!(cfg.generic_subject, "foo");
    assert_eq!(cfg.read_timeout, Duration::from_secs(2));
    assert_eq!(cfg.backoff_initial, Duration::from_millis(200));
    assert!(cfg.backoff_initial <= cfg.backoff_max);
}

#[test]
fn test_env_overrides_defaults() {
    std::env::set_var("DEAD_LETTER_SUBJECT", "orders.parked");
    std::env::set_var("KAFKA_BROKERS", "kafka-1:9092,kafka-2:9092");
    std::env::set_var("MAX_DELIVERIES", "7");

    let cfg = AppConfig::load().unwrap();
    assert_eq!(cfg.dead_letter_subject, "orders.parked");
    assert_eq!(cfg.kafka_brokers, vec!["kafka-1:9092", "kafka-2:9092"]);
    assert_eq!(cfg.max_deliveries, 7);
}

#[test]
fn test_postgres_dsn() {
    let cfg = AppConfig::load().unwrap();
    let dsn = cfg.postgres_dsn();
    assert!(dsn.contains(&format!("port={}", cfg.db_port)));
    assert!(dsn.ends_with("sslmode=disable"));
}
