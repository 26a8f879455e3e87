use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// `AppConfig` holds all configuration parameters required by the application.
///
/// The configuration is loaded from environment variables (optionally via a `.env` file)
/// or uses default values if the variable is not set. Durations accept human-friendly
/// values such as "250ms", "5s" or "1m".
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    // --- Database settings ---
    /// Database hostname or service name (e.g. "postgres" in Docker Compose, "localhost" for local runs).
    pub db_host: String,
    /// Database port (default: 5432).
    pub db_port: u16,
    /// Database user.
    pub db_user: String,
    /// Database password.
    pub db_password: String,
    /// Database name.
    pub db_name: String,
    /// Maximum number of pooled connections.
    pub db_pool_size: usize,
    /// Directory with `.sql` migrations applied at startup.
    pub migrations_dir: String,

    // --- Queue settings ---
    /// List of Kafka brokers (comma-separated string in env, parsed to Vec<String>).
    pub kafka_brokers: Vec<String>,
    /// Prefix of the consumer group ids; the subject name is appended.
    pub kafka_group_prefix: String,
    /// Subject for free-form demo messages.
    pub generic_subject: String,
    /// Subject carrying order payloads.
    pub orders_subject: String,
    /// Subject receiving orders that exhausted their delivery budget.
    pub dead_letter_subject: String,
    /// How long a publish may wait for the log to acknowledge the append.
    #[serde(deserialize_with = "deserialize_duration")]
    pub publish_timeout: Duration,

    // --- Consumer ---
    /// Bounded wait for a single poll of the order subject.
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    /// First backoff after a storage failure.
    #[serde(deserialize_with = "deserialize_duration")]
    pub backoff_initial: Duration,
    /// Upper bound of the exponential backoff.
    #[serde(deserialize_with = "deserialize_duration")]
    pub backoff_max: Duration,
    /// Deliveries of one message before it is dead-lettered; 0 retries forever.
    pub max_deliveries: u32,
    /// Consecutive subscribe failures tolerated before the consumer gives up.
    pub max_subscribe_failures: u32,

    // --- HTTP server ---
    /// The port on which the HTTP server will listen.
    pub http_port: u16,
    /// Bounded wait of `GET /read`.
    #[serde(deserialize_with = "deserialize_duration")]
    pub read_timeout: Duration,

    // --- Shutdown timeout ---
    /// Graceful shutdown timeout.
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,
}

/// Accepts human-readable durations like "5s", "1m", etc.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    humantime::parse_duration(&val)
        .map_err(|e| D::Error::custom(format!("Invalid duration '{val}': {e}")))
}

impl AppConfig {
    /// Loads configuration from environment variables (and optionally from `.env` file).
    ///
    /// Fields not set via env will be filled with default values.
    ///
    /// # Errors
    /// Returns an error if environment variables are invalid.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            // Database
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "demo_user")?
            .set_default("db_password", "demo_password")?
            .set_default("db_name", "demo_db")?
            .set_default("db_pool_size", 16)?
            .set_default("migrations_dir", "migrations")?
            // Queue
            .set_default("kafka_brokers", vec!["localhost:9092"])?
            .set_default("kafka_group_prefix", "order-ingest")?
            .set_default("generic_subject", "foo")?
            .set_default("orders_subject", "orders")?
            .set_default("dead_letter_subject", "orders.dlq")?
            .set_default("publish_timeout", "5s")?
            // Consumer
            .set_default("poll_interval", "1m")?
            .set_default("backoff_initial", "200ms")?
            .set_default("backoff_max", "30s")?
            .set_default("max_deliveries", 0)?
            .set_default("max_subscribe_failures", 5)?
            // HTTP
            .set_default("http_port", 8080)?
            .set_default("read_timeout", "2s")?
            // Shutdown
            .set_default("shutdown_timeout", "5s")?
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("kafka_brokers"),
            )
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to load configuration")
    }

    /// Connection string in the key/value form understood by `tokio_postgres`.
    pub fn postgres_dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            self.db_host, self.db_port, self.db_user, self.db_password, self.db_name
        )
    }
}
