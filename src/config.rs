use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub application: ApplicationSettings,
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationSettings {
    pub log_level: String,
    pub log_format: String,
}

/// Tuning block for the idempotency coordinator.
#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencySettings {
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub retention_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            max_poll_attempts: 5,
            retention_seconds: 345_600, // 4 days
            connect_timeout_seconds: 2,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}
