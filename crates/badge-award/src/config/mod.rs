use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the badge reviewer.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub review: ReviewConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let database_path = env::var("APP_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("badges.sqlite3"));

        let interval_secs = env::var("APP_REVIEW_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or(ConfigError::InvalidReviewInterval)?;

        let facts_path = env::var("APP_FACTS_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            environment,
            telemetry: TelemetryConfig { log_level },
            storage: StorageConfig { database_path },
            review: ReviewConfig {
                interval: Duration::from_secs(interval_secs),
                facts_path,
            },
        })
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Location of the SQLite badge database.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

/// Periodic review settings.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub interval: Duration,
    /// JSON facts snapshot used when no path is given on the command line.
    pub facts_path: Option<PathBuf>,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidReviewInterval,
    MissingFactsPath,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidReviewInterval => {
                write!(f, "APP_REVIEW_INTERVAL_SECS must be a positive number of seconds")
            }
            ConfigError::MissingFactsPath => {
                write!(f, "no facts snapshot given; pass --facts or set APP_FACTS_PATH")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
