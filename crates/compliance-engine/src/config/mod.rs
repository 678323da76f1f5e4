use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::notifications::dispatcher::DispatchConfig;
use crate::notifications::gate::ThrottleConfig;
use crate::notifications::scoring::ScoringConfig;

/// Distinguishes runtime behavior for different stages of the service.
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

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine: EngineConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Scheduling, throttling, and delivery knobs for the compliance engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub due_soon_window_days: u32,
    pub look_ahead_days: u32,
    pub escalate_after_days: u32,
    pub rate_limit: u32,
    pub rate_window_hours: u32,
    pub dedup_window_days: u32,
    pub max_send_attempts: u8,
    pub retry_base_delay_ms: u64,
    pub sweep_workers: usize,
    pub scoring: ScoringConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            due_soon_window_days: 30,
            look_ahead_days: 90,
            escalate_after_days: 7,
            rate_limit: 5,
            rate_window_hours: 24,
            dedup_window_days: 30,
            max_send_attempts: 3,
            retry_base_delay_ms: 200,
            sweep_workers: 4,
            scoring: ScoringConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads `ENGINE_*` overrides on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let escalate_after_days =
            env_or("ENGINE_ESCALATE_AFTER_DAYS", defaults.escalate_after_days)?;

        let config = Self {
            due_soon_window_days: env_or("ENGINE_DUE_SOON_DAYS", defaults.due_soon_window_days)?,
            look_ahead_days: env_or("ENGINE_LOOK_AHEAD_DAYS", defaults.look_ahead_days)?,
            escalate_after_days,
            rate_limit: env_or("ENGINE_RATE_LIMIT", defaults.rate_limit)?,
            rate_window_hours: env_or("ENGINE_RATE_WINDOW_HOURS", defaults.rate_window_hours)?,
            dedup_window_days: env_or("ENGINE_DEDUP_WINDOW_DAYS", defaults.dedup_window_days)?,
            max_send_attempts: env_or("ENGINE_MAX_SEND_ATTEMPTS", defaults.max_send_attempts)?,
            retry_base_delay_ms: env_or("ENGINE_RETRY_BASE_MS", defaults.retry_base_delay_ms)?,
            sweep_workers: env_or("ENGINE_SWEEP_WORKERS", defaults.sweep_workers)?,
            scoring: ScoringConfig {
                escalate_after_days,
                ..defaults.scoring
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3).contains(&self.max_send_attempts) {
            return Err(ConfigError::OutOfRange {
                key: "ENGINE_MAX_SEND_ATTEMPTS",
                expected: "between 1 and 3",
            });
        }
        if self.rate_limit == 0 {
            return Err(ConfigError::OutOfRange {
                key: "ENGINE_RATE_LIMIT",
                expected: "at least 1",
            });
        }
        if self.rate_window_hours == 0 {
            return Err(ConfigError::OutOfRange {
                key: "ENGINE_RATE_WINDOW_HOURS",
                expected: "at least 1",
            });
        }
        if self.sweep_workers == 0 {
            return Err(ConfigError::OutOfRange {
                key: "ENGINE_SWEEP_WORKERS",
                expected: "at least 1",
            });
        }
        if self.scoring.overdue_floor < self.scoring.minimum_score {
            return Err(ConfigError::OutOfRange {
                key: "scoring.overdue_floor",
                expected: "not below the minimum score",
            });
        }
        Ok(())
    }

    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            rate_limit: self.rate_limit,
            rate_window_hours: self.rate_window_hours,
            dedup_window_days: self.dedup_window_days,
            ..ThrottleConfig::default()
        }
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            max_attempts: self.max_send_attempts,
            retry_base_delay_ms: self.retry_base_delay_ms,
        }
    }
}

fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        _ => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str, value: String },
    OutOfRange { key: &'static str, expected: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a non-negative integer, got '{value}'")
            }
            ConfigError::OutOfRange { key, expected } => write!(f, "{key} must be {expected}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::OutOfRange { .. } => None,
        }
    }
}
