use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub booking: BookingConfig,
    pub scheduler: SchedulerConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_json: bool,
    pub store: StoreKind,
}

/// Где живут места и заказы.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreKind::Postgres),
            "memory" | "mem" => Ok(StoreKind::Memory),
            other => Err(format!("unknown store '{other}'")),
        }
    }
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub seat_map_ttl_seconds: u64,
    pub events_channel: String,
}

/// Времена жизни брони и окна оплаты.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    /// TTL анонимной (temporary) брони
    pub hold_ttl_seconds: i64,
    /// Окно оплаты после ввода данных покупателя
    pub payment_window_seconds: i64,
    /// Таймзона площадки, если справочник её не знает
    pub default_timezone: String,
}

/// Интервалы фоновых задач.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub sweep_interval_seconds: u64,
    pub sweep_concurrency: usize,
    pub lock_interval_seconds: u64,
    pub lock_window_seconds: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

impl BookingConfig {
    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.hold_ttl_seconds)
    }

    pub fn payment_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.payment_window_seconds)
    }
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            hold_ttl_seconds: 15 * 60,
            payment_window_seconds: 15 * 60,
            default_timezone: "UTC".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn lock_interval(&self) -> Duration {
        Duration::from_secs(self.lock_interval_seconds)
    }

    pub fn lock_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_window_seconds)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 60,
            sweep_concurrency: 8,
            lock_interval_seconds: 60,
            lock_window_seconds: 10 * 60,
        }
    }
}

// Значение переменной или дефолт; мусор в переменной - ошибка, а не паника
fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

// Окна брони и оплаты должны давать срок в будущем
fn positive(key: &'static str, value: i64) -> Result<i64, ConfigError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(ConfigError::Invalid { key, value: value.to_string() })
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let store: StoreKind = env_or("STORE", StoreKind::Postgres)?;
        let database_url = match env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) if store == StoreKind::Memory => String::new(),
            Err(_) => return Err(ConfigError::Missing("DATABASE_URL")),
        };

        let booking_defaults = BookingConfig::default();
        let scheduler_defaults = SchedulerConfig::default();

        Ok(Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("PORT", 8000)?,
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "seat_booking=debug,tower_http=debug".to_string()),
                log_json: env_or("LOG_JSON", false)?,
                store,
            },
            database: DatabaseConfig {
                url: database_url,
                pool_size: env_or("DB_POOL_SIZE", 20)?,
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok().filter(|u| !u.is_empty()),
                seat_map_ttl_seconds: env_or("SEAT_MAP_CACHE_TTL_SECONDS", 30)?,
                events_channel: env::var("EVENTS_CHANNEL")
                    .unwrap_or_else(|_| "seat_booking:events".to_string()),
            },
            booking: BookingConfig {
                hold_ttl_seconds: positive(
                    "HOLD_TTL_SECONDS",
                    env_or("HOLD_TTL_SECONDS", booking_defaults.hold_ttl_seconds)?,
                )?,
                payment_window_seconds: positive(
                    "PAYMENT_WINDOW_SECONDS",
                    env_or("PAYMENT_WINDOW_SECONDS", booking_defaults.payment_window_seconds)?,
                )?,
                default_timezone: env::var("DEFAULT_TIMEZONE")
                    .unwrap_or(booking_defaults.default_timezone),
            },
            scheduler: SchedulerConfig {
                sweep_interval_seconds: env_or(
                    "SWEEP_INTERVAL_SECONDS",
                    scheduler_defaults.sweep_interval_seconds,
                )?,
                sweep_concurrency: env_or("SWEEP_CONCURRENCY", scheduler_defaults.sweep_concurrency)?,
                lock_interval_seconds: env_or(
                    "LOCK_INTERVAL_SECONDS",
                    scheduler_defaults.lock_interval_seconds,
                )?,
                lock_window_seconds: env_or(
                    "LOCK_WINDOW_SECONDS",
                    scheduler_defaults.lock_window_seconds,
                )?,
            },
        })
    }
}
