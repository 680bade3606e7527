use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::utils::HashingParams;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub security: SecurityConfig,
    pub hashing: HashingParams,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Lockout, session and reset policy.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub lockout_threshold: i32,
    pub lockout_duration_minutes: i64,
    pub session_ttl_minutes: i64,
    pub password_reset_ttl_minutes: i64,
    pub session_cleanup_interval_seconds: u64,
    pub allowed_origins: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            lockout_threshold: 3,
            lockout_duration_minutes: 15,
            session_ttl_minutes: 30,
            password_reset_ttl_minutes: 60,
            session_cleanup_interval_seconds: 300,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let backend: StoreBackend = get_env("STORE_BACKEND", Some("postgres"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let database = match backend {
            StoreBackend::Postgres => Some(DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            }),
            StoreBackend::Memory => None,
        };

        let defaults = HashingParams::default();

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("clinic-auth"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|s| !s.is_empty()),
            store: StoreConfig { backend, database },
            security: SecurityConfig {
                lockout_threshold: parse_env("LOCKOUT_THRESHOLD", "3", is_prod)?,
                lockout_duration_minutes: parse_env("LOCKOUT_DURATION_MINUTES", "15", is_prod)?,
                session_ttl_minutes: parse_env("SESSION_TTL_MINUTES", "30", is_prod)?,
                password_reset_ttl_minutes: parse_env("PASSWORD_RESET_TTL_MINUTES", "60", is_prod)?,
                session_cleanup_interval_seconds: parse_env(
                    "SESSION_CLEANUP_INTERVAL_SECONDS",
                    "300",
                    is_prod,
                )?,
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
            },
            hashing: HashingParams {
                memory_kib: parse_env(
                    "PASSWORD_HASH_MEMORY_KIB",
                    &defaults.memory_kib.to_string(),
                    is_prod,
                )?,
                iterations: parse_env(
                    "PASSWORD_HASH_ITERATIONS",
                    &defaults.iterations.to_string(),
                    is_prod,
                )?,
                parallelism: parse_env(
                    "PASSWORD_HASH_PARALLELISM",
                    &defaults.parallelism.to_string(),
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.security.lockout_threshold <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LOCKOUT_THRESHOLD must be positive"
            )));
        }

        for (key, value) in [
            ("LOCKOUT_DURATION_MINUTES", self.security.lockout_duration_minutes),
            ("SESSION_TTL_MINUTES", self.security.session_ttl_minutes),
            ("PASSWORD_RESET_TTL_MINUTES", self.security.password_reset_ttl_minutes),
        ] {
            if value <= 0 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} must be positive",
                    key
                )));
            }
        }

        if self.security.session_cleanup_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_CLEANUP_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.store.backend == StoreBackend::Memory {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "In-memory store is not allowed in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.hashing.memory_kib < HashingParams::default().memory_kib {
                tracing::warn!(
                    memory_kib = self.hashing.memory_kib,
                    "Password hashing memory cost is below the recommended baseline"
                );
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}
