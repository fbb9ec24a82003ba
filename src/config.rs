use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_hours: i64,
}

/// Argon2 work factor.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_capacity: u64,
    pub ttl_short_secs: u64,
    pub ttl_medium_secs: u64,
    pub ttl_long_secs: u64,
    pub invalidate_on_write: bool,
}

impl CacheConfig {
    pub fn ttl(&self) -> CacheTtl {
        CacheTtl {
            short: Duration::from_secs(self.ttl_short_secs),
            medium: Duration::from_secs(self.ttl_medium_secs),
            long: Duration::from_secs(self.ttl_long_secs),
        }
    }
}

/// Expiration tiers shared by cached read paths.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtl {
    pub short: Duration,
    pub medium: Duration,
    pub long: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_mode: String,
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub cache: CacheConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "account-app".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "account-users".into()),
            ttl_hours: env_or("JWT_TTL_HOURS", 72),
        };
        let password = PasswordConfig {
            memory_kib: env_or("ARGON2_MEMORY_KIB", argon2::Params::DEFAULT_M_COST),
            iterations: env_or("ARGON2_ITERATIONS", argon2::Params::DEFAULT_T_COST),
            parallelism: env_or("ARGON2_PARALLELISM", argon2::Params::DEFAULT_P_COST),
        };
        let cache = CacheConfig {
            enabled: env_or("CACHE_ENABLED", true),
            max_capacity: env_or("CACHE_MAX_CAPACITY", 10_000),
            ttl_short_secs: env_or("CACHE_TTL_SHORT_SECS", 60),
            ttl_medium_secs: env_or("CACHE_TTL_MEDIUM_SECS", 300),
            ttl_long_secs: env_or("CACHE_TTL_LONG_SECS", 3600),
            invalidate_on_write: env_or("CACHE_INVALIDATE_ON_WRITE", false),
        };
        Ok(Self {
            app_mode: std::env::var("APP_MODE").unwrap_or_else(|_| "development".into()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("APP_PORT", 8080),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 60),
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            jwt,
            password,
            cache,
        })
    }
}

// Unparseable values fall back to the default, same as unset ones.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
