use common::grpc::GrpcLoggingConfig;
use common::postgres::PostgresConfig;
use common::redis::RedisConfig;
use config::{Config, ConfigError, Environment};
use router_manager_api::grpc::GrpcServerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // gRPC configuration
    #[serde(default = "default_grpc_host")]
    pub grpc_host: String,

    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    /// Comma-separated path prefixes excluded from request logging
    #[serde(default = "default_grpc_ignored_paths")]
    pub grpc_ignored_paths: String,

    /// Calls slower than this are logged at warn level
    #[serde(default = "default_grpc_slow_request_ms")]
    pub grpc_slow_request_ms: u64,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_postgres_pool_timeout_secs")]
    pub postgres_pool_timeout_secs: u64,

    #[serde(default = "default_postgres_migrations_dir")]
    pub postgres_migrations_dir: String,

    #[serde(default = "default_postgres_goose_binary_path")]
    pub postgres_goose_binary_path: String,

    // Redis configuration
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_redis_connection_timeout_ms")]
    pub redis_connection_timeout_ms: u64,

    #[serde(default = "default_redis_response_timeout_ms")]
    pub redis_response_timeout_ms: u64,

    #[serde(default = "default_redis_router_ttl_secs")]
    pub redis_router_ttl_secs: u64,

    #[serde(default = "default_redis_command_ttl_secs")]
    pub redis_command_ttl_secs: u64,

    /// Upper bound on shutdown cleanup
    #[serde(default = "default_closer_timeout_secs")]
    pub closer_timeout_secs: u64,
}

fn default_service_name() -> String {
    "router-manager".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_grpc_host() -> String {
    "0.0.0.0".to_string()
}

fn default_grpc_port() -> u16 {
    50051
}

fn default_grpc_ignored_paths() -> String {
    "/grpc.reflection.".to_string()
}

fn default_grpc_slow_request_ms() -> u64 {
    500
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "router_manager".to_string()
}

fn default_postgres_username() -> String {
    "postgres".to_string()
}

fn default_postgres_password() -> String {
    "postgres".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    10
}

fn default_postgres_pool_timeout_secs() -> u64 {
    5
}

fn default_postgres_migrations_dir() -> String {
    "crates/router_manager/migrations/postgres".to_string()
}

fn default_postgres_goose_binary_path() -> String {
    "goose".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_connection_timeout_ms() -> u64 {
    2_000
}

fn default_redis_response_timeout_ms() -> u64 {
    500
}

fn default_redis_router_ttl_secs() -> u64 {
    86_400
}

fn default_redis_command_ttl_secs() -> u64 {
    86_400
}

fn default_closer_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("ROUTER_MANAGER"))
            .build()?
            .try_deserialize()
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
            pool_timeout_secs: self.postgres_pool_timeout_secs,
        }
    }

    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig {
            url: self.redis_url.clone(),
            connection_timeout_ms: self.redis_connection_timeout_ms,
            response_timeout_ms: self.redis_response_timeout_ms,
            router_ttl_secs: self.redis_router_ttl_secs,
            command_ttl_secs: self.redis_command_ttl_secs,
        }
    }

    pub fn grpc_config(&self) -> GrpcServerConfig {
        let ignored_paths = self
            .grpc_ignored_paths
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        GrpcServerConfig {
            host: self.grpc_host.clone(),
            port: self.grpc_port,
            logging_config: GrpcLoggingConfig {
                ignored_paths,
                slow_request_threshold: Duration::from_millis(self.grpc_slow_request_ms),
            },
        }
    }

    pub fn closer_timeout(&self) -> Duration {
        Duration::from_secs(self.closer_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-wide; tests touching them run serially
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::remove_var("ROUTER_MANAGER_LOG_LEVEL");
        std::env::remove_var("ROUTER_MANAGER_GRPC_PORT");

        let config = ServiceConfig::from_env().unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.grpc_port, 50051);
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.postgres_config().database, "router_manager");
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::set_var("ROUTER_MANAGER_LOG_LEVEL", "debug");
        std::env::set_var("ROUTER_MANAGER_GRPC_PORT", "6000");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.grpc_port, 6000);

        std::env::remove_var("ROUTER_MANAGER_LOG_LEVEL");
        std::env::remove_var("ROUTER_MANAGER_GRPC_PORT");
    }

    #[test]
    fn test_ignored_paths_are_split_and_trimmed() {
        let _lock = TEST_LOCK.lock().unwrap();
        let mut config = ServiceConfig::from_env().unwrap();
        config.grpc_ignored_paths = "/grpc.reflection., /grpc.health. ,".to_string();

        let grpc = config.grpc_config();

        assert_eq!(
            grpc.logging_config.ignored_paths,
            vec!["/grpc.reflection.", "/grpc.health."]
        );
    }

    #[test]
    fn test_redis_config_carries_ttls() {
        let _lock = TEST_LOCK.lock().unwrap();
        let mut config = ServiceConfig::from_env().unwrap();
        config.redis_command_ttl_secs = 60;

        let redis = config.redis_config();

        assert_eq!(redis.command_ttl_secs, 60);
        assert_eq!(redis.router_ttl_secs, 86_400);
    }
}
