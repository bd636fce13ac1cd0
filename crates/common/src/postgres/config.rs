use serde::{Deserialize, Serialize};

/// PostgreSQL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_pool_size: usize,
    /// Seconds to wait for a pooled connection (or to open a new one)
    pub pool_timeout_secs: u64,
}

impl PostgresConfig {
    /// DSN in the form goose expects
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "router_manager".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            max_pool_size: 10,
            pool_timeout_secs: 5,
        }
    }
}
