use std::time::Duration;

/// Connection and expiry settings for the fast-path store
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout_ms: u64,
    pub response_timeout_ms: u64,
    /// Lifetime of `router:{id}` and `router_serial:{serial}` entries
    pub router_ttl_secs: u64,
    /// Lifetime of a `command:{router_id}` list, refreshed on every write
    pub command_ttl_secs: u64,
}

impl RedisConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout_ms: 2_000,
            response_timeout_ms: 500,
            router_ttl_secs: 86_400,
            command_ttl_secs: 86_400,
        }
    }
}
