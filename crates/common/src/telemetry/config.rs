/// Service identity and level for the global subscriber
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>, log_level: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            log_level: log_level.into(),
        }
    }
}
