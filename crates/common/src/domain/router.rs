use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use uuid::Uuid;

/// A physical router known to the fleet.
///
/// `serial_number` identifies the device; `id` is the canonical identity minted
/// on first registration and reused for every later registration of the same
/// serial number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    pub id: Uuid,
    pub serial_number: String,
    pub ip_address: Option<IpAddr>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Router {
    /// Build a router for a serial number that has never been registered
    pub fn new(serial_number: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            serial_number: serial_number.into(),
            ip_address: None,
            last_seen_at: Some(now),
            created_at: now,
        }
    }

    /// Copy of this router with the last-seen timestamp refreshed
    pub fn seen_at(mut self, now: DateTime<Utc>) -> Self {
        self.last_seen_at = Some(now);
        self
    }
}

/// Persistence surface for routers.
///
/// Implemented by both the durable store and the fast-path store. `save_router`
/// is an upsert keyed by serial number and returns the canonical row.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RouterStore: Send + Sync {
    /// Upsert a router by serial number, returning the stored record
    async fn save_router(&self, router: &Router) -> DomainResult<Router>;

    /// Look a router up by its external identifier
    async fn find_router(&self, id: &str) -> DomainResult<Option<Router>>;

    /// Look a router up by serial number
    async fn find_router_by_serial(&self, serial_number: &str) -> DomainResult<Option<Router>>;
}
