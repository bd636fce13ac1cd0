use crate::domain::{DomainError, DomainResult, Router, RouterStore};
use crate::redis::RedisClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{debug, instrument};
use uuid::Uuid;

pub(crate) fn router_key(id: &str) -> String {
    format!("router:{}", id)
}

pub(crate) fn router_serial_key(serial_number: &str) -> String {
    format!("router_serial:{}", serial_number)
}

/// JSON form of a router in the fast-path store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedRouter {
    pub id: Uuid,
    pub serial_number: String,
    pub ip_address: Option<IpAddr>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Router> for CachedRouter {
    fn from(router: &Router) -> Self {
        CachedRouter {
            id: router.id,
            serial_number: router.serial_number.clone(),
            ip_address: router.ip_address,
            last_seen_at: router.last_seen_at,
            created_at: router.created_at,
        }
    }
}

impl From<CachedRouter> for Router {
    fn from(cached: CachedRouter) -> Self {
        Router {
            id: cached.id,
            serial_number: cached.serial_number,
            ip_address: cached.ip_address,
            last_seen_at: cached.last_seen_at,
            created_at: cached.created_at,
        }
    }
}

/// Redis implementation of RouterStore.
///
/// Every write refreshes the entry TTL. All failures surface as
/// `DomainError::CacheWarning`.
#[derive(Clone)]
pub struct RedisRouterRepository {
    client: RedisClient,
    ttl_secs: u64,
}

impl RedisRouterRepository {
    pub fn new(client: RedisClient, ttl_secs: u64) -> Self {
        Self { client, ttl_secs }
    }

    async fn get_router(&self, id: &str) -> anyhow::Result<Option<Router>> {
        let mut conn = self.client.connection();
        let raw: Option<String> = self
            .client
            .timed(::redis::cmd("GET").arg(router_key(id)).query_async(&mut conn))
            .await?;

        match raw {
            Some(json) => {
                let cached: CachedRouter = serde_json::from_str(&json)?;
                Ok(Some(cached.into()))
            }
            None => Ok(None),
        }
    }

    async fn get_router_id_by_serial(&self, serial_number: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.client.connection();
        let id: Option<String> = self
            .client
            .timed(
                ::redis::cmd("GET")
                    .arg(router_serial_key(serial_number))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(id)
    }

    async fn put_router(&self, router: &Router) -> anyhow::Result<()> {
        let json = serde_json::to_string(&CachedRouter::from(router))?;
        let mut conn = self.client.connection();

        let _: () = self
            .client
            .timed(
                ::redis::pipe()
                    .atomic()
                    .cmd("SET")
                    .arg(router_key(&router.id.to_string()))
                    .arg(json)
                    .arg("EX")
                    .arg(self.ttl_secs)
                    .ignore()
                    .cmd("SET")
                    .arg(router_serial_key(&router.serial_number))
                    .arg(router.id.to_string())
                    .arg("EX")
                    .arg(self.ttl_secs)
                    .ignore()
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RouterStore for RedisRouterRepository {
    #[instrument(skip(self, router), fields(router_id = %router.id, serial_number = %router.serial_number))]
    async fn save_router(&self, router: &Router) -> DomainResult<Router> {
        let result: anyhow::Result<Router> = async {
            // Same upsert rule as the store of record: a cached serial number
            // keeps its identity and only the volatile fields move
            let existing = match self.get_router_id_by_serial(&router.serial_number).await? {
                Some(id) if id != router.id.to_string() => self.get_router(&id).await?,
                _ => None,
            };

            let stored = match existing {
                Some(mut existing) => {
                    if router.ip_address.is_some() {
                        existing.ip_address = router.ip_address;
                    }
                    existing.last_seen_at = router.last_seen_at;
                    existing
                }
                None => router.clone(),
            };

            self.put_router(&stored).await?;
            Ok(stored)
        }
        .await;

        let stored = result.map_err(DomainError::CacheWarning)?;
        debug!("cached router");
        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn find_router(&self, id: &str) -> DomainResult<Option<Router>> {
        self.get_router(id).await.map_err(DomainError::CacheWarning)
    }

    #[instrument(skip(self))]
    async fn find_router_by_serial(&self, serial_number: &str) -> DomainResult<Option<Router>> {
        let result: anyhow::Result<Option<Router>> = async {
            match self.get_router_id_by_serial(serial_number).await? {
                Some(id) => self.get_router(&id).await,
                None => Ok(None),
            }
        }
        .await;

        result.map_err(DomainError::CacheWarning)
    }
}
