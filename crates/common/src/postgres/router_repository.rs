use crate::domain::{DomainError, DomainResult, Router, RouterStore};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use tokio_postgres::Row;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Router row for PostgreSQL storage
#[derive(Debug, Clone)]
pub struct RouterRow {
    pub id: Uuid,
    pub serial_number: String,
    pub ip_address: Option<IpAddr>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Row> for RouterRow {
    fn from(row: &Row) -> Self {
        RouterRow {
            id: row.get(0),
            serial_number: row.get(1),
            ip_address: row.get(2),
            last_seen_at: row.get(3),
            created_at: row.get(4),
        }
    }
}

/// Convert database RouterRow to domain Router
impl From<RouterRow> for Router {
    fn from(row: RouterRow) -> Self {
        Router {
            id: row.id,
            serial_number: row.serial_number,
            ip_address: row.ip_address,
            last_seen_at: row.last_seen_at,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL implementation of RouterStore, the system of record for routers
#[derive(Clone)]
pub struct PostgresRouterRepository {
    client: PostgresClient,
}

impl PostgresRouterRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RouterStore for PostgresRouterRepository {
    #[instrument(skip(self, router), fields(router_id = %router.id, serial_number = %router.serial_number))]
    async fn save_router(&self, router: &Router) -> DomainResult<Router> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::PersistenceError)?;

        // A known serial number keeps its original id; only the volatile
        // columns are refreshed. RETURNING hands back the canonical row.
        let row = conn
            .query_one(
                "INSERT INTO routers (id, serial_number, ip_address, last_seen_at, created_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (serial_number) DO UPDATE SET
                     ip_address = COALESCE(EXCLUDED.ip_address, routers.ip_address),
                     last_seen_at = EXCLUDED.last_seen_at
                 RETURNING id, serial_number, ip_address, last_seen_at, created_at",
                &[
                    &router.id,
                    &router.serial_number,
                    &router.ip_address,
                    &router.last_seen_at,
                    &router.created_at,
                ],
            )
            .await
            .map_err(|e| DomainError::PersistenceError(e.into()))?;

        let stored: Router = RouterRow::from(&row).into();
        if stored.id != router.id {
            debug!(canonical_id = %stored.id, "serial number already registered, reusing identity");
        }

        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn find_router(&self, id: &str) -> DomainResult<Option<Router>> {
        let Ok(router_id) = Uuid::parse_str(id) else {
            debug!("router identifier is not a valid id");
            return Ok(None);
        };

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::PersistenceError)?;

        let row = conn
            .query_opt(
                "SELECT id, serial_number, ip_address, last_seen_at, created_at
                 FROM routers
                 WHERE id = $1",
                &[&router_id],
            )
            .await
            .map_err(|e| DomainError::PersistenceError(e.into()))?;

        Ok(row.map(|row| RouterRow::from(&row).into()))
    }

    #[instrument(skip(self))]
    async fn find_router_by_serial(&self, serial_number: &str) -> DomainResult<Option<Router>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::PersistenceError)?;

        let row = conn
            .query_opt(
                "SELECT id, serial_number, ip_address, last_seen_at, created_at
                 FROM routers
                 WHERE serial_number = $1",
                &[&serial_number],
            )
            .await
            .map_err(|e| DomainError::PersistenceError(e.into()))?;

        Ok(row.map(|row| RouterRow::from(&row).into()))
    }
}
