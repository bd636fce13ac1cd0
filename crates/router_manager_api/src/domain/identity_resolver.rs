use chrono::Utc;
use common::domain::{DomainError, DomainResult, Router, RouterStore};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Maps external router identifiers and serial numbers to canonical routers.
///
/// Reads consult the fast path first and fall back to the store of record.
/// Writes go to the store of record first; its answer is the canonical router
/// and is then mirrored to the fast path. Fast-path failures are logged and
/// never fail a call.
pub struct RouterIdentityResolver {
    durable: Arc<dyn RouterStore>,
    fast_path: Arc<dyn RouterStore>,
}

impl RouterIdentityResolver {
    pub fn new(durable: Arc<dyn RouterStore>, fast_path: Arc<dyn RouterStore>) -> Self {
        Self { durable, fast_path }
    }

    /// Find a router by its external identifier. Writes nothing.
    #[instrument(skip(self))]
    pub async fn resolve(&self, identifier: &str) -> DomainResult<Router> {
        match self.fast_path.find_router(identifier).await {
            Ok(Some(router)) => {
                debug!("router served from fast path");
                return Ok(router);
            }
            Ok(None) => debug!("router not cached"),
            Err(e) => warn!(error = %e, "fast-path router lookup failed"),
        }

        match self.durable.find_router(identifier).await {
            Ok(Some(router)) => Ok(router),
            Ok(None) => Err(DomainError::RouterNotFound(identifier.to_string())),
            Err(e) => {
                warn!(error = %e, "durable router lookup failed");
                Err(DomainError::RouterNotFound(identifier.to_string()))
            }
        }
    }

    /// Upsert a router by serial number and return the canonical record
    #[instrument(skip(self, router), fields(router_id = %router.id, serial_number = %router.serial_number))]
    pub async fn register(&self, router: Router) -> DomainResult<Router> {
        let stored = self.durable.save_router(&router).await?;
        self.mirror(&stored).await;
        Ok(stored)
    }

    /// Resolve a serial number to its router, registering it if unseen.
    ///
    /// Known routers keep their identity and have last-seen refreshed.
    #[instrument(skip(self))]
    pub async fn resolve_or_register(&self, serial_number: &str) -> DomainResult<Router> {
        let cached = match self.fast_path.find_router_by_serial(serial_number).await {
            Ok(router) => router,
            Err(e) => {
                warn!(error = %e, "fast-path serial lookup failed");
                None
            }
        };

        let known = match cached {
            Some(router) => Some(router),
            None => self.durable.find_router_by_serial(serial_number).await?,
        };

        let now = Utc::now();
        let router = match known {
            Some(router) => router.seen_at(now),
            None => {
                info!("registering new router");
                Router::new(serial_number, now)
            }
        };

        self.register(router).await
    }

    /// Refresh a router's last-seen timestamp in both stores
    pub async fn touch(&self, router: Router) -> DomainResult<Router> {
        self.register(router.seen_at(Utc::now())).await
    }

    async fn mirror(&self, router: &Router) {
        if let Err(e) = self.fast_path.save_router(router).await {
            warn!(router_id = %router.id, error = %e, "failed to mirror router to fast path");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use common::domain::MockRouterStore;

    fn cache_down() -> DomainError {
        DomainError::CacheWarning(anyhow!("connection refused"))
    }

    fn resolver(durable: MockRouterStore, fast_path: MockRouterStore) -> RouterIdentityResolver {
        RouterIdentityResolver::new(Arc::new(durable), Arc::new(fast_path))
    }

    #[tokio::test]
    async fn test_resolve_prefers_fast_path() {
        let router = Router::new("SN1", Utc::now());
        let id = router.id.to_string();
        let cached = router.clone();

        let durable = MockRouterStore::new();
        let mut fast_path = MockRouterStore::new();
        fast_path
            .expect_find_router()
            .times(1)
            .return_once(move |_| Ok(Some(cached)));

        let resolved = resolver(durable, fast_path).resolve(&id).await.unwrap();

        assert_eq!(resolved, router);
    }

    #[tokio::test]
    async fn test_resolve_falls_back_without_writing_either_store() {
        let router = Router::new("SN1", Utc::now());
        let id = router.id.to_string();
        let stored = router.clone();

        let mut durable = MockRouterStore::new();
        durable
            .expect_find_router()
            .times(1)
            .return_once(move |_| Ok(Some(stored)));

        let mut fast_path = MockRouterStore::new();
        fast_path
            .expect_find_router()
            .times(1)
            .return_once(|_| Err(cache_down()));
        // No save_router expectation on either store: a write would panic

        let resolved = resolver(durable, fast_path).resolve(&id).await.unwrap();

        assert_eq!(resolved.id, router.id);
    }

    #[tokio::test]
    async fn test_resolve_unknown_router_is_not_found() {
        let mut durable = MockRouterStore::new();
        durable.expect_find_router().returning(|_| Ok(None));
        let mut fast_path = MockRouterStore::new();
        fast_path.expect_find_router().returning(|_| Ok(None));

        let result = resolver(durable, fast_path).resolve("missing").await;

        assert!(matches!(result, Err(DomainError::RouterNotFound(id)) if id == "missing"));
    }

    #[tokio::test]
    async fn test_resolve_reports_not_found_when_both_stores_fail() {
        let mut durable = MockRouterStore::new();
        durable
            .expect_find_router()
            .returning(|_| Err(DomainError::PersistenceError(anyhow!("pool exhausted"))));
        let mut fast_path = MockRouterStore::new();
        fast_path.expect_find_router().returning(|_| Err(cache_down()));

        let result = resolver(durable, fast_path).resolve("abc").await;

        assert!(matches!(result, Err(DomainError::RouterNotFound(_))));
    }

    #[tokio::test]
    async fn test_register_swallows_mirror_failure() {
        let router = Router::new("SN1", Utc::now());

        let mut durable = MockRouterStore::new();
        durable
            .expect_save_router()
            .times(1)
            .returning(|r| Ok(r.clone()));
        let mut fast_path = MockRouterStore::new();
        fast_path
            .expect_save_router()
            .times(1)
            .returning(|_| Err(cache_down()));

        let stored = resolver(durable, fast_path)
            .register(router.clone())
            .await
            .unwrap();

        assert_eq!(stored, router);
    }

    #[tokio::test]
    async fn test_register_does_not_mirror_after_durable_failure() {
        let mut durable = MockRouterStore::new();
        durable
            .expect_save_router()
            .times(1)
            .returning(|_| Err(DomainError::PersistenceError(anyhow!("disk full"))));
        // No expectation: mirroring would panic
        let fast_path = MockRouterStore::new();

        let result = resolver(durable, fast_path)
            .register(Router::new("SN1", Utc::now()))
            .await;

        assert!(matches!(result, Err(DomainError::PersistenceError(_))));
    }

    #[tokio::test]
    async fn test_register_mirrors_canonical_identity() {
        let original = Router::new("SN1", Utc::now());
        let original_id = original.id;
        let canonical = original.clone();

        let mut durable = MockRouterStore::new();
        durable
            .expect_save_router()
            .times(1)
            .return_once(move |_| Ok(canonical));
        let mut fast_path = MockRouterStore::new();
        fast_path
            .expect_save_router()
            .withf(move |r| r.id == original_id)
            .times(1)
            .returning(|r| Ok(r.clone()));

        // A fresh identity for a known serial number loses to the stored one
        let stored = resolver(durable, fast_path)
            .register(Router::new("SN1", Utc::now()))
            .await
            .unwrap();

        assert_eq!(stored.id, original_id);
    }

    #[tokio::test]
    async fn test_resolve_or_register_reuses_durable_identity() {
        let existing = Router::new("SN1", Utc::now());
        let existing_id = existing.id;
        let found = existing.clone();

        let mut durable = MockRouterStore::new();
        durable
            .expect_find_router_by_serial()
            .withf(|serial| serial == "SN1")
            .times(1)
            .return_once(move |_| Ok(Some(found)));
        durable
            .expect_save_router()
            .withf(move |r| r.id == existing_id)
            .times(1)
            .returning(|r| Ok(r.clone()));

        let mut fast_path = MockRouterStore::new();
        fast_path
            .expect_find_router_by_serial()
            .returning(|_| Ok(None));
        fast_path
            .expect_save_router()
            .returning(|r| Ok(r.clone()));

        let router = resolver(durable, fast_path)
            .resolve_or_register("SN1")
            .await
            .unwrap();

        assert_eq!(router.id, existing_id);
        assert!(router.last_seen_at >= existing.last_seen_at);
    }

    #[tokio::test]
    async fn test_resolve_or_register_mints_identity_for_unseen_serial() {
        let mut durable = MockRouterStore::new();
        durable
            .expect_find_router_by_serial()
            .returning(|_| Ok(None));
        durable
            .expect_save_router()
            .times(1)
            .returning(|r| Ok(r.clone()));

        let mut fast_path = MockRouterStore::new();
        fast_path
            .expect_find_router_by_serial()
            .returning(|_| Err(cache_down()));
        fast_path
            .expect_save_router()
            .returning(|r| Ok(r.clone()));

        let router = resolver(durable, fast_path)
            .resolve_or_register("SN9")
            .await
            .unwrap();

        assert_eq!(router.serial_number, "SN9");
        assert!(router.last_seen_at.is_some());
    }
}
