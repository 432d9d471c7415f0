//! Agent service catalog and the shared read-through config cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use mf_core::DomainError;
use mf_store::DocStore;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogService {
    pub service_id: String,
    pub title: String,
    pub category: String,
    pub unit_price_cents: i64,
    pub currency: String,
    /// Stripe price handle; absent until staff configure one.
    #[serde(default)]
    pub price_id: Option<String>,
}

/// Built-in studio services, used until an operator overrides the
/// catalog document.
pub fn default_catalog() -> Vec<CatalogService> {
    vec![
        CatalogService {
            service_id: "shelf-firing".to_string(),
            title: "Half-shelf firing".to_string(),
            category: "firing".to_string(),
            unit_price_cents: 1_800,
            currency: "usd".to_string(),
            price_id: Some("price_shelf_firing".to_string()),
        },
        CatalogService {
            service_id: "whole-kiln-firing".to_string(),
            title: "Whole-kiln exclusive firing".to_string(),
            category: "firing".to_string(),
            unit_price_cents: 14_000,
            currency: "usd".to_string(),
            price_id: Some("price_whole_kiln".to_string()),
        },
        CatalogService {
            service_id: "glaze-consult".to_string(),
            title: "Glaze consultation".to_string(),
            category: "consulting".to_string(),
            unit_price_cents: 4_500,
            currency: "usd".to_string(),
            price_id: None,
        },
        CatalogService {
            service_id: "clay-reclaim".to_string(),
            title: "Clay reclaim bucket".to_string(),
            category: "materials".to_string(),
            unit_price_cents: 1_200,
            currency: "usd".to_string(),
            price_id: Some("price_clay_reclaim".to_string()),
        },
    ]
}

// ---------------------------------------------------------------------------
// TTL cache
// ---------------------------------------------------------------------------

/// Process-wide read-through cache with a short TTL. Concurrent
/// refreshes are tolerated: whichever finishes last wins, and readers
/// never see a torn value.
pub struct TtlCache<T: Clone> {
    ttl: Duration,
    slot: RwLock<Option<(Instant, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub async fn get_or_refresh<F, Fut>(&self, load: F) -> Result<T, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, DomainError>>,
    {
        {
            let slot = self.slot.read().await;
            if let Some((stamped, value)) = slot.as_ref() {
                if stamped.elapsed() < self.ttl {
                    return Ok(value.clone());
                }
            }
        }
        let fresh = load().await?;
        let mut slot = self.slot.write().await;
        *slot = Some((Instant::now(), fresh.clone()));
        Ok(fresh)
    }
}

/// Catalog cache: the `config/agentCatalog` document overrides the
/// built-in default.
pub struct CatalogCache {
    store: Arc<DocStore>,
    cache: TtlCache<Arc<Vec<CatalogService>>>,
}

const CONFIG_COLLECTION: &str = "config";
const CATALOG_DOC: &str = "agentCatalog";
const CATALOG_TTL: Duration = Duration::from_secs(30);

impl CatalogCache {
    pub fn new(store: Arc<DocStore>) -> Self {
        Self {
            store,
            cache: TtlCache::new(CATALOG_TTL),
        }
    }

    pub async fn services(&self) -> Result<Arc<Vec<CatalogService>>, DomainError> {
        let store = self.store.clone();
        self.cache
            .get_or_refresh(|| async move {
                let configured: Option<Vec<CatalogService>> =
                    store.get_doc(CONFIG_COLLECTION, CATALOG_DOC).await?;
                Ok(Arc::new(configured.unwrap_or_else(default_catalog)))
            })
            .await
    }

    pub async fn service(&self, service_id: &str) -> Result<CatalogService, DomainError> {
        let services = self.services().await?;
        services
            .iter()
            .find(|s| s.service_id == service_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("unknown service `{service_id}`")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_catalog_is_served_when_unconfigured() {
        let store = Arc::new(DocStore::open_in_memory().await.unwrap());
        let cache = CatalogCache::new(store);
        let services = cache.services().await.unwrap();
        assert!(services.iter().any(|s| s.service_id == "shelf-firing"));
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let store = Arc::new(DocStore::open_in_memory().await.unwrap());
        let cache = CatalogCache::new(store);
        assert!(cache.service("no-such-service").await.is_err());
    }

    #[tokio::test]
    async fn ttl_cache_serves_cached_value() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        let first = cache.get_or_refresh(|| async { Ok(1u32) }).await.unwrap();
        // The second loader would produce a different value; the cached
        // one must win inside the TTL.
        let second = cache.get_or_refresh(|| async { Ok(2u32) }).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn ttl_cache_refreshes_after_expiry() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(1));
        let _ = cache.get_or_refresh(|| async { Ok(1u32) }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let refreshed = cache.get_or_refresh(|| async { Ok(2u32) }).await.unwrap();
        assert_eq!(refreshed, 2);
    }
}
