use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, TtlCache};
use crate::db::ReconcileStore;
use crate::error::{ReconcileError, Result};
use crate::models::{Manifest, ManifestDate};

/// 清单读穿缓存: date -> 清单快照
///
/// 没有写入口: 所有修改经由存储完成, 之后调用 `invalidate`.
/// 回源失败直接报 `StoreUnavailable`, 过期条目不会被返回.
pub struct ManifestCache {
    store: Arc<dyn ReconcileStore>,
    entries: Arc<dyn Cache<ManifestDate, Arc<Manifest>>>,
}

impl ManifestCache {
    pub fn new(store: Arc<dyn ReconcileStore>, ttl: Duration) -> Self {
        Self::with_cache(store, Arc::new(TtlCache::new(ttl)))
    }

    pub fn with_cache(
        store: Arc<dyn ReconcileStore>,
        entries: Arc<dyn Cache<ManifestDate, Arc<Manifest>>>,
    ) -> Self {
        Self { store, entries }
    }

    /// 读取清单, 不存在返回 None (不缓存空结果)
    pub async fn get(&self, date: ManifestDate) -> Result<Option<Arc<Manifest>>> {
        if let Some(hit) = self.entries.get(&date) {
            tracing::debug!("manifest cache hit: {}", date);
            return Ok(Some(hit));
        }

        tracing::debug!("manifest cache miss: {}, loading from store", date);
        let stamp = self.entries.stamp(&date);
        let loaded = self
            .store
            .load_manifest(date)
            .await
            .map_err(ReconcileError::StoreUnavailable)?;

        let Some(manifest) = loaded else {
            return Ok(None);
        };

        let manifest = Arc::new(manifest);
        if !self.entries.set_if_unchanged(date, manifest.clone(), stamp) {
            tracing::debug!("manifest {} invalidated during reload, not caching", date);
        }
        Ok(Some(manifest))
    }

    /// 读取清单, 不存在报 `ManifestNotFound`
    pub async fn require(&self, date: ManifestDate) -> Result<Arc<Manifest>> {
        self.get(date)
            .await?
            .ok_or(ReconcileError::ManifestNotFound(date))
    }

    pub fn invalidate(&self, date: ManifestDate) {
        self.entries.invalidate(&date);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{ManifestItem, UploadMeta};
    use chrono::Utc;

    fn date() -> ManifestDate {
        ManifestDate::parse("2025-01-14").unwrap()
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let item: ManifestItem =
            serde_json::from_str(r#"{"barcode":"WB1001","product_name":"Shoes"}"#).unwrap();
        let meta = UploadMeta {
            source_file_name: "rts.xlsx".to_string(),
            uploaded_at: Utc::now(),
            unique_barcode_count: 1,
            item_count: 1,
        };
        store.upsert_manifest(date(), &[item], &meta).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let store = seeded_store().await;
        let cache = ManifestCache::new(store.clone(), Duration::from_secs(60));

        cache.require(date()).await.unwrap();
        cache.require(date()).await.unwrap();
        assert_eq!(store.manifest_loads(), 1);

        cache.invalidate(date());
        cache.require(date()).await.unwrap();
        assert_eq!(store.manifest_loads(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_reloads() {
        let store = seeded_store().await;
        let cache = ManifestCache::new(store.clone(), Duration::from_millis(10));

        cache.require(date()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        cache.require(date()).await.unwrap();
        assert_eq!(store.manifest_loads(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_not_masked_by_stale_entry() {
        let store = seeded_store().await;
        let cache = ManifestCache::new(store.clone(), Duration::from_millis(10));
        cache.require(date()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        store.set_fail_reads(true);
        let err = cache.require(date()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let store = Arc::new(MemoryStore::new());
        let cache = ManifestCache::new(store, Duration::from_secs(60));
        let err = cache.require(date()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::ManifestNotFound(d) if d == date()));
    }
}
