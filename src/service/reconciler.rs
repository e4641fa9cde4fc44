use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::db::ReconcileStore;
use crate::error::{ReconcileError, Result};
use crate::models::{
    AggregateSummary, Barcode, CourierCount, LedgerCounts, Manifest, ManifestDate, ManifestItem,
    ManifestSummary, ScanOutcome, ScanRecord, UploadMeta,
};
use crate::service::{CourierDistribution, ManifestCache, MatchingEngine, ReadCaches, SummaryService};

/// 对账服务: 对外暴露的全部操作
///
/// 日期与条码以调用方原始字符串传入, 在这里统一校验.
pub struct ReconcileService {
    store: Arc<dyn ReconcileStore>,
    caches: Arc<ReadCaches>,
    engine: MatchingEngine,
}

impl ReconcileService {
    pub fn new(store: Arc<dyn ReconcileStore>, ttl: Duration, snapshot_path: Option<PathBuf>) -> Self {
        let caches = Arc::new(ReadCaches {
            manifests: ManifestCache::new(store.clone(), ttl),
            couriers: CourierDistribution::new(ttl),
            summary: SummaryService::new(store.clone(), ttl, snapshot_path),
        });
        let engine = MatchingEngine::new(store.clone(), caches.clone());
        Self { store, caches, engine }
    }

    /// 导入器写入清单 (重新上传替换明细, 不清空计数)
    pub async fn upsert_manifest(
        &self,
        date: &str,
        items: &[ManifestItem],
        meta: &UploadMeta,
    ) -> Result<()> {
        let date = ManifestDate::parse(date)?;
        let result = self.store.upsert_manifest(date, items, meta).await;
        // 无论成败都失效: 失败的事务已回滚, 失效只会多一次回源
        self.caches.invalidate_date(date);
        result.map_err(ReconcileError::Persistence)?;
        tracing::info!(
            "清单已上传 {}: {} 条明细, {} 个唯一条码, 文件 {}",
            date, items.len(), meta.unique_barcode_count, meta.source_file_name
        );
        Ok(())
    }

    pub async fn get_manifest(&self, date: &str) -> Result<Manifest> {
        let date = ManifestDate::parse(date)?;
        let manifest = self.caches.manifests.require(date).await?;
        Ok(Manifest::clone(&manifest))
    }

    pub async fn scan(&self, date: &str, barcode: &str) -> Result<ScanOutcome> {
        let date = ManifestDate::parse(date)?;
        let barcode = Barcode::parse(barcode)?;
        self.engine.scan(date, &barcode).await
    }

    pub async fn get_summary(&self, force_refresh: bool) -> Result<AggregateSummary> {
        self.caches.summary.get_summary(force_refresh).await
    }

    pub async fn courier_counts(&self, date: &str) -> Result<Vec<CourierCount>> {
        let date = ManifestDate::parse(date)?;
        let counts = self.caches.couriers.counts(date, &self.caches.manifests).await?;
        Ok(counts.as_ref().clone())
    }

    /// 删除单日清单及全部流水
    pub async fn delete_manifest(&self, date: &str) -> Result<()> {
        let date = ManifestDate::parse(date)?;
        let existed = self
            .store
            .delete_manifest(date)
            .await
            .map_err(ReconcileError::Persistence)?;
        self.caches.invalidate_date(date);
        if !existed {
            return Err(ReconcileError::ManifestNotFound(date));
        }
        Ok(())
    }

    /// 删除未匹配流水 (成功匹配的流水受保护)
    pub async fn delete_scan_record(&self, date: &str, barcode: &str) -> Result<Option<ManifestSummary>> {
        let date = ManifestDate::parse(date)?;
        let barcode = Barcode::parse(barcode)?;
        self.engine.delete_scan_record(date, &barcode).await
    }

    pub async fn delete_all(&self) -> Result<()> {
        let result = self.store.delete_all().await;
        self.caches.invalidate_all();
        result.map_err(ReconcileError::Persistence)?;
        tracing::warn!("所有清单与扫描流水已删除");
        Ok(())
    }

    /// 按流水重建单日计数 (修复计数漂移)
    pub async fn recompute_summary(&self, date: &str) -> Result<ManifestSummary> {
        let date = ManifestDate::parse(date)?;
        let summary = self
            .store
            .recompute_summary(date)
            .await
            .map_err(ReconcileError::Persistence)?;
        self.caches.invalidate_date(date);
        let summary = summary.ok_or(ReconcileError::ManifestNotFound(date))?;
        tracing::info!("重算计数 {}: {:?}", date, summary);
        Ok(summary)
    }

    /// 单日扫描流水
    pub async fn scan_history(&self, date: &str) -> Result<Vec<ScanRecord>> {
        let date = ManifestDate::parse(date)?;
        self.store
            .list_scans(date)
            .await
            .map_err(ReconcileError::StoreUnavailable)
    }

    /// 区间流水统计 (闭区间, 不走缓存)
    pub async fn ledger_summary(&self, from: Option<&str>, to: Option<&str>) -> Result<LedgerCounts> {
        let from = from.map(ManifestDate::parse).transpose()?;
        let to = to.map(ManifestDate::parse).transpose()?;
        self.store
            .ledger_counts(from, to)
            .await
            .map_err(ReconcileError::StoreUnavailable)
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store
            .health_check()
            .await
            .map_err(ReconcileError::StoreUnavailable)
    }
}
