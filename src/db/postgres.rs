use async_trait::async_trait;
use sqlx::PgPool;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::config::DatabaseConfig;
use crate::db::{create_pool, ensure_schema, queries, ReconcileStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    item_position, mark_item_matched, LedgerCounts, Manifest, ManifestDate, ManifestItem,
    ManifestSummary, ScanAttempt, ScanCommit, ScanRecord, UnmatchedDelete, UploadMeta,
};

/// PostgreSQL 存储
pub struct PgStore {
    pool: PgPool,
    tx_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, tx_timeout: Duration) -> Self {
        Self { pool, tx_timeout }
    }

    /// 建立连接池并确保表结构
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = create_pool(config).await?;
        ensure_schema(&pool).await?;
        Ok(Self::new(pool, Duration::from_secs(config.statement_timeout_secs)))
    }

    /// 事务整体超时控制
    async fn with_timeout<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.tx_timeout, fut).await {
            Ok(Ok(value)) => {
                tracing::debug!("✓ {} 完成, 耗时: {:?}", op, start.elapsed());
                Ok(value)
            }
            Ok(Err(e)) => {
                tracing::debug!("✗ {} 失败, 耗时: {:?}, 错误: {}", op, start.elapsed(), e);
                Err(e)
            }
            Err(_) => {
                tracing::error!("✗ {} 超时 (>{:?})", op, self.tx_timeout);
                Err(StoreError::Unavailable(format!("{op} timed out")))
            }
        }
    }

    async fn commit_scan_tx(&self, attempt: &ScanAttempt) -> StoreResult<ScanCommit> {
        let mut tx = self.pool.begin().await?;
        let date = attempt.date;
        let key = attempt.barcode_key.as_str();

        // 锁定清单行: 同一日期的提交在此串行, 命中判定以锁定后的明细为准
        let Some(row) = queries::lock_manifest(&mut *tx, date).await? else {
            return Err(StoreError::NotFound(format!("manifest {}", date)));
        };

        if let Some(existing) = queries::find_scan(&mut *tx, date, key).await? {
            if existing.matched {
                return Err(StoreError::Conflict(format!(
                    "matched scan already exists for {} on {}",
                    attempt.barcode, date
                )));
            }
        }

        let mut items = row.items.0;
        let record = attempt.resolve(item_position(&items, key).map(|pos| &items[pos]));

        let replaced = queries::delete_unmatched_scans(&mut *tx, date, key).await?;
        let replaced_count = replaced as i64;

        let (matched_delta, unmatched_delta) = if record.matched {
            mark_item_matched(&mut items, key, record.timestamp);
            queries::update_items(&mut *tx, date, &items).await?;
            (1, -replaced_count)
        } else {
            (0, 1 - replaced_count)
        };

        // 唯一索引兜底: 冲突在这里转为 StoreError::Conflict, 事务随 tx 丢弃回滚
        let id = queries::insert_scan(&mut *tx, &record).await?;

        let summary = queries::apply_summary_delta(
            &mut *tx,
            date,
            1 - replaced_count,
            matched_delta,
            unmatched_delta,
        )
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("manifest {}", date)))?;

        tx.commit().await?;

        Ok(ScanCommit {
            record: record.into_record(id),
            summary,
            replaced_unmatched: replaced,
        })
    }

    async fn delete_unmatched_tx(
        &self,
        date: ManifestDate,
        barcode_key: &str,
    ) -> StoreResult<UnmatchedDelete> {
        let mut tx = self.pool.begin().await?;

        let existing = queries::find_scan(&mut *tx, date, barcode_key).await?;
        match existing {
            None => return Ok(UnmatchedDelete::NotFound),
            Some(row) if row.matched => return Ok(UnmatchedDelete::Matched(row.into())),
            Some(_) => {}
        }

        let removed = queries::delete_unmatched_scans(&mut *tx, date, barcode_key).await? as i64;
        let summary = queries::apply_summary_delta(&mut *tx, date, -removed, 0, -removed).await?;

        tx.commit().await?;
        Ok(UnmatchedDelete::Deleted { summary })
    }

    async fn upsert_manifest_tx(
        &self,
        date: ManifestDate,
        items: &[ManifestItem],
        meta: &UploadMeta,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        // 重新上传时保留流水中的匹配状态
        let matched = queries::list_matched_keys(&mut *tx, date).await?;
        let mut items = items.to_vec();
        for (key, scanned_at) in &matched {
            mark_item_matched(&mut items, key, *scanned_at);
        }

        queries::upsert_manifest(&mut *tx, date, &items, meta).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_manifest_tx(&self, date: ManifestDate) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let scans = queries::delete_scans_for_date(&mut *tx, date).await?;
        let manifests = queries::delete_manifest(&mut *tx, date).await?;
        tx.commit().await?;
        tracing::info!("删除清单 {}: {} 行清单, {} 条流水", date, manifests, scans);
        Ok(manifests > 0)
    }
}

#[async_trait]
impl ReconcileStore for PgStore {
    async fn load_manifest(&self, date: ManifestDate) -> StoreResult<Option<Manifest>> {
        let row = queries::get_manifest(&self.pool, date).await?;
        Ok(row.map(Manifest::from))
    }

    async fn upsert_manifest(
        &self,
        date: ManifestDate,
        items: &[ManifestItem],
        meta: &UploadMeta,
    ) -> StoreResult<()> {
        self.with_timeout("upsert_manifest", self.upsert_manifest_tx(date, items, meta))
            .await
    }

    async fn delete_manifest(&self, date: ManifestDate) -> StoreResult<bool> {
        self.with_timeout("delete_manifest", self.delete_manifest_tx(date))
            .await
    }

    async fn delete_all(&self) -> StoreResult<()> {
        self.with_timeout("delete_all", async {
            queries::truncate_all(&self.pool).await.map_err(StoreError::from)
        })
        .await
    }

    async fn find_scan(
        &self,
        date: ManifestDate,
        barcode_key: &str,
    ) -> StoreResult<Option<ScanRecord>> {
        let row = queries::find_scan(&self.pool, date, barcode_key).await?;
        Ok(row.map(ScanRecord::from))
    }

    async fn list_scans(&self, date: ManifestDate) -> StoreResult<Vec<ScanRecord>> {
        let rows = queries::list_scans(&self.pool, date).await?;
        Ok(rows.into_iter().map(ScanRecord::from).collect())
    }

    async fn commit_scan(&self, attempt: &ScanAttempt) -> StoreResult<ScanCommit> {
        self.with_timeout("commit_scan", self.commit_scan_tx(attempt))
            .await
    }

    async fn delete_unmatched_scan(
        &self,
        date: ManifestDate,
        barcode_key: &str,
    ) -> StoreResult<UnmatchedDelete> {
        self.with_timeout("delete_unmatched_scan", self.delete_unmatched_tx(date, barcode_key))
            .await
    }

    async fn ledger_counts(
        &self,
        from: Option<ManifestDate>,
        to: Option<ManifestDate>,
    ) -> StoreResult<LedgerCounts> {
        Ok(queries::count_ledger(&self.pool, from, to).await?)
    }

    async fn total_records(&self) -> StoreResult<i64> {
        Ok(queries::sum_unique_barcodes(&self.pool).await?)
    }

    async fn recompute_summary(&self, date: ManifestDate) -> StoreResult<Option<ManifestSummary>> {
        self.with_timeout("recompute_summary", async {
            queries::recompute_summary(&self.pool, date)
                .await
                .map_err(StoreError::from)
        })
        .await
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use tokio::net::TcpListener;

    /// 接受连接但从不应答握手的服务端, 让取连接一直挂起
    async fn silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("postgres://rts:rts@{addr}/rts?sslmode=disable")
    }

    async fn hanging_store(tx_timeout: Duration) -> PgStore {
        let url = silent_server().await;
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(30))
            .connect_lazy(&url)
            .unwrap();
        PgStore::new(pool, tx_timeout)
    }

    #[tokio::test]
    async fn test_delete_all_is_bounded_by_operation_timeout() {
        let store = hanging_store(Duration::from_millis(50)).await;
        let err = store.delete_all().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(ref msg) if msg.contains("delete_all")));
    }

    #[tokio::test]
    async fn test_recompute_summary_is_bounded_by_operation_timeout() {
        let store = hanging_store(Duration::from_millis(50)).await;
        let date = ManifestDate::parse("2025-01-14").unwrap();
        let err = store.recompute_summary(date).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(ref msg) if msg.contains("recompute_summary")));
    }
}
