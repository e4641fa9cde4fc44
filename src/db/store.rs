//! 清单存储 + 扫描流水的统一存储抽象.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::models::{
    LedgerCounts, Manifest, ManifestDate, ManifestItem, ManifestSummary, ScanAttempt,
    ScanCommit, ScanRecord, UnmatchedDelete, UploadMeta,
};

/// 对账存储
///
/// 所有写操作都是单事务: 失败时整体回滚, 不会留下部分写入.
#[async_trait]
pub trait ReconcileStore: Send + Sync {
    /// 读取单日清单
    async fn load_manifest(&self, date: ManifestDate) -> StoreResult<Option<Manifest>>;

    /// 写入或替换清单明细与上传信息, 计数保持不变.
    ///
    /// 流水中已成功匹配的条码会在新明细上重新标记为 matched.
    async fn upsert_manifest(
        &self,
        date: ManifestDate,
        items: &[ManifestItem],
        meta: &UploadMeta,
    ) -> StoreResult<()>;

    /// 删除单日清单及其全部流水, 返回清单是否存在
    async fn delete_manifest(&self, date: ManifestDate) -> StoreResult<bool>;

    async fn delete_all(&self) -> StoreResult<()>;

    /// 查询某条码的流水 (存在成功匹配时优先返回)
    async fn find_scan(&self, date: ManifestDate, barcode_key: &str)
        -> StoreResult<Option<ScanRecord>>;

    async fn list_scans(&self, date: ManifestDate) -> StoreResult<Vec<ScanRecord>>;

    /// 提交一次扫描:
    /// 1. 锁定清单行, 不存在返回 `NotFound`
    /// 2. 同一条码已有成功匹配时返回 `Conflict`
    /// 3. 按锁定后的明细判定命中 ([`ScanAttempt::resolve`])
    /// 4. 删除该条码的未匹配流水并回退计数; 命中时标记明细; 写入流水; 更新计数
    ///
    /// 命中判定与写入在同一把锁内, 不依赖调用方读到的清单快照.
    async fn commit_scan(&self, attempt: &ScanAttempt) -> StoreResult<ScanCommit>;

    /// 删除未匹配流水并回退计数; 成功匹配的流水不删除
    async fn delete_unmatched_scan(
        &self,
        date: ManifestDate,
        barcode_key: &str,
    ) -> StoreResult<UnmatchedDelete>;

    /// 统计流水, 日期为闭区间
    async fn ledger_counts(
        &self,
        from: Option<ManifestDate>,
        to: Option<ManifestDate>,
    ) -> StoreResult<LedgerCounts>;

    /// 所有清单 unique_barcode_count 之和
    async fn total_records(&self) -> StoreResult<i64>;

    /// 按流水重算并写回单日计数, 清单不存在返回 None
    async fn recompute_summary(&self, date: ManifestDate) -> StoreResult<Option<ManifestSummary>>;

    async fn health_check(&self) -> StoreResult<()>;
}
