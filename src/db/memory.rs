//! 内存存储: 本地运行与测试用.
//!
//! 每个写操作在同一把锁内完成, 等价于一次事务; 成功匹配的唯一性与
//! PostgreSQL 的 `uq_rts_scans_matched` 一致. 可注入读/写故障.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::db::ReconcileStore;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    mark_item_matched, LedgerCounts, Manifest, ManifestDate, ManifestItem, ManifestSummary,
    ScanAttempt, ScanCommit, ScanRecord, UnmatchedDelete, UploadMeta,
};

#[derive(Debug, Default)]
struct MemoryState {
    manifests: BTreeMap<ManifestDate, Manifest>,
    scans: Vec<ScanRecord>,
    next_scan_id: i64,
}

impl MemoryState {
    fn find_scan(&self, date: ManifestDate, key: &str) -> Option<&ScanRecord> {
        let mut candidates: Vec<&ScanRecord> = self
            .scans
            .iter()
            .filter(|s| s.date == date && s.barcode_key == key)
            .collect();
        candidates.sort_by(|a, b| {
            b.matched
                .cmp(&a.matched)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| b.id.cmp(&a.id))
        });
        candidates.into_iter().next()
    }

    fn remove_unmatched(&mut self, date: ManifestDate, key: &str) -> u64 {
        let before = self.scans.len();
        self.scans
            .retain(|s| !(s.date == date && s.barcode_key == key && !s.matched));
        (before - self.scans.len()) as u64
    }

    fn counts(&self, from: Option<ManifestDate>, to: Option<ManifestDate>) -> LedgerCounts {
        let mut counts = LedgerCounts::default();
        let in_range = |d: ManifestDate| from.map_or(true, |f| d >= f) && to.map_or(true, |t| d <= t);
        for scan in self.scans.iter().filter(|s| in_range(s.date)) {
            counts.scanned += 1;
            if scan.matched {
                counts.matched += 1;
            } else {
                counts.unmatched += 1;
            }
        }
        counts
    }
}

/// 内存版对账存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    manifest_loads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注入读故障
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// 注入写故障 (事务在任何修改之前失败)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 清单回源次数, 用于观察缓存命中
    pub fn manifest_loads(&self) -> usize {
        self.manifest_loads.load(Ordering::SeqCst)
    }

    fn check_read(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReconcileStore for MemoryStore {
    async fn load_manifest(&self, date: ManifestDate) -> StoreResult<Option<Manifest>> {
        self.check_read()?;
        self.manifest_loads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        Ok(state.manifests.get(&date).cloned())
    }

    async fn upsert_manifest(
        &self,
        date: ManifestDate,
        items: &[ManifestItem],
        meta: &UploadMeta,
    ) -> StoreResult<()> {
        self.check_write()?;
        let mut state = self.state.lock().await;

        let mut items = items.to_vec();
        let matched: Vec<_> = state
            .scans
            .iter()
            .filter(|s| s.date == date && s.matched)
            .map(|s| (s.barcode_key.clone(), s.timestamp))
            .collect();
        for (key, scanned_at) in &matched {
            mark_item_matched(&mut items, key, *scanned_at);
        }

        match state.manifests.get_mut(&date) {
            Some(existing) => {
                existing.items = items;
                existing.upload_meta = meta.clone();
            }
            None => {
                state.manifests.insert(
                    date,
                    Manifest {
                        date,
                        items,
                        upload_meta: meta.clone(),
                        summary: ManifestSummary::default(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn delete_manifest(&self, date: ManifestDate) -> StoreResult<bool> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        state.scans.retain(|s| s.date != date);
        Ok(state.manifests.remove(&date).is_some())
    }

    async fn delete_all(&self) -> StoreResult<()> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        state.manifests.clear();
        state.scans.clear();
        Ok(())
    }

    async fn find_scan(
        &self,
        date: ManifestDate,
        barcode_key: &str,
    ) -> StoreResult<Option<ScanRecord>> {
        self.check_read()?;
        let state = self.state.lock().await;
        Ok(state.find_scan(date, barcode_key).cloned())
    }

    async fn list_scans(&self, date: ManifestDate) -> StoreResult<Vec<ScanRecord>> {
        self.check_read()?;
        let state = self.state.lock().await;
        let mut scans: Vec<ScanRecord> =
            state.scans.iter().filter(|s| s.date == date).cloned().collect();
        scans.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(scans)
    }

    async fn commit_scan(&self, attempt: &ScanAttempt) -> StoreResult<ScanCommit> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let date = attempt.date;
        let key = attempt.barcode_key.as_str();

        // 所有校验在修改之前完成, 保证失败时无部分写入
        let Some(manifest) = state.manifests.get(&date) else {
            return Err(StoreError::NotFound(format!("manifest {date}")));
        };
        let record = attempt.resolve(manifest.find_item(key));
        if state.scans.iter().any(|s| s.date == date && s.barcode_key == key && s.matched) {
            return Err(StoreError::Conflict(format!(
                "matched scan already exists for {} on {}",
                attempt.barcode, date
            )));
        }

        let replaced = state.remove_unmatched(date, key);
        state.next_scan_id += 1;
        let id = state.next_scan_id;
        let stored = record.into_record(id);
        state.scans.push(stored.clone());

        let Some(manifest) = state.manifests.get_mut(&date) else {
            return Err(StoreError::NotFound(format!("manifest {date}")));
        };
        let replaced_count = replaced as i64;
        manifest.summary.total_scanned += 1 - replaced_count;
        manifest.summary.unmatched -= replaced_count;
        if stored.matched {
            mark_item_matched(&mut manifest.items, key, stored.timestamp);
            manifest.summary.matched += 1;
        } else {
            manifest.summary.unmatched += 1;
        }

        Ok(ScanCommit {
            record: stored,
            summary: manifest.summary,
            replaced_unmatched: replaced,
        })
    }

    async fn delete_unmatched_scan(
        &self,
        date: ManifestDate,
        barcode_key: &str,
    ) -> StoreResult<UnmatchedDelete> {
        self.check_write()?;
        let mut state = self.state.lock().await;

        match state.find_scan(date, barcode_key) {
            None => return Ok(UnmatchedDelete::NotFound),
            Some(scan) if scan.matched => return Ok(UnmatchedDelete::Matched(scan.clone())),
            Some(_) => {}
        }

        let removed = state.remove_unmatched(date, barcode_key) as i64;
        let summary = state.manifests.get_mut(&date).map(|manifest| {
            manifest.summary.total_scanned -= removed;
            manifest.summary.unmatched -= removed;
            manifest.summary
        });
        Ok(UnmatchedDelete::Deleted { summary })
    }

    async fn ledger_counts(
        &self,
        from: Option<ManifestDate>,
        to: Option<ManifestDate>,
    ) -> StoreResult<LedgerCounts> {
        self.check_read()?;
        let state = self.state.lock().await;
        Ok(state.counts(from, to))
    }

    async fn total_records(&self) -> StoreResult<i64> {
        self.check_read()?;
        let state = self.state.lock().await;
        Ok(state
            .manifests
            .values()
            .map(|m| m.upload_meta.unique_barcode_count)
            .sum())
    }

    async fn recompute_summary(&self, date: ManifestDate) -> StoreResult<Option<ManifestSummary>> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let counts = state.counts(Some(date), Some(date));
        Ok(state.manifests.get_mut(&date).map(|manifest| {
            manifest.summary = ManifestSummary {
                total_scanned: counts.scanned,
                matched: counts.matched,
                unmatched: counts.unmatched,
            };
            manifest.summary
        }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.check_read()
    }
}
