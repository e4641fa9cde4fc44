use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::ReconcileStore;
use crate::error::{ReconcileError, Result, StoreError};
use crate::models::{
    Barcode, ManifestDate, ManifestSummary, ScanAttempt, ScanCommit, ScanOutcome, UnmatchedDelete,
};
use crate::service::ReadCaches;

type LockKey = (ManifestDate, String);

/// 按 (日期, 条码) 加锁, 不同条码/日期互不阻塞
#[derive(Default)]
struct KeyLocks {
    inner: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl KeyLocks {
    async fn acquire(&self, date: ManifestDate, key: &str) -> KeyLockGuard<'_> {
        let lock_key = (date, key.to_string());
        let handle = self
            .inner
            .entry(lock_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = handle.lock_owned().await;
        KeyLockGuard {
            locks: self,
            key: lock_key,
            guard: Some(guard),
        }
    }
}

struct KeyLockGuard<'a> {
    locks: &'a KeyLocks,
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // 没有其他等待者时回收
        self.locks
            .inner
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// 扫描匹配引擎
///
/// 查重 (流水) 与写入 (清单 + 流水) 在同一把按键锁内完成; 命中与否由存储在
/// 锁定清单行后判定. 跨进程的并发由存储层的唯一约束兜底, 冲突转为
/// `DuplicateRejected`. 引擎内部不重试.
pub struct MatchingEngine {
    store: Arc<dyn ReconcileStore>,
    caches: Arc<ReadCaches>,
    locks: KeyLocks,
}

impl MatchingEngine {
    pub fn new(store: Arc<dyn ReconcileStore>, caches: Arc<ReadCaches>) -> Self {
        Self {
            store,
            caches,
            locks: KeyLocks::default(),
        }
    }

    /// 扫描一个条码
    pub async fn scan(&self, date: ManifestDate, barcode: &Barcode) -> Result<ScanOutcome> {
        // 查重与提交都在按键锁内完成
        let _guard = self.locks.acquire(date, barcode.key()).await;

        // 1. 清单必须存在 (经缓存)
        self.caches.manifests.require(date).await?;

        // 2. 查重
        let existing = self
            .store
            .find_scan(date, barcode.key())
            .await
            .map_err(ReconcileError::StoreUnavailable)?;
        if let Some(previous) = existing {
            if previous.matched {
                tracing::warn!(
                    "重复扫描被拒绝: {} @ {}, 上次匹配时间 {}",
                    barcode.as_str(), date, previous.timestamp
                );
                return Ok(ScanOutcome::DuplicateRejected { previous });
            }
        }

        // 3. 提交: 存储锁定清单行后按当时的明细判定命中, 不使用缓存快照
        let attempt = ScanAttempt::new(date, barcode);
        match self.store.commit_scan(&attempt).await {
            Ok(commit) => {
                self.caches.invalidate_date(date);
                if commit.replaced_unmatched > 0 {
                    tracing::debug!(
                        "replaced {} unmatched scan(s) for {} @ {}",
                        commit.replaced_unmatched, barcode.as_str(), date
                    );
                }
                Ok(into_outcome(commit, barcode))
            }
            Err(StoreError::Conflict(detail)) => {
                // 其他进程抢先提交了成功匹配
                self.caches.invalidate_date(date);
                tracing::warn!("匹配写入冲突 {} @ {}: {}", barcode.as_str(), date, detail);
                let winner = self
                    .store
                    .find_scan(date, barcode.key())
                    .await
                    .map_err(ReconcileError::StoreUnavailable)?;
                match winner {
                    Some(previous) if previous.matched => {
                        Ok(ScanOutcome::DuplicateRejected { previous })
                    }
                    _ => Err(ReconcileError::Persistence(StoreError::Conflict(detail))),
                }
            }
            Err(StoreError::NotFound(detail)) => {
                // 读取后清单被删除
                self.caches.invalidate_date(date);
                tracing::warn!("扫描提交时清单已不存在 {} @ {}: {}", barcode.as_str(), date, detail);
                Err(ReconcileError::ManifestNotFound(date))
            }
            Err(e) => {
                tracing::error!("扫描事务失败 {} @ {}: {}", barcode.as_str(), date, e);
                Err(ReconcileError::Persistence(e))
            }
        }
    }

    /// 删除未匹配流水 (管理操作), 返回回退后的清单计数
    pub async fn delete_scan_record(
        &self,
        date: ManifestDate,
        barcode: &Barcode,
    ) -> Result<Option<ManifestSummary>> {
        let _guard = self.locks.acquire(date, barcode.key()).await;

        let result = self
            .store
            .delete_unmatched_scan(date, barcode.key())
            .await
            .map_err(ReconcileError::Persistence)?;

        match result {
            UnmatchedDelete::Deleted { summary } => {
                self.caches.invalidate_date(date);
                tracing::info!("删除未匹配流水: {} @ {}", barcode.as_str(), date);
                Ok(summary)
            }
            UnmatchedDelete::NotFound => Err(ReconcileError::ScanRecordNotFound {
                date,
                barcode: barcode.as_str().to_string(),
            }),
            UnmatchedDelete::Matched(_) => Err(ReconcileError::MatchedRecordProtected {
                date,
                barcode: barcode.as_str().to_string(),
            }),
        }
    }
}

fn into_outcome(commit: ScanCommit, barcode: &Barcode) -> ScanOutcome {
    let ScanCommit { record, summary, .. } = commit;
    match record.product.clone() {
        Some(product) => {
            tracing::info!(
                "扫描匹配: {} @ {}, 商品 {}, 跨日期: {}",
                barcode.as_str(), record.date, product.name, record.cross_date
            );
            ScanOutcome::Matched {
                product,
                cross_date: record.cross_date,
                record,
                summary,
            }
        }
        None => {
            tracing::info!("扫描未匹配: {} @ {}", barcode.as_str(), record.date);
            ScanOutcome::Unmatched { record, summary }
        }
    }
}
