//! 全局汇总服务.
//!
//! 与清单缓存相反, 这里优先可用性: 读取失败时返回最近一次成功计算的值
//! (内存中没有时读取落盘快照), 并标记 `stale`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::cache::{Cache, TtlCache};
use crate::db::ReconcileStore;
use crate::error::{ReconcileError, Result, StoreError};
use crate::models::AggregateSummary;

pub struct SummaryService {
    store: Arc<dyn ReconcileStore>,
    cache: TtlCache<(), AggregateSummary>,
    last_good: RwLock<Option<AggregateSummary>>,
    snapshot_path: Option<PathBuf>,
}

impl SummaryService {
    pub fn new(store: Arc<dyn ReconcileStore>, ttl: Duration, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            store,
            cache: TtlCache::new(ttl),
            last_good: RwLock::new(None),
            snapshot_path,
        }
    }

    /// 获取全局汇总; `force_refresh` 跳过缓存直接重算
    pub async fn get_summary(&self, force_refresh: bool) -> Result<AggregateSummary> {
        if !force_refresh {
            if let Some(hit) = self.cache.get(&()) {
                tracing::debug!("summary cache hit");
                return Ok(hit);
            }
        }

        let stamp = self.cache.stamp(&());
        match self.compute().await {
            Ok(summary) => {
                self.cache.set_if_unchanged((), summary.clone(), stamp);
                self.remember(&summary).await;
                Ok(summary)
            }
            Err(e) => {
                tracing::warn!("汇总计算失败, 尝试返回上次成功值: {}", e);
                match self.fallback().await {
                    Some(mut summary) => {
                        summary.stale = true;
                        Ok(summary)
                    }
                    None => Err(ReconcileError::StoreUnavailable(e)),
                }
            }
        }
    }

    /// 数据变化后丢弃缓存值 (保留最近成功值用于降级)
    pub fn invalidate(&self) {
        self.cache.invalidate(&());
    }

    async fn compute(&self) -> std::result::Result<AggregateSummary, StoreError> {
        let (total_records, counts) =
            tokio::try_join!(self.store.total_records(), self.store.ledger_counts(None, None))?;
        Ok(AggregateSummary::from_counts(total_records, counts))
    }

    async fn remember(&self, summary: &AggregateSummary) {
        if let Ok(mut guard) = self.last_good.write() {
            *guard = Some(summary.clone());
        }
        if let Some(path) = &self.snapshot_path {
            if let Err(e) = write_snapshot(path, summary).await {
                tracing::warn!("写入汇总快照失败 {}: {}", path.display(), e);
            }
        }
    }

    async fn fallback(&self) -> Option<AggregateSummary> {
        let in_memory = self.last_good.read().ok().and_then(|guard| guard.clone());
        if in_memory.is_some() {
            return in_memory;
        }
        let path = self.snapshot_path.as_ref()?;
        match read_snapshot(path).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!("读取汇总快照失败 {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// 先写临时文件再改名, 避免读到半个文件
async fn write_snapshot(path: &Path, summary: &AggregateSummary) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let body = serde_json::to_vec_pretty(summary)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn read_snapshot(path: &Path) -> std::io::Result<AggregateSummary> {
    let body = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&body)?)
}
