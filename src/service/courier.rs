use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, TtlCache};
use crate::error::Result;
use crate::models::{CourierCount, ManifestDate, ManifestItem};
use crate::service::ManifestCache;

/// 缺失快递字段时的默认分组
pub const UNKNOWN_COURIER: &str = "Unknown";

/// 按快递分组计数, 数量降序; 数量相同时保持首次出现顺序
pub fn courier_counts(items: &[ManifestItem]) -> Vec<CourierCount> {
    let mut groups: IndexMap<&str, i64> = IndexMap::new();
    for item in items {
        let courier = item
            .courier
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(UNKNOWN_COURIER);
        *groups.entry(courier).or_insert(0) += 1;
    }

    let mut counts: Vec<CourierCount> = groups
        .into_iter()
        .map(|(courier, count)| CourierCount {
            courier: courier.to_string(),
            count,
        })
        .collect();
    // sort_by 是稳定排序
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}

/// 快递分布 (按日期缓存, 随清单写入一起失效)
pub struct CourierDistribution {
    cache: TtlCache<ManifestDate, Arc<Vec<CourierCount>>>,
}

impl CourierDistribution {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn counts(
        &self,
        date: ManifestDate,
        manifests: &ManifestCache,
    ) -> Result<Arc<Vec<CourierCount>>> {
        if let Some(hit) = self.cache.get(&date) {
            return Ok(hit);
        }
        let stamp = self.cache.stamp(&date);
        let manifest = manifests.require(date).await?;
        let counts = Arc::new(courier_counts(&manifest.items));
        self.cache.set_if_unchanged(date, counts.clone(), stamp);
        Ok(counts)
    }

    pub fn invalidate(&self, date: ManifestDate) {
        self.cache.invalidate(&date);
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}
