use crate::models::ManifestDate;
use crate::service::{CourierDistribution, ManifestCache, SummaryService};

/// 所有读缓存; 任何写路径结束后按日期整体失效
pub struct ReadCaches {
    pub manifests: ManifestCache,
    pub couriers: CourierDistribution,
    pub summary: SummaryService,
}

impl ReadCaches {
    pub fn invalidate_date(&self, date: ManifestDate) {
        self.manifests.invalidate(date);
        self.couriers.invalidate(date);
        self.summary.invalidate();
        tracing::debug!("caches invalidated for {}", date);
    }

    pub fn invalidate_all(&self) {
        self.manifests.clear();
        self.couriers.clear();
        self.summary.invalidate();
        tracing::debug!("all caches cleared");
    }
}
