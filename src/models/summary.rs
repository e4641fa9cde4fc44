use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 基于扫描流水的计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromRow, Serialize, Deserialize)]
pub struct LedgerCounts {
    pub scanned: i64,
    pub matched: i64,
    pub unmatched: i64,
}

/// 全局汇总 (仪表盘用)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub total_records: i64,
    pub scanned: i64,
    pub matched: i64,
    pub unmatched: i64,
    pub computed_at: DateTime<Utc>,
    #[serde(default)]
    pub stale: bool,   // true 表示读取失败后返回的上次成功值
}

impl AggregateSummary {
    pub fn from_counts(total_records: i64, counts: LedgerCounts) -> Self {
        Self {
            total_records,
            scanned: counts.scanned,
            matched: counts.matched,
            unmatched: counts.unmatched,
            computed_at: Utc::now(),
            stale: false,
        }
    }
}

/// 快递分布
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierCount {
    pub courier: String,
    pub count: i64,
}
