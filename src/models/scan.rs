use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::{Barcode, ManifestDate, ManifestItem, ManifestSummary};

/// 匹配时的商品快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: String,
    pub qty: i32,
    pub price: BigDecimal,
}

impl From<&ManifestItem> for ProductSnapshot {
    fn from(item: &ManifestItem) -> Self {
        Self {
            name: item.product_name.clone(),
            qty: item.quantity,
            price: item.price.clone(),
        }
    }
}

/// 扫描流水 (每次被接受的扫描一条)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: i64,
    pub date: ManifestDate,
    pub barcode: String,
    #[serde(skip)]
    pub barcode_key: String,
    #[serde(rename = "match")]
    pub matched: bool,
    pub product: Option<ProductSnapshot>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub cross_date: bool,
    pub original_date: Option<ManifestDate>,
}

/// 待写入的扫描流水 (id 由存储分配)
#[derive(Debug, Clone, PartialEq)]
pub struct NewScanRecord {
    pub date: ManifestDate,
    pub barcode: String,
    pub barcode_key: String,
    pub matched: bool,
    pub product: Option<ProductSnapshot>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub cross_date: bool,
    pub original_date: Option<ManifestDate>,
}

impl NewScanRecord {
    pub fn into_record(self, id: i64) -> ScanRecord {
        ScanRecord {
            id,
            date: self.date,
            barcode: self.barcode,
            barcode_key: self.barcode_key,
            matched: self.matched,
            product: self.product,
            message: self.message,
            timestamp: self.timestamp,
            cross_date: self.cross_date,
            original_date: self.original_date,
        }
    }
}

/// 一次扫描请求; 命中与否由存储在锁定清单后用 [`ScanAttempt::resolve`] 判定
#[derive(Debug, Clone, PartialEq)]
pub struct ScanAttempt {
    pub date: ManifestDate,
    pub barcode: String,
    pub barcode_key: String,
    pub timestamp: DateTime<Utc>,
}

impl ScanAttempt {
    pub fn new(date: ManifestDate, barcode: &Barcode) -> Self {
        Self {
            date,
            barcode: barcode.as_str().to_string(),
            barcode_key: barcode.key().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// 根据清单明细生成待写入流水, `item` 为 None 即未匹配
    pub fn resolve(&self, item: Option<&ManifestItem>) -> NewScanRecord {
        let Some(item) = item else {
            return NewScanRecord {
                date: self.date,
                barcode: self.barcode.clone(),
                barcode_key: self.barcode_key.clone(),
                matched: false,
                product: None,
                message: "Barcode not found in manifest".to_string(),
                timestamp: self.timestamp,
                cross_date: false,
                original_date: None,
            };
        };

        // 跨日期标记只描述明细来源; 来源日期未知时不标记
        let origin = item.origin_date().filter(|origin| *origin != self.date);
        let message = match origin {
            Some(origin) => format!("Matched: {} (from {})", item.product_name, origin),
            None => format!("Matched: {}", item.product_name),
        };
        NewScanRecord {
            date: self.date,
            barcode: self.barcode.clone(),
            barcode_key: self.barcode_key.clone(),
            matched: true,
            product: Some(ProductSnapshot::from(item)),
            message,
            timestamp: self.timestamp,
            cross_date: origin.is_some(),
            original_date: origin,
        }
    }
}

/// 扫描流水行 (t: rts_scans)
#[derive(Debug, Clone, FromRow)]
pub struct ScanRow {
    pub id: i64,
    pub scan_date: ManifestDate,
    pub barcode: String,
    pub barcode_key: String,
    pub matched: bool,
    pub product_name: Option<String>,
    pub product_qty: Option<i32>,
    pub product_price: Option<BigDecimal>,
    pub message: String,
    pub scanned_at: DateTime<Utc>,
    pub cross_date: bool,
    pub original_date: Option<ManifestDate>,
}

impl From<ScanRow> for ScanRecord {
    fn from(row: ScanRow) -> Self {
        let product = row.product_name.map(|name| ProductSnapshot {
            name,
            qty: row.product_qty.unwrap_or_default(),
            price: row.product_price.unwrap_or_else(|| BigDecimal::from(0)),
        });
        Self {
            id: row.id,
            date: row.scan_date,
            barcode: row.barcode,
            barcode_key: row.barcode_key,
            matched: row.matched,
            product,
            message: row.message,
            timestamp: row.scanned_at,
            cross_date: row.cross_date,
            original_date: row.original_date,
        }
    }
}

/// 一次扫描事务提交后的结果
#[derive(Debug, Clone)]
pub struct ScanCommit {
    pub record: ScanRecord,
    pub summary: ManifestSummary,
    pub replaced_unmatched: u64,   // 被替换掉的未匹配流水条数
}

/// 删除未匹配流水的结果
#[derive(Debug, Clone)]
pub enum UnmatchedDelete {
    Deleted { summary: Option<ManifestSummary> },
    NotFound,
    Matched(ScanRecord),
}

/// 扫描结果
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Matched {
        product: ProductSnapshot,
        cross_date: bool,
        record: ScanRecord,
        summary: ManifestSummary,
    },
    Unmatched {
        record: ScanRecord,
        summary: ManifestSummary,
    },
    /// 已存在成功匹配, 不做任何写入
    DuplicateRejected { previous: ScanRecord },
}

impl ScanOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, ScanOutcome::Matched { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, ScanOutcome::DuplicateRejected { .. })
    }
}
