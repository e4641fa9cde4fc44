use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;

use crate::error::ReconcileError;

/// 清单日期 (调用方本地日历日, 固定 YYYY-MM-DD, 不使用时间戳)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ManifestDate(NaiveDate);

impl ManifestDate {
    pub const FORMAT: &'static str = "%Y-%m-%d";

    /// 严格解析 YYYY-MM-DD
    pub fn parse(raw: &str) -> Result<Self, ReconcileError> {
        let trimmed = raw.trim();
        // chrono 的 %m/%d 接受单个数字, 这里要求固定宽度
        if trimmed.len() != 10 {
            return Err(ReconcileError::InvalidDate(raw.to_string()));
        }
        NaiveDate::parse_from_str(trimmed, Self::FORMAT)
            .map(Self)
            .map_err(|_| ReconcileError::InvalidDate(raw.to_string()))
    }
}

impl fmt::Display for ManifestDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

/// 扫描条码: 保留去空白后的原文, 另存小写键用于比对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barcode {
    raw: String,
    key: String,
}

impl Barcode {
    pub fn parse(raw: &str) -> Result<Self, ReconcileError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ReconcileError::InvalidBarcode);
        }
        Ok(Self {
            raw: trimmed.to_string(),
            key: barcode_key(trimmed),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// 条码比对键 (去空白 + 小写)
pub fn barcode_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Matched,
}

/// 清单明细 (由外部导入器生成)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub barcode: String,
    pub product_name: String,
    #[serde(default)]
    pub quantity: i32,
    #[serde(default = "zero_price")]
    pub price: BigDecimal,
    #[serde(default)]
    pub courier: Option<String>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub rts_date_raw: Option<String>,   // 原始退件日期文本, 格式不固定
    #[serde(default)]
    pub scanned_at: Option<DateTime<Utc>>,
}

fn zero_price() -> BigDecimal {
    BigDecimal::zero()
}

impl ManifestItem {
    /// 明细记录的来源日期 (解析 rts_date_raw, 解析失败视为未知)
    pub fn origin_date(&self) -> Option<ManifestDate> {
        self.rts_date_raw.as_deref().and_then(parse_origin_date)
    }
}

/// 宽松解析退件日期文本, 允许带时间后缀
pub fn parse_origin_date(raw: &str) -> Option<ManifestDate> {
    const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y"];

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    // ISO 时间戳: 2025-01-14T08:30:00
    if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(ManifestDate(ts.date()));
    }
    let date_part = trimmed.split_whitespace().next().unwrap_or(trimmed);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .map(ManifestDate)
}

/// 上传元信息 (导入器维护, 仅展示用)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadMeta {
    pub source_file_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub unique_barcode_count: i64,
    pub item_count: i64,
}

/// 清单冗余计数 (可由扫描流水重放得出)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromRow, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub total_scanned: i64,
    pub matched: i64,
    pub unmatched: i64,
}

/// 单日退件清单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub date: ManifestDate,
    pub items: Vec<ManifestItem>,
    pub upload_meta: UploadMeta,
    pub summary: ManifestSummary,
}

impl Manifest {
    /// 按比对键查找明细, 重复条码以列表中最后一条为准
    pub fn find_item(&self, key: &str) -> Option<&ManifestItem> {
        item_position(&self.items, key).map(|pos| &self.items[pos])
    }
}

/// 明细位置 (同键取最后一条)
pub fn item_position(items: &[ManifestItem], key: &str) -> Option<usize> {
    items.iter().rposition(|item| barcode_key(&item.barcode) == key)
}

/// 在明细中标记匹配, 与 `item_position` 选中同一条
pub fn mark_item_matched<'a>(
    items: &'a mut [ManifestItem],
    key: &str,
    scanned_at: DateTime<Utc>,
) -> Option<&'a ManifestItem> {
    let pos = item_position(items, key)?;
    let item = &mut items[pos];
    item.status = ItemStatus::Matched;
    item.scanned_at = Some(scanned_at);
    Some(&*item)
}

/// 清单主表行 (t: rts_manifests)
#[derive(Debug, Clone, FromRow)]
pub struct ManifestRow {
    pub manifest_date: ManifestDate,
    pub items: Json<Vec<ManifestItem>>,
    pub source_file_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub unique_barcode_count: i64,
    pub item_count: i64,
    pub total_scanned: i64,
    pub matched: i64,
    pub unmatched: i64,
}

impl From<ManifestRow> for Manifest {
    fn from(row: ManifestRow) -> Self {
        Self {
            date: row.manifest_date,
            items: row.items.0,
            upload_meta: UploadMeta {
                source_file_name: row.source_file_name,
                uploaded_at: row.uploaded_at,
                unique_barcode_count: row.unique_barcode_count,
                item_count: row.item_count,
            },
            summary: ManifestSummary {
                total_scanned: row.total_scanned,
                matched: row.matched,
                unmatched: row.unmatched,
            },
        }
    }
}
