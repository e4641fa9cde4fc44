use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Executor, Postgres};

use crate::models::{
    LedgerCounts, ManifestDate, ManifestItem, ManifestRow, ManifestSummary, NewScanRecord,
    ScanRow, UploadMeta,
};

const MANIFEST_COLUMNS: &str = r#"
    manifest_date, items, source_file_name, uploaded_at,
    unique_barcode_count, item_count, total_scanned, matched, unmatched
"#;

const SCAN_COLUMNS: &str = r#"
    id, scan_date, barcode, barcode_key, matched,
    product_name, product_qty, product_price,
    message, scanned_at, cross_date, original_date
"#;

/// 查询单日清单
pub async fn get_manifest<'e, E>(
    executor: E,
    date: ManifestDate,
) -> Result<Option<ManifestRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!("SELECT {MANIFEST_COLUMNS} FROM rts_manifests WHERE manifest_date = $1");
    sqlx::query_as::<_, ManifestRow>(&sql)
        .bind(date)
        .fetch_optional(executor)
        .await
}

/// 查询并锁定单日清单行 (事务内使用, 串行化同一日期的写入)
pub async fn lock_manifest<'e, E>(
    executor: E,
    date: ManifestDate,
) -> Result<Option<ManifestRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {MANIFEST_COLUMNS} FROM rts_manifests WHERE manifest_date = $1 FOR UPDATE"
    );
    sqlx::query_as::<_, ManifestRow>(&sql)
        .bind(date)
        .fetch_optional(executor)
        .await
}

/// 写入或替换清单明细 (不触碰计数列)
pub async fn upsert_manifest<'e, E>(
    executor: E,
    date: ManifestDate,
    items: &[ManifestItem],
    meta: &UploadMeta,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO rts_manifests (
            manifest_date, items, source_file_name, uploaded_at,
            unique_barcode_count, item_count
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (manifest_date) DO UPDATE
           SET items = EXCLUDED.items,
               source_file_name = EXCLUDED.source_file_name,
               uploaded_at = EXCLUDED.uploaded_at,
               unique_barcode_count = EXCLUDED.unique_barcode_count,
               item_count = EXCLUDED.item_count
        "#,
    )
    .bind(date)
    .bind(Json(items))
    .bind(&meta.source_file_name)
    .bind(meta.uploaded_at)
    .bind(meta.unique_barcode_count)
    .bind(meta.item_count)
    .execute(executor)
    .await?;
    Ok(())
}

/// 更新清单明细
pub async fn update_items<'e, E>(
    executor: E,
    date: ManifestDate,
    items: &[ManifestItem],
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("UPDATE rts_manifests SET items = $2 WHERE manifest_date = $1")
        .bind(date)
        .bind(Json(items))
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// 计数增量更新 (在 SQL 内自增, 不做读改写)
pub async fn apply_summary_delta<'e, E>(
    executor: E,
    date: ManifestDate,
    total_scanned: i64,
    matched: i64,
    unmatched: i64,
) -> Result<Option<ManifestSummary>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, ManifestSummary>(
        r#"
        UPDATE rts_manifests
           SET total_scanned = total_scanned + $2,
               matched = matched + $3,
               unmatched = unmatched + $4
         WHERE manifest_date = $1
        RETURNING total_scanned, matched, unmatched
        "#,
    )
    .bind(date)
    .bind(total_scanned)
    .bind(matched)
    .bind(unmatched)
    .fetch_optional(executor)
    .await
}

/// 按扫描流水重算单日计数
pub async fn recompute_summary<'e, E>(
    executor: E,
    date: ManifestDate,
) -> Result<Option<ManifestSummary>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, ManifestSummary>(
        r#"
        UPDATE rts_manifests m
           SET total_scanned = c.scanned,
               matched = c.matched,
               unmatched = c.unmatched
          FROM (
                SELECT count(*) AS scanned,
                       count(*) FILTER (WHERE matched) AS matched,
                       count(*) FILTER (WHERE NOT matched) AS unmatched
                  FROM rts_scans
                 WHERE scan_date = $1
               ) c
         WHERE m.manifest_date = $1
        RETURNING m.total_scanned, m.matched, m.unmatched
        "#,
    )
    .bind(date)
    .fetch_optional(executor)
    .await
}

/// 删除单日清单
pub async fn delete_manifest<'e, E>(executor: E, date: ManifestDate) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM rts_manifests WHERE manifest_date = $1")
        .bind(date)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// 删除单日全部扫描流水
pub async fn delete_scans_for_date<'e, E>(
    executor: E,
    date: ManifestDate,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM rts_scans WHERE scan_date = $1")
        .bind(date)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// 清空两张表
pub async fn truncate_all<'e, E>(executor: E) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("TRUNCATE rts_scans, rts_manifests RESTART IDENTITY")
        .execute(executor)
        .await?;
    Ok(())
}

/// 查询某条码的扫描流水 (成功匹配优先, 其次最新)
pub async fn find_scan<'e, E>(
    executor: E,
    date: ManifestDate,
    barcode_key: &str,
) -> Result<Option<ScanRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        r#"
        SELECT {SCAN_COLUMNS}
          FROM rts_scans
         WHERE scan_date = $1 AND barcode_key = $2
         ORDER BY matched DESC, scanned_at DESC, id DESC
         LIMIT 1
        "#
    );
    sqlx::query_as::<_, ScanRow>(&sql)
        .bind(date)
        .bind(barcode_key)
        .fetch_optional(executor)
        .await
}

/// 单日扫描流水 (按时间顺序)
pub async fn list_scans<'e, E>(executor: E, date: ManifestDate) -> Result<Vec<ScanRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {SCAN_COLUMNS} FROM rts_scans WHERE scan_date = $1 ORDER BY scanned_at, id"
    );
    sqlx::query_as::<_, ScanRow>(&sql)
        .bind(date)
        .fetch_all(executor)
        .await
}

/// 单日已成功匹配的条码键及匹配时间
pub async fn list_matched_keys<'e, E>(
    executor: E,
    date: ManifestDate,
) -> Result<Vec<(String, DateTime<Utc>)>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, (String, DateTime<Utc>)>(
        "SELECT barcode_key, scanned_at FROM rts_scans WHERE scan_date = $1 AND matched",
    )
    .bind(date)
    .fetch_all(executor)
    .await
}

/// 写入一条扫描流水, 返回 id
pub async fn insert_scan<'e, E>(executor: E, record: &NewScanRecord) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let product = record.product.as_ref();
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO rts_scans (
            scan_date, barcode, barcode_key, matched,
            product_name, product_qty, product_price,
            message, scanned_at, cross_date, original_date
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING id
        "#,
    )
    .bind(record.date)
    .bind(&record.barcode)
    .bind(&record.barcode_key)
    .bind(record.matched)
    .bind(product.map(|p| p.name.as_str()))
    .bind(product.map(|p| p.qty))
    .bind(product.map(|p| p.price.clone()))
    .bind(&record.message)
    .bind(record.timestamp)
    .bind(record.cross_date)
    .bind(record.original_date)
    .fetch_one(executor)
    .await
}

/// 删除某条码的未匹配流水
pub async fn delete_unmatched_scans<'e, E>(
    executor: E,
    date: ManifestDate,
    barcode_key: &str,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        "DELETE FROM rts_scans WHERE scan_date = $1 AND barcode_key = $2 AND NOT matched",
    )
    .bind(date)
    .bind(barcode_key)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// 统计扫描流水 (日期区间闭区间, 空表示不限)
pub async fn count_ledger<'e, E>(
    executor: E,
    from: Option<ManifestDate>,
    to: Option<ManifestDate>,
) -> Result<LedgerCounts, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, LedgerCounts>(
        r#"
        SELECT count(*) AS scanned,
               count(*) FILTER (WHERE matched) AS matched,
               count(*) FILTER (WHERE NOT matched) AS unmatched
          FROM rts_scans
         WHERE ($1::date IS NULL OR scan_date >= $1)
           AND ($2::date IS NULL OR scan_date <= $2)
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_one(executor)
    .await
}

/// 所有清单唯一条码数之和
pub async fn sum_unique_barcodes<'e, E>(executor: E) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(unique_barcode_count), 0)::BIGINT FROM rts_manifests",
    )
    .fetch_one(executor)
    .await
}
