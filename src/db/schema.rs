use sqlx::PgPool;

/// 建表语句 (幂等, 启动时执行)
///
/// 扫描流水不对清单做外键: 清单计数只要求能由流水重放得出.
/// `uq_rts_scans_matched` 保证同一日期同一条码最多一条成功匹配.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS rts_manifests (
        manifest_date        DATE PRIMARY KEY,
        items                JSONB NOT NULL DEFAULT '[]'::jsonb,
        source_file_name     TEXT NOT NULL,
        uploaded_at          TIMESTAMPTZ NOT NULL,
        unique_barcode_count BIGINT NOT NULL DEFAULT 0,
        item_count           BIGINT NOT NULL DEFAULT 0,
        total_scanned        BIGINT NOT NULL DEFAULT 0,
        matched              BIGINT NOT NULL DEFAULT 0,
        unmatched            BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rts_scans (
        id            BIGSERIAL PRIMARY KEY,
        scan_date     DATE NOT NULL,
        barcode       TEXT NOT NULL,
        barcode_key   TEXT NOT NULL,
        matched       BOOLEAN NOT NULL,
        product_name  TEXT,
        product_qty   INTEGER,
        product_price NUMERIC,
        message       TEXT NOT NULL,
        scanned_at    TIMESTAMPTZ NOT NULL,
        cross_date    BOOLEAN NOT NULL DEFAULT FALSE,
        original_date DATE
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_rts_scans_date_key
        ON rts_scans (scan_date, barcode_key)
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uq_rts_scans_matched
        ON rts_scans (scan_date, barcode_key)
        WHERE matched
    "#,
];

/// 执行建表
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Ensuring database schema...");
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Database schema ready");
    Ok(())
}
