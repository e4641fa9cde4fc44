#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::Utc;
use rts_reconcile::models::{ItemStatus, ManifestItem, UploadMeta};
use rts_reconcile::{MemoryStore, ReconcileService};
use std::sync::Arc;
use std::time::Duration;

pub const DATE: &str = "2025-01-14";

pub fn item(barcode: &str, name: &str, courier: Option<&str>) -> ManifestItem {
    ManifestItem {
        barcode: barcode.to_string(),
        product_name: name.to_string(),
        quantity: 2,
        price: BigDecimal::from(500),
        courier: courier.map(str::to_string),
        status: ItemStatus::Pending,
        rts_date_raw: Some(DATE.to_string()),
        scanned_at: None,
    }
}

pub fn meta_for(items: &[ManifestItem]) -> UploadMeta {
    let mut unique: Vec<String> = items.iter().map(|i| i.barcode.to_lowercase()).collect();
    unique.sort();
    unique.dedup();
    UploadMeta {
        source_file_name: "rts_returns.xlsx".to_string(),
        uploaded_at: Utc::now(),
        unique_barcode_count: unique.len() as i64,
        item_count: items.len() as i64,
    }
}

/// 内存存储 + 5 分钟 TTL 的服务
pub fn service() -> (Arc<MemoryStore>, Arc<ReconcileService>) {
    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(ReconcileService::new(
        store.clone(),
        Duration::from_secs(300),
        None,
    ));
    (store, service)
}

pub async fn upload(service: &ReconcileService, date: &str, items: &[ManifestItem]) {
    service
        .upsert_manifest(date, items, &meta_for(items))
        .await
        .expect("upload manifest");
}

/// 2025-01-14 只有 WB1001 (qty 2, price 500)
pub async fn seeded() -> (Arc<MemoryStore>, Arc<ReconcileService>) {
    let (store, service) = service();
    upload(&service, DATE, &[item("WB1001", "Running Shoes", Some("J&T"))]).await;
    (store, service)
}
