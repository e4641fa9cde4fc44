//! Scan reconciliation behavior against the in-memory store.

mod common;

use bigdecimal::BigDecimal;
use common::{item, seeded, service, upload, DATE};
use rts_reconcile::models::{ItemStatus, ManifestSummary, ScanOutcome};
use rts_reconcile::{ReconcileError, StoreError};

fn summary(total_scanned: i64, matched: i64, unmatched: i64) -> ManifestSummary {
    ManifestSummary {
        total_scanned,
        matched,
        unmatched,
    }
}

#[tokio::test]
async fn test_match_duplicate_unmatched_walkthrough() {
    let (_store, service) = seeded().await;

    let first = service.scan(DATE, "WB1001").await.unwrap();
    let ScanOutcome::Matched { product, cross_date, record, .. } = first else {
        panic!("expected Matched, got {first:?}");
    };
    assert_eq!(product.qty, 2);
    assert_eq!(product.price, BigDecimal::from(500));
    assert!(!cross_date);
    assert!(record.matched);

    let repeat = service.scan(DATE, "WB1001").await.unwrap();
    let ScanOutcome::DuplicateRejected { previous } = repeat else {
        panic!("expected DuplicateRejected, got {repeat:?}");
    };
    assert_eq!(previous.timestamp, record.timestamp);
    assert_eq!(previous.id, record.id);

    let miss = service.scan(DATE, "WB9999").await.unwrap();
    assert!(matches!(miss, ScanOutcome::Unmatched { .. }));

    let manifest = service.get_manifest(DATE).await.unwrap();
    assert_eq!(manifest.summary, summary(2, 1, 1));
    assert_eq!(manifest.items.len(), 1, "unmatched scans never add items");
}

#[tokio::test]
async fn test_barcode_is_case_insensitive_and_trimmed() {
    let (_store, service) = seeded().await;

    assert!(service.scan(DATE, "  wb1001 ").await.unwrap().is_matched());
    assert!(service.scan(DATE, "WB1001").await.unwrap().is_duplicate());
}

#[tokio::test]
async fn test_exactly_one_matched_record_per_barcode() {
    let (_store, service) = seeded().await;
    for _ in 0..5 {
        service.scan(DATE, "WB1001").await.unwrap();
    }

    let history = service.scan_history(DATE).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].matched);
    assert_eq!(service.get_manifest(DATE).await.unwrap().summary, summary(1, 1, 0));
}

#[tokio::test]
async fn test_scan_without_manifest_is_not_found() {
    let (_store, service) = service();
    let err = service.scan(DATE, "WB1001").await.unwrap_err();
    assert!(matches!(err, ReconcileError::ManifestNotFound(_)));
}

#[tokio::test]
async fn test_invalid_inputs_are_rejected() {
    let (_store, service) = seeded().await;
    assert!(matches!(
        service.scan("14-01-2025", "WB1001").await.unwrap_err(),
        ReconcileError::InvalidDate(_)
    ));
    assert!(matches!(
        service.scan(DATE, "   ").await.unwrap_err(),
        ReconcileError::InvalidBarcode
    ));
}

#[tokio::test]
async fn test_unmatched_retry_after_reupload() {
    let (_store, service) = service();
    upload(&service, DATE, &[item("WB1001", "Running Shoes", None)]).await;

    let before = service.get_manifest(DATE).await.unwrap().summary;
    assert!(matches!(
        service.scan(DATE, "WB2002").await.unwrap(),
        ScanOutcome::Unmatched { .. }
    ));
    assert_eq!(service.get_manifest(DATE).await.unwrap().summary, summary(1, 0, 1));

    let after_delete = service.delete_scan_record(DATE, "WB2002").await.unwrap();
    assert_eq!(after_delete, Some(before));

    // 修正后重新上传, 条码出现在清单中
    upload(
        &service,
        DATE,
        &[
            item("WB1001", "Running Shoes", None),
            item("WB2002", "Backpack", None),
        ],
    )
    .await;

    assert!(service.scan(DATE, "WB2002").await.unwrap().is_matched());
    let manifest = service.get_manifest(DATE).await.unwrap();
    assert_eq!(manifest.summary.unmatched, before.unmatched);
    assert_eq!(manifest.summary, summary(1, 1, 0));
}

#[tokio::test]
async fn test_rescan_replaces_previous_unmatched_record() {
    let (_store, service) = service();
    upload(&service, DATE, &[item("WB1001", "Running Shoes", None)]).await;

    service.scan(DATE, "WB2002").await.unwrap();
    service.scan(DATE, "WB2002").await.unwrap();
    assert_eq!(service.scan_history(DATE).await.unwrap().len(), 1);
    assert_eq!(service.get_manifest(DATE).await.unwrap().summary, summary(1, 0, 1));

    upload(
        &service,
        DATE,
        &[
            item("WB1001", "Running Shoes", None),
            item("WB2002", "Backpack", None),
        ],
    )
    .await;
    assert!(service.scan(DATE, "WB2002").await.unwrap().is_matched());

    let history = service.scan_history(DATE).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].matched);
    assert_eq!(service.get_manifest(DATE).await.unwrap().summary, summary(1, 1, 0));
}

#[tokio::test]
async fn test_matched_record_cannot_be_deleted() {
    let (_store, service) = seeded().await;
    service.scan(DATE, "WB1001").await.unwrap();

    let err = service.delete_scan_record(DATE, "WB1001").await.unwrap_err();
    assert!(matches!(err, ReconcileError::MatchedRecordProtected { .. }));

    let err = service.delete_scan_record(DATE, "WB0000").await.unwrap_err();
    assert!(matches!(err, ReconcileError::ScanRecordNotFound { .. }));
}

#[tokio::test]
async fn test_manifest_read_reflects_scan_within_ttl() {
    let (store, service) = seeded().await;

    let cached = service.get_manifest(DATE).await.unwrap();
    assert_eq!(cached.items[0].status, ItemStatus::Pending);
    service.get_manifest(DATE).await.unwrap();
    let loads_before_scan = store.manifest_loads();

    service.scan(DATE, "WB1001").await.unwrap();

    let fresh = service.get_manifest(DATE).await.unwrap();
    assert_eq!(fresh.items[0].status, ItemStatus::Matched);
    assert!(fresh.items[0].scanned_at.is_some());
    assert_eq!(fresh.summary, summary(1, 1, 0));
    assert!(store.manifest_loads() > loads_before_scan);
}

#[tokio::test]
async fn test_reupload_keeps_summary_and_matched_status() {
    let (_store, service) = seeded().await;
    service.scan(DATE, "WB1001").await.unwrap();

    upload(
        &service,
        DATE,
        &[
            item("WB1001", "Running Shoes", None),
            item("WB3003", "Jacket", None),
        ],
    )
    .await;

    let manifest = service.get_manifest(DATE).await.unwrap();
    assert_eq!(manifest.summary, summary(1, 1, 0));
    assert_eq!(manifest.items[0].status, ItemStatus::Matched);
    assert_eq!(manifest.items[1].status, ItemStatus::Pending);
    assert!(service.scan(DATE, "WB1001").await.unwrap().is_duplicate());
}

#[tokio::test]
async fn test_cross_date_flag_uses_item_origin() {
    let (_store, service) = service();
    let mut carried_over = item("WB7007", "Lamp", None);
    carried_over.rts_date_raw = Some("13/01/2025".to_string());
    upload(&service, DATE, &[carried_over, item("WB1001", "Running Shoes", None)]).await;

    let ScanOutcome::Matched { cross_date, record, .. } = service.scan(DATE, "WB7007").await.unwrap()
    else {
        panic!("expected Matched");
    };
    assert!(cross_date);
    assert_eq!(record.original_date.unwrap().to_string(), "2025-01-13");

    let ScanOutcome::Matched { cross_date, .. } = service.scan(DATE, "WB1001").await.unwrap() else {
        panic!("expected Matched");
    };
    assert!(!cross_date);
}

#[tokio::test]
async fn test_duplicate_barcodes_resolve_to_last_item() {
    let (_store, service) = service();
    upload(
        &service,
        DATE,
        &[item("WB1", "Old Listing", None), item("wb1", "New Listing", None)],
    )
    .await;

    let ScanOutcome::Matched { product, .. } = service.scan(DATE, "WB1").await.unwrap() else {
        panic!("expected Matched");
    };
    assert_eq!(product.name, "New Listing");
    let manifest = service.get_manifest(DATE).await.unwrap();
    assert_eq!(manifest.items[0].status, ItemStatus::Pending);
    assert_eq!(manifest.items[1].status, ItemStatus::Matched);
}

#[tokio::test]
async fn test_persistence_failure_rolls_back_and_surfaces() {
    let (store, service) = seeded().await;
    service.get_manifest(DATE).await.unwrap();

    store.set_fail_writes(true);
    let err = service.scan(DATE, "WB1001").await.unwrap_err();
    assert!(matches!(err, ReconcileError::Persistence(StoreError::Unavailable(_))));
    store.set_fail_writes(false);

    assert!(service.scan_history(DATE).await.unwrap().is_empty());
    assert_eq!(service.get_manifest(DATE).await.unwrap().summary, summary(0, 0, 0));
    // 调用方重试
    assert!(service.scan(DATE, "WB1001").await.unwrap().is_matched());
}

#[tokio::test]
async fn test_store_unavailable_on_cache_miss() {
    let (store, service) = seeded().await;
    store.set_fail_reads(true);
    let err = service.get_manifest(DATE).await.unwrap_err();
    assert!(matches!(err, ReconcileError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_delete_manifest_removes_ledger_and_cache() {
    let (_store, service) = seeded().await;
    upload(&service, "2025-01-15", &[item("WB5005", "Hat", None)]).await;
    service.scan(DATE, "WB1001").await.unwrap();
    service.scan("2025-01-15", "WB5005").await.unwrap();
    service.get_manifest(DATE).await.unwrap();

    service.delete_manifest(DATE).await.unwrap();

    assert!(matches!(
        service.get_manifest(DATE).await.unwrap_err(),
        ReconcileError::ManifestNotFound(_)
    ));
    assert!(service.scan_history(DATE).await.unwrap().is_empty());
    assert_eq!(service.scan_history("2025-01-15").await.unwrap().len(), 1);
    assert!(matches!(
        service.delete_manifest(DATE).await.unwrap_err(),
        ReconcileError::ManifestNotFound(_)
    ));
}

#[tokio::test]
async fn test_delete_all_clears_everything() {
    let (_store, service) = seeded().await;
    service.scan(DATE, "WB1001").await.unwrap();
    service.get_summary(false).await.unwrap();
    service.courier_counts(DATE).await.unwrap();

    service.delete_all().await.unwrap();

    assert!(service.get_manifest(DATE).await.is_err());
    assert!(service.courier_counts(DATE).await.is_err());
    let totals = service.get_summary(false).await.unwrap();
    assert_eq!((totals.total_records, totals.scanned), (0, 0));
}

#[tokio::test]
async fn test_recompute_summary_matches_ledger() {
    let (_store, service) = seeded().await;
    service.scan(DATE, "WB1001").await.unwrap();
    service.scan(DATE, "WB8888").await.unwrap();
    service.scan(DATE, "WB9999").await.unwrap();

    let stored = service.get_manifest(DATE).await.unwrap().summary;
    let rebuilt = service.recompute_summary(DATE).await.unwrap();
    assert_eq!(stored, rebuilt);
    assert_eq!(rebuilt, summary(3, 1, 2));

    let ledger = service.ledger_summary(Some(DATE), Some(DATE)).await.unwrap();
    assert_eq!(ledger.scanned, rebuilt.total_scanned);
    assert_eq!(ledger.matched, rebuilt.matched);
    assert_eq!(ledger.unmatched, rebuilt.unmatched);

    assert!(matches!(
        service.recompute_summary("2030-01-01").await.unwrap_err(),
        ReconcileError::ManifestNotFound(_)
    ));
}

#[tokio::test]
async fn test_aggregate_summary_after_scans() {
    let (_store, service) = seeded().await;
    upload(
        &service,
        "2025-01-15",
        &[item("WB5005", "Hat", None), item("WB6006", "Scarf", None)],
    )
    .await;

    service.get_summary(false).await.unwrap();
    service.scan(DATE, "WB1001").await.unwrap();
    service.scan("2025-01-15", "WB5005").await.unwrap();
    service.scan("2025-01-15", "NOPE").await.unwrap();

    // 写入后缓存已失效, 不需要 force
    let totals = service.get_summary(false).await.unwrap();
    assert_eq!(totals.total_records, 3);
    assert_eq!(totals.scanned, 3);
    assert_eq!(totals.matched, 2);
    assert_eq!(totals.unmatched, 1);
    assert_eq!(totals.scanned, totals.matched + totals.unmatched);

    let day = service.ledger_summary(Some("2025-01-15"), None).await.unwrap();
    assert_eq!((day.scanned, day.matched, day.unmatched), (2, 1, 1));
}

#[tokio::test]
async fn test_courier_counts_refresh_after_reupload() {
    let (_store, service) = service();
    upload(
        &service,
        DATE,
        &[
            item("A1", "P", Some("LBC")),
            item("A2", "P", Some("J&T")),
            item("A3", "P", Some("LBC")),
        ],
    )
    .await;

    let counts = service.courier_counts(DATE).await.unwrap();
    assert_eq!(counts[0].courier, "LBC");
    assert_eq!(counts[0].count, 2);

    upload(
        &service,
        DATE,
        &[
            item("A1", "P", Some("J&T")),
            item("A2", "P", Some("J&T")),
            item("A3", "P", None),
        ],
    )
    .await;
    let counts = service.courier_counts(DATE).await.unwrap();
    assert_eq!(counts[0].courier, "J&T");
    assert_eq!(counts[0].count, 2);
    assert_eq!(counts[1].courier, "Unknown");
}
