pub mod manifest;
pub mod scan;
pub mod summary;

pub use manifest::{
    barcode_key, item_position, mark_item_matched, parse_origin_date, Barcode, ItemStatus,
    Manifest, ManifestDate, ManifestItem, ManifestRow, ManifestSummary, UploadMeta,
};
pub use scan::{
    NewScanRecord, ProductSnapshot, ScanAttempt, ScanCommit, ScanOutcome, ScanRecord, ScanRow,
    UnmatchedDelete,
};
pub use summary::{AggregateSummary, CourierCount, LedgerCounts};
