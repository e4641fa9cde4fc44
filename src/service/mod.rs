pub mod caches;
pub mod courier;
pub mod manifest_cache;
pub mod matcher;
pub mod reconciler;
pub mod summary;

pub use caches::ReadCaches;
pub use courier::{courier_counts, CourierDistribution};
pub use manifest_cache::ManifestCache;
pub use matcher::MatchingEngine;
pub use reconciler::ReconcileService;
pub use summary::SummaryService;
