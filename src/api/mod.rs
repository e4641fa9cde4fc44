pub mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;

pub use handlers::AppState;

/// 构建路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/summary", get(handlers::get_summary))
        .route("/api/ledger/summary", get(handlers::ledger_summary))
        .route("/api/manifests", delete(handlers::delete_all))
        .route(
            "/api/manifests/:date",
            get(handlers::get_manifest)
                .put(handlers::upsert_manifest)
                .delete(handlers::delete_manifest),
        )
        .route("/api/manifests/:date/scan", post(handlers::scan))
        .route("/api/manifests/:date/scans", get(handlers::scan_history))
        .route(
            "/api/manifests/:date/scans/:barcode",
            delete(handlers::delete_scan_record),
        )
        .route("/api/manifests/:date/couriers", get(handlers::courier_counts))
        .route(
            "/api/manifests/:date/summary/recompute",
            post(handlers::recompute_summary),
        )
        .layer(ServiceBuilder::new())
        .with_state(state)
}
