use crate::error::ReconcileError;
use crate::models::{ManifestItem, UploadMeta};
use crate::service::ReconcileService;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type AppState = Arc<ReconcileService>;

/// 请求体: 上传清单
#[derive(Debug, Deserialize)]
pub struct UpsertManifestRequest {
    pub items: Vec<ManifestItem>,
    pub upload_meta: UploadMeta,
}

/// 请求体: 扫描
#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub barcode: String,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// 通用响应体
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

fn ok_message(message: String) -> Response {
    (StatusCode::OK, Json(MessageResponse { success: true, message })).into_response()
}

/// 健康检查
pub async fn health_check(State(service): State<AppState>) -> Response {
    match service.health_check().await {
        Ok(()) => "OK".into_response(),
        Err(e) => e.into_response(),
    }
}

/// 上传清单 (导入器调用)
pub async fn upsert_manifest(
    State(service): State<AppState>,
    Path(date): Path<String>,
    Json(req): Json<UpsertManifestRequest>,
) -> Result<Response, ReconcileError> {
    service.upsert_manifest(&date, &req.items, &req.upload_meta).await?;
    Ok(ok_message(format!("Manifest {} saved with {} items", date, req.items.len())))
}

pub async fn get_manifest(
    State(service): State<AppState>,
    Path(date): Path<String>,
) -> Result<Response, ReconcileError> {
    let manifest = service.get_manifest(&date).await?;
    Ok(Json(manifest).into_response())
}

pub async fn delete_manifest(
    State(service): State<AppState>,
    Path(date): Path<String>,
) -> Result<Response, ReconcileError> {
    service.delete_manifest(&date).await?;
    Ok(ok_message(format!("Manifest {} deleted", date)))
}

pub async fn delete_all(State(service): State<AppState>) -> Result<Response, ReconcileError> {
    service.delete_all().await?;
    Ok(ok_message("All manifests and scans deleted".to_string()))
}

/// 扫描接口: 重复扫描返回 409, 结果体仍包含上次流水
pub async fn scan(
    State(service): State<AppState>,
    Path(date): Path<String>,
    Json(req): Json<ScanRequest>,
) -> Result<Response, ReconcileError> {
    let outcome = service.scan(&date, &req.barcode).await?;
    let status = if outcome.is_duplicate() {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)).into_response())
}

pub async fn scan_history(
    State(service): State<AppState>,
    Path(date): Path<String>,
) -> Result<Response, ReconcileError> {
    let scans = service.scan_history(&date).await?;
    Ok(Json(scans).into_response())
}

pub async fn delete_scan_record(
    State(service): State<AppState>,
    Path((date, barcode)): Path<(String, String)>,
) -> Result<Response, ReconcileError> {
    let summary = service.delete_scan_record(&date, &barcode).await?;
    Ok(Json(summary).into_response())
}

pub async fn courier_counts(
    State(service): State<AppState>,
    Path(date): Path<String>,
) -> Result<Response, ReconcileError> {
    let counts = service.courier_counts(&date).await?;
    Ok(Json(counts).into_response())
}

pub async fn recompute_summary(
    State(service): State<AppState>,
    Path(date): Path<String>,
) -> Result<Response, ReconcileError> {
    let summary = service.recompute_summary(&date).await?;
    Ok(Json(summary).into_response())
}

pub async fn get_summary(
    State(service): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Response, ReconcileError> {
    let summary = service.get_summary(query.force).await?;
    Ok(Json(summary).into_response())
}

pub async fn ledger_summary(
    State(service): State<AppState>,
    Query(query): Query<LedgerQuery>,
) -> Result<Response, ReconcileError> {
    let counts = service
        .ledger_summary(query.from.as_deref(), query.to.as_deref())
        .await?;
    Ok(Json(counts).into_response())
}
