//! 错误类型: 存储层 `StoreError` 与对外的 `ReconcileError`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::ManifestDate;

/// PostgreSQL unique_violation
const PG_UNIQUE_VIOLATION: &str = "23505";

/// 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 唯一约束冲突 (同一日期同一条码已存在成功匹配)
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(PG_UNIQUE_VIOLATION) {
                return StoreError::Conflict(db_err.message().to_string());
            }
        }
        StoreError::Database(err)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 对账引擎错误
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("barcode must not be empty")]
    InvalidBarcode,

    #[error("no manifest uploaded for {0}")]
    ManifestNotFound(ManifestDate),

    #[error("no scan record for {barcode} on {date}")]
    ScanRecordNotFound { date: ManifestDate, barcode: String },

    /// 成功匹配的流水不允许单独删除
    #[error("scan record for {barcode} on {date} is matched and cannot be removed")]
    MatchedRecordProtected { date: ManifestDate, barcode: String },

    /// 读取失败 (清单缓存回源失败), 不回退到过期数据
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// 事务失败, 已整体回滚, 由调用方决定是否重试
    #[error("persistence error: {0}")]
    Persistence(#[source] StoreError),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl ReconcileError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ReconcileError::InvalidDate(_) | ReconcileError::InvalidBarcode => StatusCode::BAD_REQUEST,
            ReconcileError::ManifestNotFound(_) | ReconcileError::ScanRecordNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ReconcileError::MatchedRecordProtected { .. } => StatusCode::CONFLICT,
            ReconcileError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ReconcileError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ReconcileError::InvalidDate(_) => "invalid_date",
            ReconcileError::InvalidBarcode => "invalid_barcode",
            ReconcileError::ManifestNotFound(_) => "manifest_not_found",
            ReconcileError::ScanRecordNotFound { .. } => "scan_record_not_found",
            ReconcileError::MatchedRecordProtected { .. } => "matched_record_protected",
            ReconcileError::StoreUnavailable(_) => "store_unavailable",
            ReconcileError::Persistence(_) => "persistence_error",
        }
    }
}

impl IntoResponse for ReconcileError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
