//! # Dispatch Service エラー定義
//!
//! Dispatch Service 固有のエラーと、HTTP レスポンスへの変換を定義する。
//!
//! 管理 API（通知の投入・照会）は RFC 9457 Problem Details 形式で
//! エラーを返す。ディスパッチエンドポイントだけは外部スケジューラとの
//! 契約により `{ "success": false, "error": … }` 形式を使う
//! （`handler::dispatch` を参照）。

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use notiflow_domain::{DomainError, notification::NotificationError};
use notiflow_infra::InfraError;
use notiflow_shared::ErrorResponse;
use thiserror::Error;

/// Dispatch Service で発生するエラー
#[derive(Debug, Error)]
pub enum ApiError {
    /// リソースが見つからない
    #[error("リソースが見つかりません: {0}")]
    NotFound(String),

    /// 不正なリクエスト
    #[error("不正なリクエスト: {0}")]
    BadRequest(String),

    /// 未知のテンプレート種別
    ///
    /// `type` に閉じた通知種別タグ以外の値が指定された。
    #[error("未知のテンプレート種別: {0}")]
    UnknownTemplateType(String),

    /// バリデーションエラー（ドメイン層から）
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// データベースエラー
    #[error("データベースエラー: {0}")]
    Database(#[from] InfraError),

    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) => Self::Validation(msg),
        }
    }
}

impl From<NotificationError> for ApiError {
    fn from(e: NotificationError) -> Self {
        match e {
            NotificationError::UnknownType(t) => Self::UnknownTemplateType(t),
            // レンダリング失敗・送信失敗は呼び出し側の入力では直せない
            NotificationError::TemplateFailed(msg) => Self::Internal(msg),
            NotificationError::SendFailed { status, message } => {
                Self::Internal(format!("メール送信に失敗 (status={status:?}): {message}"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_response = match &self {
            ApiError::NotFound(msg) => ErrorResponse::not_found(msg.clone()),
            ApiError::BadRequest(msg) => ErrorResponse::bad_request(msg.clone()),
            ApiError::UnknownTemplateType(t) => ErrorResponse::new(
                "unknown-template-type",
                "Unknown Template Type",
                400,
                format!("未知のテンプレート種別です: {t}"),
            ),
            ApiError::Validation(msg) => ErrorResponse::validation_error(msg.clone()),
            ApiError::Database(e) => {
                tracing::error!(error = %e, "データベースエラー");
                ErrorResponse::internal_error()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "内部エラー");
                ErrorResponse::internal_error()
            }
        };

        let status = StatusCode::from_u16(error_response.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status, Json(error_response)).into_response()
    }
}
