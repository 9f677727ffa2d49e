//! # 通知 API ハンドラ
//!
//! 通知の投入（プロデューサ境界）とステータス照会を実装する。
//!
//! ## エンドポイント
//!
//! ```text
//! POST /internal/notifications                     通知を投入（201 / 重複時 200）
//! GET  /internal/notifications/{notification_id}   ステータス照会
//! ```

use std::{str::FromStr, sync::Arc};

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use notiflow_domain::notification::{NotificationId, NotificationRecord, NotificationType};
use notiflow_infra::repository::NotificationRepository;
use notiflow_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    error::ApiError,
    usecase::{EnqueueService, QueueNotificationInput},
};

/// 通知ハンドラーの State
pub struct NotificationState {
    pub enqueue: EnqueueService,
    pub repo:    Arc<dyn NotificationRepository>,
}

/// 通知投入リクエスト
#[derive(Debug, Deserialize)]
pub struct QueueNotificationRequest {
    /// 通知種別タグ（例: `"booking_confirmation"`）
    #[serde(rename = "type")]
    pub notification_type: String,
    pub recipient_email:   String,
    pub recipient_name:    Option<String>,
    #[serde(default = "default_json_object")]
    pub data:              JsonValue,
    #[serde(default = "default_json_object")]
    pub metadata:          JsonValue,
    /// 冪等キー（省略時はサーバーが払い出す）
    pub notification_id:   Option<String>,
    pub max_retries:       Option<i32>,
}

fn default_json_object() -> JsonValue {
    serde_json::json!({})
}

/// 通知レコード DTO
#[derive(Debug, Serialize)]
pub struct NotificationDto {
    pub notification_id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub metadata: JsonValue,
    pub sent_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl NotificationDto {
    fn from_record(record: &NotificationRecord) -> Self {
        Self {
            notification_id:   record.notification_id().as_str().to_string(),
            notification_type: record.notification_type().to_string(),
            recipient_email:   record.recipient_email().as_str().to_string(),
            recipient_name:    record.recipient_name().map(str::to_string),
            subject:           record.subject().to_string(),
            status:            record.status().to_string(),
            retry_count:       record.retry_count(),
            max_retries:       record.max_retries(),
            error_message:     record.error_message().map(str::to_string),
            metadata:          record.metadata().clone(),
            sent_at:           record.sent_at().map(|t| t.to_rfc3339()),
            created_at:        record.created_at().to_rfc3339(),
            updated_at:        record.updated_at().to_rfc3339(),
        }
    }
}

/// 通知を投入する
///
/// ## エンドポイント
/// POST /internal/notifications
///
/// 新規投入は 201、冪等キー重複（すでにキュー済み）は 200 で
/// 既存レコードを返す。
pub async fn queue_notification(
    State(state): State<Arc<NotificationState>>,
    Json(request): Json<QueueNotificationRequest>,
) -> Result<Response, ApiError> {
    // 種別タグは閉じた enum へのパースで検証する
    let notification_type = NotificationType::from_str(&request.notification_type)
        .map_err(|_| ApiError::UnknownTemplateType(request.notification_type.clone()))?;

    let outcome = state
        .enqueue
        .queue(QueueNotificationInput {
            notification_id: request.notification_id,
            notification_type,
            recipient_email: request.recipient_email,
            recipient_name: request.recipient_name,
            data: request.data,
            metadata: request.metadata,
            max_retries: request.max_retries,
        })
        .await?;

    let status = if outcome.already_queued {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let response = ApiResponse::new(NotificationDto::from_record(&outcome.record));

    Ok((status, Json(response)).into_response())
}

/// 通知のステータスを照会する
///
/// ## エンドポイント
/// GET /internal/notifications/{notification_id}
pub async fn get_notification(
    State(state): State<Arc<NotificationState>>,
    Path(notification_id): Path<String>,
) -> Result<Response, ApiError> {
    let notification_id = NotificationId::new(notification_id)?;

    let record = state
        .repo
        .find_by_notification_id(&notification_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("通知が見つかりません: {notification_id}"))
        })?;

    let response = ApiResponse::new(NotificationDto::from_record(&record));
    Ok((StatusCode::OK, Json(response)).into_response())
}
