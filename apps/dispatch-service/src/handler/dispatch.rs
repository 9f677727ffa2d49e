//! # ディスパッチ API ハンドラ
//!
//! 外部スケジューラ（cron）が叩くスイープ実行エンドポイント。
//!
//! ## エンドポイント
//!
//! ```text
//! POST /internal/dispatch
//! ```
//!
//! リクエストボディは省略可能。`{ "notification_ids": [...] }` を渡すと
//! 対象をその冪等キーに限定する（明示的な再配信・診断用）。
//!
//! ## レスポンス契約
//!
//! 管理 API の RFC 9457 形式とは異なり、このエンドポイントだけは
//! スケジューラとの契約により `{ "success": …, … }` 形式を返す:
//!
//! - 正常完了: 200 `{ "success": true, "total": n, "sent": n, "failed": n, "details": [...] }`
//! - スイープレベルの失敗（ストア到達不能）: 500 `{ "success": false, "error": "…" }`

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use notiflow_domain::notification::NotificationId;
use serde::{Deserialize, Serialize};

use crate::usecase::{Dispatcher, notification::SweepDetail};

/// ディスパッチハンドラーの State
pub struct DispatchState {
    pub dispatcher: Dispatcher,
}

/// スイープ実行リクエスト
#[derive(Debug, Default, Deserialize)]
pub struct DispatchRequest {
    /// 指定時はこの冪等キーのレコードだけを対象にする
    #[serde(default)]
    pub notification_ids: Option<Vec<String>>,
}

/// スイープ実行レスポンス（正常完了）
#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub success: bool,
    pub total:   usize,
    pub sent:    usize,
    pub failed:  usize,
    pub details: Vec<SweepDetail>,
}

/// スイープ実行レスポンス（失敗）
#[derive(Debug, Serialize)]
pub struct DispatchErrorResponse {
    pub success: bool,
    pub error:   String,
}

/// 1 回のスイープを実行する
///
/// ## エンドポイント
/// POST /internal/dispatch
pub async fn run_dispatch(
    State(state): State<Arc<DispatchState>>,
    body: Option<Json<DispatchRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let target = match request.notification_ids {
        Some(raw_ids) => {
            let mut ids = Vec::with_capacity(raw_ids.len());
            for raw in raw_ids {
                match NotificationId::new(raw) {
                    Ok(id) => ids.push(id),
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(DispatchErrorResponse {
                                success: false,
                                error:   e.to_string(),
                            }),
                        )
                            .into_response();
                    }
                }
            }
            Some(ids)
        }
        None => None,
    };

    match state.dispatcher.sweep(target.as_deref()).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(DispatchResponse {
                success: true,
                total:   summary.total,
                sent:    summary.sent,
                failed:  summary.failed,
                details: summary.details,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "スイープの実行に失敗しました");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DispatchErrorResponse {
                    success: false,
                    error:   "スイープの実行に失敗しました".to_string(),
                }),
            )
                .into_response()
        }
    }
}
