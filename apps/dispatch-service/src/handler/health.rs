//! # ヘルスチェックハンドラ
//!
//! Dispatch Service の稼働状態を確認するためのエンドポイント。
//!
//! ## 用途
//!
//! - **コンテナオーケストレーター**: liveness/readiness probe
//! - **外部スケジューラ**: ディスパッチ呼び出し前の可用性確認
//!
//! ## エンドポイント
//!
//! ```text
//! GET /health   常に 200（プロセスが生きていれば healthy）
//! GET /ready    DB 疎通を確認。接続不可なら 503
//! ```

use std::{collections::HashMap, sync::Arc};

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use notiflow_shared::{
    HealthResponse,
    health::{CheckStatus, ReadinessResponse, ReadinessStatus},
};
use sqlx::PgPool;

/// Readiness ハンドラーの State
pub struct ReadinessState {
    pub pool: PgPool,
}

/// ヘルスチェックエンドポイント
///
/// サーバーが正常に稼働していることを確認するためのエンドポイント。
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status:  "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness チェックエンドポイント
///
/// データベースへの疎通を確認する。スイープはストアに到達できなければ
/// 何もできないため、DB 不通時は 503 を返して外部監視に知らせる。
pub async fn readiness_check(State(state): State<Arc<ReadinessState>>) -> Response {
    let database_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();

    let mut checks = HashMap::new();
    checks.insert(
        "database".to_string(),
        if database_ok {
            CheckStatus::Ok
        } else {
            CheckStatus::Error
        },
    );

    let (status_code, status) = if database_ok {
        (StatusCode::OK, ReadinessStatus::Ready)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, ReadinessStatus::NotReady)
    };

    (status_code, Json(ReadinessResponse { status, checks })).into_response()
}
