//! # Dispatch Service サーバー
//!
//! 通知アウトボックスのバッチ配信を担当するサービス。
//!
//! ## 役割
//!
//! - **通知の投入**: ビジネスイベント（予約確定、修理受付など）を
//!   レンダリング済みのアウトボックスレコードとして永続化する
//! - **スイープ**: 外部スケジューラからの呼び出しで、配信対象を取得して
//!   メールプロバイダ経由で送信し、リトライ・失敗を記録する
//! - **ステータス照会**: 冪等キーによる配信状態の確認（運用・診断用）
//!
//! ## スケジューリング
//!
//! ディスパッチャは常駐ループを持たない。外部の cron が数分間隔で
//! `POST /internal/dispatch` を叩くことだけが配信のトリガである
//! （ストア側トリガの「黙って発火しない」障害クラスを構造的に排除する）。
//!
//! ```text
//! ┌──────────┐  POST /internal/notifications   ┌──────────────────┐
//! │ Producer │ ──────────────────────────────► │ Dispatch Service │
//! └──────────┘                                 │                  │     ┌──────────┐
//! ┌──────────┐  POST /internal/dispatch        │  find_due        │ ──► │ Postgres │
//! │   cron   │ ──────────────────────────────► │  send / record   │     └──────────┘
//! └──────────┘                                 └────────┬─────────┘
//!                                                       │ HTTPS
//!                                                       ▼
//!                                              メールプロバイダ (Resend)
//! ```
//!
//! ## 環境変数
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `DISPATCH_HOST` | No | バインドアドレス（デフォルト: `0.0.0.0`） |
//! | `DISPATCH_PORT` | **Yes** | ポート番号 |
//! | `DATABASE_URL` | **Yes** | PostgreSQL 接続 URL |
//! | `MAILER_BACKEND` | No | `resend` \| `smtp` \| `noop`（デフォルト: `noop`） |
//! | `RESEND_API_KEY` | backend=resend | Resend API キー |
//! | `MAILER_FROM_ADDRESS` | No | 送信元アドレス |
//! | `DISPATCH_BATCH_LIMIT` | No | 1 スイープの最大件数（デフォルト: 50） |
//! | `DISPATCH_INTER_MESSAGE_DELAY_MS` | No | メッセージ間待機（デフォルト: 600） |
//! | `DISPATCH_DEFAULT_MAX_RETRIES` | No | リトライ上限デフォルト（デフォルト: 3） |
//!
//! ## 起動方法
//!
//! ```bash
//! # 開発環境（メール送信なし）
//! DISPATCH_PORT=3002 DATABASE_URL=postgres://... cargo run -p notiflow-dispatch-service
//!
//! # 本番環境
//! MAILER_BACKEND=resend RESEND_API_KEY=re_... cargo run -p notiflow-dispatch-service --release
//! ```

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    routing::{get, post},
};
use notiflow_dispatch_service::{
    config::DispatchConfig,
    handler::{
        DispatchState,
        NotificationState,
        ReadinessState,
        get_notification,
        health_check,
        queue_notification,
        readiness_check,
        run_dispatch,
    },
    usecase::{Dispatcher, DispatcherSettings, EnqueueService, TemplateRenderer},
};
use notiflow_domain::clock::SystemClock;
use notiflow_infra::{
    db,
    mailer::{Mailer, NoopMailer, ResendMailer, SmtpMailer},
    repository::PostgresNotificationRepository,
};
use notiflow_shared::observability::{TracingConfig, init_tracing};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Dispatch Service サーバーのエントリーポイント
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    // トレーシング初期化
    init_tracing(&TracingConfig::from_env("dispatch-service"));

    // 設定読み込み
    let config = DispatchConfig::from_env().expect("設定の読み込みに失敗しました");

    tracing::info!(
        "Dispatch Service サーバーを起動します: {}:{}",
        config.host,
        config.port
    );

    // データベース接続プールを作成し、マイグレーションを適用する
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("データベース接続に失敗しました");
    db::run_migrations(&pool)
        .await
        .expect("マイグレーションの適用に失敗しました");
    tracing::info!("データベースに接続しました");

    // メールトランスポートをバックエンド設定から選択する
    let mailer: Arc<dyn Mailer> = match config.mailer.backend.as_str() {
        "resend" => {
            let api_key = config
                .mailer
                .resend_api_key
                .clone()
                .expect("RESEND_API_KEY が設定されていません（MAILER_BACKEND=resend）");
            Arc::new(ResendMailer::new(
                api_key,
                config.mailer.from_address.clone(),
                Duration::from_millis(config.mailer.request_timeout_ms),
            )?)
        }
        "smtp" => Arc::new(SmtpMailer::new(
            &config.mailer.smtp_host,
            config.mailer.smtp_port,
            config.mailer.from_address.clone(),
        )),
        "noop" => Arc::new(NoopMailer),
        other => {
            tracing::warn!("未知の MAILER_BACKEND={other:?} のため noop を使用します");
            Arc::new(NoopMailer)
        }
    };
    tracing::info!(backend = %config.mailer.backend, "メールトランスポートを初期化しました");

    // 依存コンポーネントを初期化
    let repo = Arc::new(PostgresNotificationRepository::new(pool.clone()));
    let clock = Arc::new(SystemClock);

    let enqueue = EnqueueService::new(
        repo.clone(),
        TemplateRenderer::new()?,
        clock.clone(),
        config.sweep.default_max_retries,
    );
    let notification_state = Arc::new(NotificationState {
        enqueue,
        repo: repo.clone(),
    });

    let dispatcher = Dispatcher::new(
        repo,
        mailer,
        clock,
        DispatcherSettings {
            batch_limit:         config.sweep.batch_limit,
            inter_message_delay: Duration::from_millis(config.sweep.inter_message_delay_ms),
        },
    );
    let dispatch_state = Arc::new(DispatchState { dispatcher });

    let readiness_state = Arc::new(ReadinessState { pool });

    // ルーター構築
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(readiness_state)
        .route(
            "/internal/notifications",
            post(queue_notification),
        )
        .route(
            "/internal/notifications/{notification_id}",
            get(get_notification),
        )
        .with_state(notification_state)
        .route("/internal/dispatch", post(run_dispatch))
        .with_state(dispatch_state)
        .layer(TraceLayer::new_for_http());

    // サーバー起動
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("アドレスのパースに失敗しました");

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Dispatch Service サーバーが起動しました: {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
