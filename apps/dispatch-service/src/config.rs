//! # Dispatch Service 設定
//!
//! 環境変数から Dispatch Service の設定を読み込む。
//!
//! ## 設計方針
//!
//! プロバイダ API キーや送信レート等の可変設定は、呼び出し時に都度
//! 環境変数を読むのではなく、起動時に一度だけこの構造体に読み込み、
//! ディスパッチャ／トランスポートへ明示的に注入する。

use std::env;

/// Dispatch Service の設定
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// バインドアドレス
    pub host: String,
    /// ポート番号
    pub port: u16,
    /// データベース接続 URL
    pub database_url: String,
    /// メールトランスポート設定
    pub mailer: MailerConfig,
    /// スイープ（バッチ配信）設定
    pub sweep: SweepConfig,
}

/// メールトランスポートの設定
///
/// `MAILER_BACKEND` 環境変数で送信バックエンドを切り替える:
/// - `resend`: Resend HTTP API 経由で送信（本番）
/// - `smtp`: Mailpit（開発）/ SMTP サーバー経由で送信
/// - `noop`: 送信しない（ログ出力のみ）
#[derive(Debug, Clone)]
pub struct MailerConfig {
    /// 送信バックエンド（"resend" | "smtp" | "noop"）
    pub backend:            String,
    /// Resend API キー（backend=resend の場合に必須）
    pub resend_api_key:     Option<String>,
    /// SMTP ホスト（backend=smtp の場合に使用）
    pub smtp_host:          String,
    /// SMTP ポート（backend=smtp の場合に使用）
    pub smtp_port:          u16,
    /// 送信元メールアドレス
    pub from_address:       String,
    /// 1 送信あたりのリクエストタイムアウト（ミリ秒）
    pub request_timeout_ms: u64,
}

/// スイープ（1 回のディスパッチ実行）の設定
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// 1 スイープで取得する最大レコード数
    pub batch_limit:            i64,
    /// メッセージ間の待機時間（ミリ秒）
    ///
    /// プロバイダの送信レート制限（Resend: 2 req/sec）を守るための
    /// 設計パラメータ。レート制限の緩いプロバイダでは短縮・無効化してよい。
    pub inter_message_delay_ms: u64,
    /// レコード作成時の max_retries デフォルト値
    pub default_max_retries:    i32,
}

impl DispatchConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            host: env::var("DISPATCH_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("DISPATCH_PORT")
                .expect("DISPATCH_PORT が設定されていません")
                .parse()
                .expect("DISPATCH_PORT は有効なポート番号である必要があります"),
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL が設定されていません"),
            mailer: MailerConfig::from_env(),
            sweep: SweepConfig::from_env(),
        })
    }
}

impl MailerConfig {
    /// 環境変数からメールトランスポート設定を読み込む
    fn from_env() -> Self {
        Self {
            backend:            env::var("MAILER_BACKEND").unwrap_or_else(|_| "noop".to_string()),
            resend_api_key:     env::var("RESEND_API_KEY").ok(),
            smtp_host:          env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            smtp_port:          env::var("SMTP_PORT")
                .unwrap_or_else(|_| "1025".to_string())
                .parse()
                .expect("SMTP_PORT は有効なポート番号である必要があります"),
            from_address:       env::var("MAILER_FROM_ADDRESS")
                .unwrap_or_else(|_| "serwis@notiflow.example.com".to_string()),
            request_timeout_ms: env::var("MAILER_REQUEST_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .expect("MAILER_REQUEST_TIMEOUT_MS は数値である必要があります"),
        }
    }
}

impl SweepConfig {
    /// 環境変数からスイープ設定を読み込む
    fn from_env() -> Self {
        Self {
            batch_limit:            env::var("DISPATCH_BATCH_LIMIT")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .expect("DISPATCH_BATCH_LIMIT は数値である必要があります"),
            inter_message_delay_ms: env::var("DISPATCH_INTER_MESSAGE_DELAY_MS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .expect("DISPATCH_INTER_MESSAGE_DELAY_MS は数値である必要があります"),
            default_max_retries:    env::var("DISPATCH_DEFAULT_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .expect("DISPATCH_DEFAULT_MAX_RETRIES は数値である必要があります"),
        }
    }
}
