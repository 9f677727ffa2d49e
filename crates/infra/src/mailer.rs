//! # メールトランスポート
//!
//! メール送信を担当するインフラストラクチャモジュール。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: [`Mailer`] trait でメール送信を抽象化
//! - **3 つの実装**: Resend（本番用 HTTP API）、SMTP（Mailpit 開発用）、
//!   Noop（テスト・通知無効化用）
//! - **環境変数切替**: `MAILER_BACKEND` でランタイム選択
//! - **リトライしない**: リトライと失敗記録はディスパッチャの責務。
//!   トランスポートは 1 回の送信だけを行う単機能ユニットであり、
//!   別ベンダー API や SMTP に差し替えてもディスパッチャの制御フローは
//!   変わらない

mod noop;
mod resend;
mod smtp;

use async_trait::async_trait;
pub use noop::NoopMailer;
use notiflow_domain::notification::{EmailMessage, NotificationError};
pub use resend::ResendMailer;
pub use smtp::SmtpMailer;

/// 送信結果
///
/// `provider_message_id` はプロバイダがメッセージ ID を返す場合のみ設定される
/// （Resend は返す、SMTP は返さない）。ディスパッチャが `metadata` にマージする。
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub provider_message_id: Option<String>,
}

/// メール送信トレイト
///
/// 通知配信基盤の中核。メール送信の具体的な方法を抽象化する。
/// Resend / SMTP / Noop の 3 実装を環境変数で切り替える。
#[async_trait]
pub trait Mailer: Send + Sync {
    /// メールを 1 通送信する
    ///
    /// # Errors
    ///
    /// - `NotificationError::SendFailed`: 非 2xx 応答、タイムアウト、接続エラー
    async fn send_email(&self, email: &EmailMessage) -> Result<SendReceipt, NotificationError>;
}
