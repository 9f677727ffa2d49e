//! # 通知
//!
//! メール通知アウトボックスのドメインモデルを定義する。
//!
//! ## ドメイン用語
//!
//! | 型 | ドメイン用語 | 要件 |
//! |---|------------|------|
//! | [`NotificationRecord`] | 通知レコード（アウトボックスエントリ） | 1 通のメール = 1 レコード |
//! | [`NotificationId`] | 冪等キー | 呼び出し側が払い出し、一意・不変 |
//! | [`NotificationType`] | 通知種別 | テンプレート選択に使う閉じたタグ |
//! | [`NotificationState`] | 配信状態 | pending → sent \| failed |
//!
//! ## 設計方針
//!
//! - **ADT ベースステートマシン**: 状態固有フィールド（`sent_at`、
//!   `error_message`）は [`NotificationState`] の各バリアントに持たせ、
//!   「`sent` なのに `sent_at` がない」といった不正状態を型レベルで防止する
//! - **遷移はエンティティが定義**: [`NotificationRecord::sent`] /
//!   [`NotificationRecord::failed_attempt`] が唯一の遷移規則。ストア実装は
//!   この規則を単一の原子的 UPDATE に写像する
//! - **終端状態から遷移しない**: `sent` / `failed` に対する遷移要求は
//!   エラーではなく no-op として扱う（ストアの「`WHERE status = 'pending'`
//!   ガード付き UPDATE が 0 行更新」と同じ意味論）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::IntoStaticStr;
use thiserror::Error;

use crate::{DomainError, value_objects::EmailAddress};

define_uuid_id! {
    /// 通知レコード ID（ストア払い出しの主キー）
    ///
    /// notifications テーブルの主キー。UUID v7 を使用。
    pub struct NotificationRecordId;
}

define_validated_string! {
    /// 通知の冪等キー（呼び出し側払い出し）
    ///
    /// 例: `notif_1718000000000_a1b2c3d4e`。一度払い出されたら不変で、
    /// 同じキーの再投入は「すでにキュー済み」として成功扱いされる。
    pub struct NotificationId {
        label: "通知 ID",
        max_length: 128,
    }
}

impl NotificationId {
    /// 新しい冪等キーを払い出す
    ///
    /// `notif_<エポックミリ秒>_<英数 9 文字>` 形式。人間がログから
    /// 発生時刻を読み取れることを優先し、UUID ではなくこの形式を使う。
    pub fn generate(now: DateTime<Utc>) -> Self {
        use rand::{Rng, distr::Alphanumeric};

        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(char::from)
            .collect();
        Self(format!(
            "notif_{}_{}",
            now.timestamp_millis(),
            suffix.to_lowercase()
        ))
    }
}

/// 通知送信エラー
#[derive(Debug, Error)]
pub enum NotificationError {
    /// メール送信に失敗（トランスポートエラー）
    ///
    /// `status` はプロバイダが HTTP ステータスを返した場合のみ設定される
    /// （タイムアウト・接続エラーでは `None`）。
    #[error("メール送信に失敗 (status={status:?}): {message}")]
    SendFailed {
        status:  Option<u16>,
        message: String,
    },

    /// テンプレートレンダリングに失敗
    #[error("テンプレートレンダリングに失敗: {0}")]
    TemplateFailed(String),

    /// 未知のテンプレート種別
    #[error("未知のテンプレート種別: {0}")]
    UnknownType(String),
}

/// 通知種別
///
/// テンプレート選択に使う閉じたタグ。notifications テーブルの
/// `notification_type` カラムに snake_case で格納される。
/// 種別の追加はこの enum への追加（コンパイル時に検査される変更）で行う。
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationType {
    /// 予約確定: 予約が確定したとき → 顧客に送信
    BookingConfirmation,
    /// 修理受付: 修理チケットが作成されたとき → 顧客に送信
    RepairRequest,
    /// 修理ステータス更新: チケットのステータスが変わったとき → 顧客に送信
    RepairStatusUpdate,
    /// 修理完了: 引き取り可能になったとき → 顧客に送信
    RepairReady,
    /// 予約リマインダ: 来店予定の前日 → 顧客に送信
    AppointmentReminder,
    /// メールアドレス確認: アカウント登録時 → 顧客に送信
    EmailConfirmation,
    /// 疎通確認用の内部種別（診断・E2E テスト）
    Test,
}

/// 配信ステータス
///
/// notifications テーブルの `status` カラムに格納される値。
/// `Pending` が初期状態、`Sent` / `Failed` が終端状態。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationStatus {
    /// 配信待ち（リトライ待ちを含む）
    Pending,
    /// 配信済み
    Sent,
    /// リトライ上限到達
    Failed,
}

impl std::str::FromStr for NotificationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(DomainError::Validation(format!(
                "不正な配信ステータス: {s}"
            ))),
        }
    }
}

/// 通知レコードの状態（ADT ベースステートマシン）
///
/// 各状態で有効なフィールドのみを持たせることで、不正な状態を型レベルで防止する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationState {
    /// 配信待ち
    Pending(PendingState),
    /// 配信済み（終端）
    Sent(SentState),
    /// リトライ上限到達（終端）
    Failed(FailedState),
}

/// Pending 状態の固有フィールド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingState {
    /// これまでの失敗回数（0 なら未試行）
    pub retry_count:   i32,
    /// 直近の失敗理由（未試行なら None、リトライ待ちなら直近のエラー）
    pub error_message: Option<String>,
}

/// Sent 状態の固有フィールド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentState {
    /// 配信日時（`status = sent` のときに限り存在する）
    pub sent_at:     DateTime<Utc>,
    /// 送達までに要した失敗回数
    pub retry_count: i32,
}

/// Failed 状態の固有フィールド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedState {
    /// 失敗回数（= max_retries に到達している）
    pub retry_count:   i32,
    /// 最後の失敗理由（運用者の診断用に必ず残る）
    pub error_message: String,
}

/// メールメッセージ
///
/// レコードの描画済みコンテンツから組み立てられ、Mailer に渡される。
#[derive(Debug, Clone)]
pub struct EmailMessage {
    /// 送信先メールアドレス
    pub to:             String,
    /// 送信先表示名（プロバイダ API で `"名前 <addr>"` 形式にする場合に使用）
    pub recipient_name: Option<String>,
    /// 件名
    pub subject:        String,
    /// HTML 本文
    pub html_body:      String,
    /// プレーンテキスト本文
    pub text_body:      String,
}

/// 通知レコードエンティティ
///
/// 1 通のメール配信を表すアウトボックスエントリ。コンテンツ
/// （件名・本文）は作成時に一度だけレンダリングされ、配信時に
/// 再レンダリングされることはない。
///
/// 共通フィールドを外側に、状態固有フィールドを [`NotificationState`] に分離する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    id: NotificationRecordId,
    notification_id: NotificationId,
    notification_type: NotificationType,
    recipient_email: EmailAddress,
    recipient_name: Option<String>,
    subject: String,
    html_content: String,
    text_content: String,
    max_retries: i32,
    data: JsonValue,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    state: NotificationState,
}

/// 通知レコードの新規作成パラメータ
pub struct NewNotificationRecord {
    pub id: NotificationRecordId,
    pub notification_id: NotificationId,
    pub notification_type: NotificationType,
    pub recipient_email: EmailAddress,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub html_content: String,
    pub text_content: String,
    pub max_retries: i32,
    pub data: JsonValue,
    pub metadata: JsonValue,
    pub now: DateTime<Utc>,
}

/// 通知レコードの DB 復元パラメータ
///
/// DB スキーマのフラット構造を表現する。`from_db()` で不変条件を検証して ADT に変換する。
pub struct NotificationRecordRow {
    pub id: NotificationRecordId,
    pub notification_id: NotificationId,
    pub notification_type: NotificationType,
    pub recipient_email: EmailAddress,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub html_content: String,
    pub text_content: String,
    pub status: NotificationStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub data: JsonValue,
    pub metadata: JsonValue,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// 新しい通知レコードを作成する（常に `pending`、`retry_count = 0`）
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 件名または HTML 本文が空、
    ///   もしくは `max_retries` が負
    pub fn new(params: NewNotificationRecord) -> Result<Self, DomainError> {
        if params.subject.trim().is_empty() {
            return Err(DomainError::Validation("件名は必須です".to_string()));
        }
        if params.html_content.trim().is_empty() {
            return Err(DomainError::Validation("HTML 本文は必須です".to_string()));
        }
        if params.max_retries < 0 {
            return Err(DomainError::Validation(
                "max_retries は 0 以上である必要があります".to_string(),
            ));
        }

        Ok(Self {
            id: params.id,
            notification_id: params.notification_id,
            notification_type: params.notification_type,
            recipient_email: params.recipient_email,
            recipient_name: params.recipient_name,
            subject: params.subject,
            html_content: params.html_content,
            text_content: params.text_content,
            max_retries: params.max_retries,
            data: params.data,
            metadata: params.metadata,
            created_at: params.now,
            updated_at: params.now,
            state: NotificationState::Pending(PendingState {
                retry_count:   0,
                error_message: None,
            }),
        })
    }

    /// 既存のデータから復元する
    ///
    /// DB のフラット構造から ADT に変換し、不変条件を検証する。
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 不変条件違反
    ///   （`sent` なのに `sent_at` が NULL、`retry_count > max_retries` 等）
    pub fn from_db(row: NotificationRecordRow) -> Result<Self, DomainError> {
        if row.retry_count < 0 || row.retry_count > row.max_retries {
            return Err(DomainError::Validation(format!(
                "retry_count ({}) が max_retries ({}) の範囲外です",
                row.retry_count, row.max_retries
            )));
        }

        let state = match row.status {
            NotificationStatus::Pending => {
                if row.sent_at.is_some() {
                    return Err(DomainError::Validation(
                        "pending レコードに sent_at は設定できません".to_string(),
                    ));
                }
                NotificationState::Pending(PendingState {
                    retry_count:   row.retry_count,
                    error_message: row.error_message,
                })
            }
            NotificationStatus::Sent => {
                let sent_at = row.sent_at.ok_or_else(|| {
                    DomainError::Validation(
                        "sent レコードには sent_at が必要です".to_string(),
                    )
                })?;
                NotificationState::Sent(SentState {
                    sent_at,
                    retry_count: row.retry_count,
                })
            }
            NotificationStatus::Failed => {
                if row.sent_at.is_some() {
                    return Err(DomainError::Validation(
                        "failed レコードに sent_at は設定できません".to_string(),
                    ));
                }
                let error_message = row.error_message.ok_or_else(|| {
                    DomainError::Validation(
                        "failed レコードには error_message が必要です".to_string(),
                    )
                })?;
                NotificationState::Failed(FailedState {
                    retry_count: row.retry_count,
                    error_message,
                })
            }
        };

        Ok(Self {
            id: row.id,
            notification_id: row.notification_id,
            notification_type: row.notification_type,
            recipient_email: row.recipient_email,
            recipient_name: row.recipient_name,
            subject: row.subject,
            html_content: row.html_content,
            text_content: row.text_content,
            max_retries: row.max_retries,
            data: row.data,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
            state,
        })
    }

    // ===== 状態遷移 =====

    /// 配信成功を記録する: `pending → sent`
    ///
    /// プロバイダのメッセージ ID を `metadata.provider_message_id` にマージする。
    /// すでに終端状態（`sent` / `failed`）の場合は no-op（自身をそのまま返す）。
    /// ストアの「`WHERE status = 'pending'` ガード付き UPDATE」と同じ意味論。
    pub fn sent(mut self, provider_message_id: Option<&str>, now: DateTime<Utc>) -> Self {
        let retry_count = match &self.state {
            NotificationState::Pending(pending) => pending.retry_count,
            _ => return self,
        };

        if let Some(message_id) = provider_message_id
            && let JsonValue::Object(map) = &mut self.metadata
        {
            map.insert(
                "provider_message_id".to_string(),
                JsonValue::String(message_id.to_string()),
            );
        }

        self.state = NotificationState::Sent(SentState {
            sent_at: now,
            retry_count,
        });
        self.updated_at = now;
        self
    }

    /// 配信失敗を記録する: `pending → pending`（リトライ残あり）または
    /// `pending → failed`（`retry_count + 1 >= max_retries`）
    ///
    /// すでに終端状態の場合は no-op。
    pub fn failed_attempt(mut self, error_message: impl Into<String>, now: DateTime<Utc>) -> Self {
        let next_retry_count = match &self.state {
            NotificationState::Pending(pending) => pending.retry_count + 1,
            _ => return self,
        };
        let error_message = error_message.into();

        self.state = if next_retry_count >= self.max_retries {
            NotificationState::Failed(FailedState {
                // retry_count は max_retries を超えない（上限で凍結）
                retry_count: next_retry_count.min(self.max_retries),
                error_message,
            })
        } else {
            NotificationState::Pending(PendingState {
                retry_count:   next_retry_count,
                error_message: Some(error_message),
            })
        };
        self.updated_at = now;
        self
    }

    // ===== アクセサ =====

    pub fn id(&self) -> &NotificationRecordId {
        &self.id
    }

    pub fn notification_id(&self) -> &NotificationId {
        &self.notification_id
    }

    pub fn notification_type(&self) -> NotificationType {
        self.notification_type
    }

    pub fn recipient_email(&self) -> &EmailAddress {
        &self.recipient_email
    }

    pub fn recipient_name(&self) -> Option<&str> {
        self.recipient_name.as_deref()
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn html_content(&self) -> &str {
        &self.html_content
    }

    pub fn text_content(&self) -> &str {
        &self.text_content
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    pub fn data(&self) -> &JsonValue {
        &self.data
    }

    pub fn metadata(&self) -> &JsonValue {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn state(&self) -> &NotificationState {
        &self.state
    }

    /// フラットなステータス値を返す（DB・API 表現用）
    pub fn status(&self) -> NotificationStatus {
        match &self.state {
            NotificationState::Pending(_) => NotificationStatus::Pending,
            NotificationState::Sent(_) => NotificationStatus::Sent,
            NotificationState::Failed(_) => NotificationStatus::Failed,
        }
    }

    /// これまでの失敗回数を返す
    pub fn retry_count(&self) -> i32 {
        match &self.state {
            NotificationState::Pending(s) => s.retry_count,
            NotificationState::Sent(s) => s.retry_count,
            NotificationState::Failed(s) => s.retry_count,
        }
    }

    /// 直近の失敗理由を返す
    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            NotificationState::Pending(s) => s.error_message.as_deref(),
            NotificationState::Sent(_) => None,
            NotificationState::Failed(s) => Some(&s.error_message),
        }
    }

    /// 配信日時を返す（`sent` のときに限り `Some`）
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            NotificationState::Sent(s) => Some(s.sent_at),
            _ => None,
        }
    }

    /// 配信対象か（`pending` かつリトライ上限未到達）
    pub fn is_due(&self) -> bool {
        matches!(&self.state, NotificationState::Pending(s) if s.retry_count < self.max_retries)
    }

    /// Mailer に渡すメールメッセージを組み立てる
    pub fn to_email_message(&self) -> EmailMessage {
        EmailMessage {
            to:             self.recipient_email.as_str().to_string(),
            recipient_name: self.recipient_name.clone(),
            subject:        self.subject.clone(),
            html_body:      self.html_content.clone(),
            text_body:      self.text_content.clone(),
        }
    }
}
