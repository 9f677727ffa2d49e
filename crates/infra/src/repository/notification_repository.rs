//! # NotificationRepository
//!
//! 通知アウトボックスの永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **原子的ステータス更新**: `mark_sent` / `mark_failed_attempt` は
//!   `WHERE status = 'pending'` ガード付きの単一 UPDATE。並行スイープが
//!   同じレコードを掴んでも、後勝ちの更新は 0 行更新の no-op になる
//! - **FIFO 公平性**: `find_due` は `created_at` 昇順で返し、バックログ下でも
//!   古いイベントが飢餓しない
//! - **リトライ上限は行が持つ**: グローバル定数ではなく各行の `max_retries`
//!   カラムと比較する

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notiflow_domain::{
    notification::{
        NotificationId,
        NotificationRecord,
        NotificationRecordId,
        NotificationRecordRow,
    },
    value_objects::EmailAddress,
};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 通知リポジトリトレイト
///
/// 通知アウトボックスの永続化操作を定義する。
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// 新しいレコードを挿入する（常に `pending`）
    ///
    /// # 戻り値
    ///
    /// - `Ok(())`: 挿入成功
    /// - `Err(InfraErrorKind::DuplicateNotificationId)`: 同じ冪等キーの
    ///   レコードがすでに存在する（呼び出し側は「キュー済み」として成功扱い）
    /// - `Err(_)`: データベースエラー
    async fn insert(&self, record: &NotificationRecord) -> Result<(), InfraError>;

    /// 配信対象のレコードを取得する
    ///
    /// `status = 'pending' AND retry_count < max_retries` の行を
    /// `created_at` 昇順（最古優先）で最大 `limit` 件返す。
    async fn find_due(&self, limit: i64) -> Result<Vec<NotificationRecord>, InfraError>;

    /// 指定した冪等キーに限定して配信対象を取得する
    ///
    /// 明示的な再配信・診断用。配信対象の条件と並び順は
    /// [`find_due`](NotificationRepository::find_due) と同じ。
    async fn find_due_by_notification_ids(
        &self,
        ids: &[NotificationId],
    ) -> Result<Vec<NotificationRecord>, InfraError>;

    /// 配信成功を記録する: `status = 'sent'`、`sent_at = now`、
    /// プロバイダのメッセージ ID を `metadata` にマージ
    ///
    /// 冪等: すでに `sent` のレコードへの呼び出しは no-op 成功。
    async fn mark_sent(
        &self,
        id: &NotificationRecordId,
        provider_message_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError>;

    /// 配信失敗を記録する
    ///
    /// `retry_count = next_retry_count`、`error_message` を設定し、
    /// `next_retry_count >= max_retries`（上限は行自身のカラム）なら
    /// `status = 'failed'`、そうでなければ `pending` のまま残す
    /// （次回の `find_due` で再度取得される）。
    async fn mark_failed_attempt(
        &self,
        id: &NotificationRecordId,
        error_message: &str,
        next_retry_count: i32,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError>;

    /// 冪等キーでレコードを取得する（ステータス照会・テスト用）
    async fn find_by_notification_id(
        &self,
        notification_id: &NotificationId,
    ) -> Result<Option<NotificationRecord>, InfraError>;
}

/// PostgreSQL 実装の NotificationRepository
#[derive(Debug, Clone)]
pub struct PostgresNotificationRepository {
    pool: PgPool,
}

impl PostgresNotificationRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// SELECT 句（全カラム、[`NotificationRow`] と同順）
const SELECT_COLUMNS: &str = r#"
    id, notification_id, notification_type,
    recipient_email, recipient_name,
    subject, html_content, text_content,
    status, retry_count, max_retries, error_message,
    data, metadata, sent_at, created_at, updated_at
"#;

/// notifications テーブルのフラットな行表現
///
/// `NotificationRecord::from_db` で不変条件を検証しつつ ADT に変換する。
#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    notification_id: String,
    notification_type: String,
    recipient_email: String,
    recipient_name: Option<String>,
    subject: String,
    html_content: String,
    text_content: String,
    status: String,
    retry_count: i32,
    max_retries: i32,
    error_message: Option<String>,
    data: JsonValue,
    metadata: JsonValue,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl NotificationRow {
    fn into_record(self) -> Result<NotificationRecord, InfraError> {
        let row = NotificationRecordRow {
            id: NotificationRecordId::from_uuid(self.id),
            notification_id: NotificationId::new(self.notification_id)
                .map_err(|e| InfraError::unexpected(e.to_string()))?,
            notification_type: self
                .notification_type
                .parse()
                .map_err(|_| {
                    InfraError::unexpected(format!(
                        "未知の通知種別が格納されています: {}",
                        self.notification_type
                    ))
                })?,
            recipient_email: EmailAddress::new(self.recipient_email)
                .map_err(|e| InfraError::unexpected(e.to_string()))?,
            recipient_name: self.recipient_name,
            subject: self.subject,
            html_content: self.html_content,
            text_content: self.text_content,
            status: self
                .status
                .parse()
                .map_err(|_| {
                    InfraError::unexpected(format!(
                        "未知の配信ステータスが格納されています: {}",
                        self.status
                    ))
                })?,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            error_message: self.error_message,
            data: self.data,
            metadata: self.metadata,
            sent_at: self.sent_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };

        NotificationRecord::from_db(row).map_err(|e| InfraError::unexpected(e.to_string()))
    }
}

#[async_trait]
impl NotificationRepository for PostgresNotificationRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn insert(&self, record: &NotificationRecord) -> Result<(), InfraError> {
        let status: &str = record.status().into();
        let notification_type: &str = record.notification_type().into();

        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, notification_id, notification_type,
                recipient_email, recipient_name,
                subject, html_content, text_content,
                status, retry_count, max_retries, error_message,
                data, metadata, sent_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(record.id().as_uuid())
        .bind(record.notification_id().as_str())
        .bind(notification_type)
        .bind(record.recipient_email().as_str())
        .bind(record.recipient_name())
        .bind(record.subject())
        .bind(record.html_content())
        .bind(record.text_content())
        .bind(status)
        .bind(record.retry_count())
        .bind(record.max_retries())
        .bind(record.error_message())
        .bind(record.data())
        .bind(record.metadata())
        .bind(record.sent_at())
        .bind(record.created_at())
        .bind(record.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            // 冪等キーの一意制約違反は専用のエラー種別に変換する
            if let sqlx::Error::Database(db_err) = &e
                && db_err.constraint() == Some("notifications_notification_id_key")
            {
                return InfraError::duplicate_notification_id(
                    record.notification_id().as_str(),
                );
            }
            InfraError::from(e)
        })?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn find_due(&self, limit: i64) -> Result<Vec<NotificationRecord>, InfraError> {
        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM notifications
            WHERE status = 'pending' AND retry_count < max_retries
            ORDER BY created_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NotificationRow::into_record).collect()
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn find_due_by_notification_ids(
        &self,
        ids: &[NotificationId],
    ) -> Result<Vec<NotificationRecord>, InfraError> {
        let id_strings: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();

        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM notifications
            WHERE notification_id = ANY($1)
              AND status = 'pending' AND retry_count < max_retries
            ORDER BY created_at ASC
            "#
        ))
        .bind(&id_strings)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NotificationRow::into_record).collect()
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn mark_sent(
        &self,
        id: &NotificationRecordId,
        provider_message_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        // status = 'pending' ガードにより終端状態のレコードには触れない
        // （0 行更新 = no-op 成功）。
        sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'sent',
                sent_at = $2,
                updated_at = $2,
                metadata = CASE
                    WHEN $3::text IS NULL THEN metadata
                    ELSE metadata || jsonb_build_object('provider_message_id', $3::text)
                END
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .bind(provider_message_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn mark_failed_attempt(
        &self,
        id: &NotificationRecordId,
        error_message: &str,
        next_retry_count: i32,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        // リトライ上限は行自身の max_retries カラムと比較する
        sqlx::query(
            r#"
            UPDATE notifications
            SET retry_count = $2,
                error_message = $3,
                status = CASE
                    WHEN $2 >= max_retries THEN 'failed'
                    ELSE 'pending'
                END,
                updated_at = $4
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .bind(next_retry_count)
        .bind(error_message)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn find_by_notification_id(
        &self,
        notification_id: &NotificationId,
    ) -> Result<Option<NotificationRecord>, InfraError> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM notifications
            WHERE notification_id = $1
            "#
        ))
        .bind(notification_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(NotificationRow::into_record).transpose()
    }
}
