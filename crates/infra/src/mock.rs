//! # テスト用モック実装
//!
//! ユースケーステストで使用するインメモリのリポジトリ／メーラー。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! notiflow-infra = { workspace = true, features = ["test-utils"] }
//! ```
//!
//! どちらのモックも Postgres 実装と同じ意味論を守る:
//! `mark_sent` / `mark_failed_attempt` は終端状態のレコードに対して no-op、
//! `find_due` は `created_at` 昇順。遷移規則そのものは
//! `NotificationRecord` のメソッドに委譲しているため、二重実装にならない。

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notiflow_domain::notification::{
    EmailMessage,
    NotificationError,
    NotificationId,
    NotificationRecord,
    NotificationRecordId,
};

use crate::{
    error::InfraError,
    mailer::{Mailer, SendReceipt},
    repository::NotificationRepository,
};

// ===== MockNotificationRepository =====

/// テスト用のインメモリ NotificationRepository
#[derive(Clone, Default)]
pub struct MockNotificationRepository {
    records: Arc<Mutex<Vec<NotificationRecord>>>,
    /// 残りこの回数だけステータス更新（mark_*）を失敗させる
    failing_marks: Arc<Mutex<u32>>,
}

impl MockNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 格納されている全レコードのスナップショットを返す（アサーション用）
    pub fn all(&self) -> Vec<NotificationRecord> {
        self.records.lock().unwrap().clone()
    }

    /// 以降 `n` 回のステータス更新（`mark_sent` / `mark_failed_attempt`）を
    /// 失敗させる（ストア書き込み失敗のシミュレーション）
    pub fn fail_next_marks(&self, n: u32) {
        *self.failing_marks.lock().unwrap() = n;
    }

    fn take_mark_failure(&self) -> bool {
        let mut remaining = self.failing_marks.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return true;
        }
        false
    }
}

#[async_trait]
impl NotificationRepository for MockNotificationRepository {
    async fn insert(&self, record: &NotificationRecord) -> Result<(), InfraError> {
        let mut records = self.records.lock().unwrap();
        if records
            .iter()
            .any(|r| r.notification_id() == record.notification_id())
        {
            return Err(InfraError::duplicate_notification_id(
                record.notification_id().as_str(),
            ));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn find_due(&self, limit: i64) -> Result<Vec<NotificationRecord>, InfraError> {
        let mut due: Vec<NotificationRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_due())
            .cloned()
            .collect();
        due.sort_by_key(NotificationRecord::created_at);
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn find_due_by_notification_ids(
        &self,
        ids: &[NotificationId],
    ) -> Result<Vec<NotificationRecord>, InfraError> {
        let mut due: Vec<NotificationRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_due() && ids.contains(r.notification_id()))
            .cloned()
            .collect();
        due.sort_by_key(NotificationRecord::created_at);
        Ok(due)
    }

    async fn mark_sent(
        &self,
        id: &NotificationRecordId,
        provider_message_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        if self.take_mark_failure() {
            return Err(InfraError::unexpected("モック: ストア書き込み失敗"));
        }

        let mut records = self.records.lock().unwrap();
        if let Some(pos) = records.iter().position(|r| r.id() == id) {
            let record = records.remove(pos);
            records.insert(pos, record.sent(provider_message_id, now));
        }
        Ok(())
    }

    async fn mark_failed_attempt(
        &self,
        id: &NotificationRecordId,
        error_message: &str,
        _next_retry_count: i32,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        if self.take_mark_failure() {
            return Err(InfraError::unexpected("モック: ストア書き込み失敗"));
        }

        // 遷移規則はエンティティに委譲する（next_retry_count は SQL 実装が
        // バインドするための引数であり、ここでは retry_count + 1 と一致する）
        let mut records = self.records.lock().unwrap();
        if let Some(pos) = records.iter().position(|r| r.id() == id) {
            let record = records.remove(pos);
            records.insert(pos, record.failed_attempt(error_message, now));
        }
        Ok(())
    }

    async fn find_by_notification_id(
        &self,
        notification_id: &NotificationId,
    ) -> Result<Option<NotificationRecord>, InfraError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.notification_id() == notification_id)
            .cloned())
    }
}

// ===== MockMailer =====

#[derive(Default)]
struct MockMailerInner {
    sent:               Vec<EmailMessage>,
    /// 残りこの回数だけ送信を失敗させる（`u32::MAX` で常時失敗）
    failures_remaining: u32,
    counter:            u32,
}

/// テスト用のモック Mailer
///
/// 送信されたメールを記録し、`mock-<連番>` 形式のプロバイダメッセージ ID を
/// 返す。`fail_times` / `always_failing` で失敗を注入できる。
#[derive(Clone, Default)]
pub struct MockMailer {
    inner: Arc<Mutex<MockMailerInner>>,
}

impl MockMailer {
    /// 常に成功するモックを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// 常に失敗するモックを作成する
    pub fn always_failing() -> Self {
        let mailer = Self::default();
        mailer.inner.lock().unwrap().failures_remaining = u32::MAX;
        mailer
    }

    /// 以降 `n` 回の送信を失敗させる
    pub fn fail_times(&self, n: u32) {
        self.inner.lock().unwrap().failures_remaining = n;
    }

    /// 送信された（成功した）メールのスナップショットを返す
    pub fn sent_emails(&self) -> Vec<EmailMessage> {
        self.inner.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send_email(&self, email: &EmailMessage) -> Result<SendReceipt, NotificationError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.failures_remaining > 0 {
            if inner.failures_remaining != u32::MAX {
                inner.failures_remaining -= 1;
            }
            return Err(NotificationError::SendFailed {
                status:  Some(500),
                message: "モック: 送信失敗".to_string(),
            });
        }

        inner.counter += 1;
        let message_id = format!("mock-{:04}", inner.counter);
        inner.sent.push(email.clone());

        Ok(SendReceipt {
            provider_message_id: Some(message_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use notiflow_domain::{
        notification::{NewNotificationRecord, NotificationStatus, NotificationType},
        value_objects::EmailAddress,
    };
    use serde_json::json;

    use super::*;

    fn make_record(notification_id: &str, now: DateTime<Utc>) -> NotificationRecord {
        NotificationRecord::new(NewNotificationRecord {
            id: NotificationRecordId::new(),
            notification_id: NotificationId::new(notification_id).unwrap(),
            notification_type: NotificationType::Test,
            recipient_email: EmailAddress::new("test@example.com").unwrap(),
            recipient_name: None,
            subject: "Test".to_string(),
            html_content: "<p>hi</p>".to_string(),
            text_content: "hi".to_string(),
            max_retries: 3,
            data: json!({}),
            metadata: json!({}),
            now,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_insertが冪等キー重複を検出する() {
        let repo = MockNotificationRepository::new();
        let now = Utc::now();

        repo.insert(&make_record("notif_1_a", now)).await.unwrap();
        let err = repo
            .insert(&make_record("notif_1_a", now))
            .await
            .unwrap_err();

        assert!(err.is_duplicate_notification_id());
        assert_eq!(repo.all().len(), 1);
    }

    #[tokio::test]
    async fn test_find_dueがcreated_at昇順でlimit件返す() {
        let repo = MockNotificationRepository::new();
        let base = Utc::now();

        for (i, id) in ["notif_1_a", "notif_1_b", "notif_1_c"].iter().enumerate() {
            let now = base + chrono::Duration::seconds(i as i64);
            repo.insert(&make_record(id, now)).await.unwrap();
        }

        let due = repo.find_due(2).await.unwrap();

        assert_eq!(due.len(), 2);
        assert_eq!(due[0].notification_id().as_str(), "notif_1_a");
        assert_eq!(due[1].notification_id().as_str(), "notif_1_b");
    }

    #[tokio::test]
    async fn test_mark_sentが冪等である() {
        let repo = MockNotificationRepository::new();
        let now = Utc::now();
        let record = make_record("notif_1_a", now);
        repo.insert(&record).await.unwrap();

        repo.mark_sent(record.id(), Some("mock-0001"), now)
            .await
            .unwrap();
        // 2 回目は no-op 成功
        repo.mark_sent(record.id(), Some("mock-0002"), Utc::now())
            .await
            .unwrap();

        let stored = repo
            .find_by_notification_id(record.notification_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), NotificationStatus::Sent);
        assert_eq!(stored.metadata()["provider_message_id"], "mock-0001");
    }

    #[tokio::test]
    async fn test_fail_next_marksでストア書き込み失敗を注入できる() {
        let repo = MockNotificationRepository::new();
        let now = Utc::now();
        let record = make_record("notif_1_a", now);
        repo.insert(&record).await.unwrap();

        repo.fail_next_marks(1);

        assert!(repo.mark_sent(record.id(), None, now).await.is_err());
        // 2 回目は成功する
        assert!(repo.mark_sent(record.id(), None, now).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_mailerのfail_timesが指定回数だけ失敗する() {
        let mailer = MockMailer::new();
        mailer.fail_times(2);

        let email = EmailMessage {
            to:             "test@example.com".to_string(),
            recipient_name: None,
            subject:        "Test".to_string(),
            html_body:      "<p>hi</p>".to_string(),
            text_body:      "hi".to_string(),
        };

        assert!(mailer.send_email(&email).await.is_err());
        assert!(mailer.send_email(&email).await.is_err());

        let receipt = mailer.send_email(&email).await.unwrap();
        assert_eq!(receipt.provider_message_id.as_deref(), Some("mock-0001"));
        assert_eq!(mailer.sent_emails().len(), 1);
    }
}
