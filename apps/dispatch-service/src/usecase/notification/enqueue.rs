//! # 通知キュー投入サービス
//!
//! イベントプロデューサ境界。ビジネスイベント（修理受付、予約確定など）を
//! 永続的なアウトボックスレコードに変換する。
//!
//! ## 設計方針
//!
//! - **作成時レンダリング**: コンテンツは投入時に一度だけレンダリングし、
//!   レコードに保存する。配信時の再レンダリングは行わない
//! - **冪等**: 同じ `notification_id` の再投入は「すでにキュー済み」として
//!   既存レコードを返す（エラーにしない）
//! - **ベストエフォート**: プロデューサにとって通知はビジネス操作の付随物。
//!   投入失敗はログと HTTP エラーで通知するが、呼び出し側の業務処理
//!   （予約・チケット作成）を巻き戻す理由にはならない

use std::sync::Arc;

use notiflow_domain::{
    clock::Clock,
    notification::{
        NewNotificationRecord,
        NotificationId,
        NotificationRecord,
        NotificationRecordId,
        NotificationType,
    },
    value_objects::EmailAddress,
};
use notiflow_infra::repository::NotificationRepository;
use notiflow_shared::{event_log::event, log_business_event};
use serde_json::Value as JsonValue;

use super::TemplateRenderer;
use crate::error::ApiError;

/// キュー投入の入力
pub struct QueueNotificationInput {
    /// 冪等キー（省略時は払い出す）
    pub notification_id: Option<String>,
    pub notification_type: NotificationType,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    /// テンプレートレンダリングに使うデータバッグ（監査用に保存される）
    pub data: JsonValue,
    /// 相関情報（発生元エンティティ ID 等）
    pub metadata: JsonValue,
    /// レコード単位のリトライ上限（省略時は設定のデフォルト値）
    pub max_retries: Option<i32>,
}

/// キュー投入の結果
pub struct QueueOutcome {
    /// 格納された（または既存の）レコード
    pub record:         NotificationRecord,
    /// 冪等キー重複により既存レコードを返した場合 true
    pub already_queued: bool,
}

/// 通知キュー投入サービス
pub struct EnqueueService {
    repo: Arc<dyn NotificationRepository>,
    renderer: TemplateRenderer,
    clock: Arc<dyn Clock>,
    default_max_retries: i32,
}

impl EnqueueService {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        renderer: TemplateRenderer,
        clock: Arc<dyn Clock>,
        default_max_retries: i32,
    ) -> Self {
        Self {
            repo,
            renderer,
            clock,
            default_max_retries,
        }
    }

    /// 通知をレンダリングしてアウトボックスに投入する
    ///
    /// # Errors
    ///
    /// - `ApiError::Validation`: 宛先アドレス不正、冪等キー不正
    /// - `ApiError::Internal`: テンプレートレンダリング失敗
    /// - `ApiError::Database`: ストア書き込み失敗
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn queue(&self, input: QueueNotificationInput) -> Result<QueueOutcome, ApiError> {
        let now = self.clock.now();

        let notification_id = match input.notification_id {
            Some(value) => NotificationId::new(value)?,
            None => NotificationId::generate(now),
        };
        let recipient_email = EmailAddress::new(input.recipient_email)?;

        let rendered = self
            .renderer
            .render(input.notification_type, &input.data)?;

        let record = NotificationRecord::new(NewNotificationRecord {
            id: NotificationRecordId::new(),
            notification_id,
            notification_type: input.notification_type,
            recipient_email,
            recipient_name: input.recipient_name,
            subject: rendered.subject,
            html_content: rendered.html,
            text_content: rendered.text,
            max_retries: input.max_retries.unwrap_or(self.default_max_retries),
            data: input.data,
            metadata: input.metadata,
            now,
        })?;

        match self.repo.insert(&record).await {
            Ok(()) => {
                log_business_event!(
                    event.category = event::category::NOTIFICATION,
                    event.action = event::action::NOTIFICATION_QUEUED,
                    event.entity_type = event::entity_type::NOTIFICATION,
                    event.result = event::result::SUCCESS,
                    notification.id = %record.notification_id(),
                    notification.notification_type = %record.notification_type(),
                    notification.recipient = %record.recipient_email(),
                    "通知をキューに投入しました"
                );
                Ok(QueueOutcome {
                    record,
                    already_queued: false,
                })
            }
            // 冪等キー重複は「キュー済み」として成功扱い
            Err(e) if e.is_duplicate_notification_id() => {
                log_business_event!(
                    event.category = event::category::NOTIFICATION,
                    event.action = event::action::NOTIFICATION_DUPLICATE,
                    event.entity_type = event::entity_type::NOTIFICATION,
                    event.result = event::result::SUCCESS,
                    notification.id = %record.notification_id(),
                    "冪等キー重複: 既存レコードを返します"
                );
                let existing = self
                    .repo
                    .find_by_notification_id(record.notification_id())
                    .await?
                    .ok_or_else(|| {
                        ApiError::Internal(
                            "重複が検出されたのに既存レコードが見つかりません".to_string(),
                        )
                    })?;
                Ok(QueueOutcome {
                    record:         existing,
                    already_queued: true,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use notiflow_domain::{
        clock::FixedClock,
        notification::NotificationStatus,
    };
    use notiflow_infra::mock::MockNotificationRepository;
    use serde_json::json;

    use super::*;

    fn make_service(repo: MockNotificationRepository) -> EnqueueService {
        EnqueueService::new(
            Arc::new(repo),
            TemplateRenderer::new().unwrap(),
            Arc::new(FixedClock::new(chrono::Utc::now())),
            3,
        )
    }

    fn make_input(notification_id: Option<&str>) -> QueueNotificationInput {
        QueueNotificationInput {
            notification_id: notification_id.map(str::to_string),
            notification_type: NotificationType::BookingConfirmation,
            recipient_email: "klient@example.com".to_string(),
            recipient_name: Some("Jan Kowalski".to_string()),
            data: json!({ "serviceName": "Wymiana ekranu" }),
            metadata: json!({ "bookingId": "bkg_123" }),
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn test_queueがpendingレコードをレンダリング済みで格納する() {
        let repo = MockNotificationRepository::new();
        let service = make_service(repo.clone());

        let outcome = service.queue(make_input(Some("notif_1_a"))).await.unwrap();

        assert!(!outcome.already_queued);
        assert_eq!(outcome.record.status(), NotificationStatus::Pending);
        assert_eq!(outcome.record.retry_count(), 0);
        assert_eq!(outcome.record.max_retries(), 3);
        assert!(outcome.record.html_content().contains("Wymiana ekranu"));
        assert_eq!(repo.all().len(), 1);
    }

    #[tokio::test]
    async fn test_queueは冪等キー省略時に払い出す() {
        let repo = MockNotificationRepository::new();
        let service = make_service(repo);

        let outcome = service.queue(make_input(None)).await.unwrap();

        assert!(
            outcome
                .record
                .notification_id()
                .as_str()
                .starts_with("notif_")
        );
    }

    #[tokio::test]
    async fn test_queueは重複をキュー済みとして成功扱いする() {
        let repo = MockNotificationRepository::new();
        let service = make_service(repo.clone());

        let first = service.queue(make_input(Some("notif_1_a"))).await.unwrap();
        let second = service.queue(make_input(Some("notif_1_a"))).await.unwrap();

        assert!(!first.already_queued);
        assert!(second.already_queued);
        assert_eq!(second.record.id(), first.record.id());
        // レコードは 1 件のまま
        assert_eq!(repo.all().len(), 1);
    }

    #[tokio::test]
    async fn test_queueはmax_retriesの上書きを受け付ける() {
        let repo = MockNotificationRepository::new();
        let service = make_service(repo);

        let mut input = make_input(Some("notif_1_a"));
        input.max_retries = Some(5);
        let outcome = service.queue(input).await.unwrap();

        assert_eq!(outcome.record.max_retries(), 5);
    }

    #[tokio::test]
    async fn test_queueは不正な宛先アドレスを拒否する() {
        let repo = MockNotificationRepository::new();
        let service = make_service(repo.clone());

        let mut input = make_input(Some("notif_1_a"));
        input.recipient_email = "bez-malpy".to_string();
        let result = service.queue(input).await;

        assert!(matches!(result, Err(ApiError::Validation(_))));
        assert!(repo.all().is_empty());
    }
}
