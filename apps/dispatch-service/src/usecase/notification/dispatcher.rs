//! # ディスパッチャ（バッチ配信）
//!
//! アウトボックスから配信対象を取得し、トランスポート経由で送信して
//! 結果を記録する。本システム唯一の能動コンポーネント。
//!
//! ## 設計方針
//!
//! - **1 回のスイープで完結**: 常駐ループではなく、外部スケジューラ
//!   （cron からの HTTP 呼び出し）が 1 スイープずつ起動する。ストア側の
//!   トリガ機構には依存しない（「トリガが黙って発火しない」クラスの
//!   障害を構造的に排除する）
//! - **逐次送信 + メッセージ間待機**: プロバイダの送信レート制限を守る。
//!   待機時間は設定値であり、正しさの要件ではない
//! - **レコード単位の障害分離**: 1 レコードの送信失敗・ストア更新失敗が
//!   残りのキューを塞がない。スイープ全体が失敗するのは最初の
//!   `find_due` が失敗したときだけ
//! - **at-least-once**: スイープの多重起動はロックせず許容する。
//!   各ステータス更新は `pending` ガード付きの原子的書き込みであり、
//!   最悪ケースは二重送信（許容済みのトレードオフ）

use std::{sync::Arc, time::Duration};

use notiflow_domain::{
    clock::Clock,
    notification::{NotificationId, NotificationRecord},
};
use notiflow_infra::{InfraError, mailer::Mailer, repository::NotificationRepository};
use notiflow_shared::{event_log::event, log_business_event};
use serde::Serialize;

/// スイープの動作設定
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// 1 スイープで取得する最大レコード数
    pub batch_limit:         i64,
    /// メッセージ間の待機時間（レート制限対策、0 で無効）
    pub inter_message_delay: Duration,
}

/// レコード単位の配信結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepOutcome {
    Sent,
    Failed,
}

/// レコード単位の詳細
#[derive(Debug, Clone, Serialize)]
pub struct SweepDetail {
    pub notification_id: String,
    pub recipient_email: String,
    pub outcome:         SweepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:           Option<String>,
}

/// スイープのサマリ
///
/// 呼び出し元への返却用の便宜ビュー。正本はストアのステータスであり、
/// サマリは後からでもステータス照会で再構成できる。
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub total:   usize,
    pub sent:    usize,
    pub failed:  usize,
    pub details: Vec<SweepDetail>,
}

/// ディスパッチャ
pub struct Dispatcher {
    repo: Arc<dyn NotificationRepository>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            repo,
            mailer,
            clock,
            settings,
        }
    }

    /// 1 回のスイープを実行する
    ///
    /// `target` を指定すると、その冪等キーのレコードだけを対象にする
    /// （明示的な再配信・診断用）。省略時は配信対象全体から
    /// `batch_limit` 件まで処理する。
    ///
    /// # Errors
    ///
    /// - `InfraError`: 配信対象の取得自体に失敗（ストア到達不能）。
    ///   レコード単位の失敗はエラーにならず、サマリに計上される
    #[tracing::instrument(skip_all, level = "info")]
    pub async fn sweep(
        &self,
        target: Option<&[NotificationId]>,
    ) -> Result<SweepSummary, InfraError> {
        let due = match target {
            Some(ids) => self.repo.find_due_by_notification_ids(ids).await?,
            None => self.repo.find_due(self.settings.batch_limit).await?,
        };

        let mut summary = SweepSummary {
            total:   due.len(),
            sent:    0,
            failed:  0,
            details: Vec::with_capacity(due.len()),
        };

        for (index, record) in due.iter().enumerate() {
            let detail = self.deliver(record).await;
            match detail.outcome {
                SweepOutcome::Sent => summary.sent += 1,
                SweepOutcome::Failed => summary.failed += 1,
            }
            summary.details.push(detail);

            // レート制限対策の待機。成否に関わらず次レコードの前に入れる
            if index + 1 < due.len() && !self.settings.inter_message_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_message_delay).await;
            }
        }

        log_business_event!(
            event.category = event::category::DISPATCH,
            event.action = event::action::SWEEP_COMPLETED,
            event.result = event::result::SUCCESS,
            sweep.total = summary.total,
            sweep.sent = summary.sent,
            sweep.failed = summary.failed,
            "スイープが完了しました"
        );

        Ok(summary)
    }

    /// 1 レコードの配信を試み、結果をストアに記録する
    ///
    /// ストア更新の失敗はこのレコードの失敗として報告し、スイープは
    /// 続行させる（戻り値はエラーにしない）。
    async fn deliver(&self, record: &NotificationRecord) -> SweepDetail {
        let notification_id = record.notification_id().as_str().to_string();
        let recipient_email = record.recipient_email().as_str().to_string();
        let email = record.to_email_message();

        match self.mailer.send_email(&email).await {
            Ok(receipt) => {
                let now = self.clock.now();
                if let Err(store_err) = self
                    .repo
                    .mark_sent(record.id(), receipt.provider_message_id.as_deref(), now)
                    .await
                {
                    tracing::error!(
                        notification.id = %notification_id,
                        error = %store_err,
                        "送信成功後のステータス更新に失敗しました"
                    );
                    return SweepDetail {
                        notification_id,
                        recipient_email,
                        outcome: SweepOutcome::Failed,
                        error: Some(format!("送信成功後のステータス更新に失敗: {store_err}")),
                    };
                }

                log_business_event!(
                    event.category = event::category::NOTIFICATION,
                    event.action = event::action::NOTIFICATION_SENT,
                    event.entity_type = event::entity_type::NOTIFICATION,
                    event.result = event::result::SUCCESS,
                    notification.id = %notification_id,
                    notification.recipient = %recipient_email,
                    "通知メール送信成功"
                );

                SweepDetail {
                    notification_id,
                    recipient_email,
                    outcome: SweepOutcome::Sent,
                    error: None,
                }
            }
            Err(send_err) => {
                let error_message = send_err.to_string();
                let now = self.clock.now();

                if let Err(store_err) = self
                    .repo
                    .mark_failed_attempt(
                        record.id(),
                        &error_message,
                        record.retry_count() + 1,
                        now,
                    )
                    .await
                {
                    tracing::error!(
                        notification.id = %notification_id,
                        error = %store_err,
                        "送信失敗後のステータス更新に失敗しました"
                    );
                }

                log_business_event!(
                    event.category = event::category::NOTIFICATION,
                    event.action = event::action::NOTIFICATION_FAILED,
                    event.entity_type = event::entity_type::NOTIFICATION,
                    event.result = event::result::FAILURE,
                    notification.id = %notification_id,
                    notification.recipient = %recipient_email,
                    error = %error_message,
                    "通知メール送信失敗"
                );

                SweepDetail {
                    notification_id,
                    recipient_email,
                    outcome: SweepOutcome::Failed,
                    error: Some(error_message),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use notiflow_domain::{
        clock::FixedClock,
        notification::{
            NewNotificationRecord,
            NotificationRecordId,
            NotificationStatus,
            NotificationType,
        },
        value_objects::EmailAddress,
    };
    use notiflow_infra::mock::{MockMailer, MockNotificationRepository};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn make_settings() -> DispatcherSettings {
        DispatcherSettings {
            batch_limit:         50,
            inter_message_delay: Duration::ZERO,
        }
    }

    fn make_dispatcher(
        repo: MockNotificationRepository,
        mailer: MockMailer,
        clock: Arc<FixedClock>,
    ) -> Dispatcher {
        Dispatcher::new(Arc::new(repo), Arc::new(mailer), clock, make_settings())
    }

    async fn seed_record(
        repo: &MockNotificationRepository,
        notification_id: &str,
        now: chrono::DateTime<Utc>,
    ) -> NotificationRecord {
        let record = NotificationRecord::new(NewNotificationRecord {
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
        .unwrap();
        repo.insert(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn test_sweepが成功レコードをsentにしてサマリを返す() {
        let repo = MockNotificationRepository::new();
        let mailer = MockMailer::new();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let record = seed_record(&repo, "notif_1_a", clock.now()).await;

        let dispatcher = make_dispatcher(repo.clone(), mailer.clone(), clock.clone());
        let summary = dispatcher.sweep(None).await.unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.details[0].outcome, SweepOutcome::Sent);

        let stored = repo
            .find_by_notification_id(record.notification_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), NotificationStatus::Sent);
        assert_eq!(stored.sent_at(), Some(clock.now()));
        assert_eq!(stored.metadata()["provider_message_id"], "mock-0001");
        assert_eq!(mailer.sent_emails().len(), 1);
    }

    #[tokio::test]
    async fn test_直後の再スイープは対象なしで何も書き込まない() {
        let repo = MockNotificationRepository::new();
        let mailer = MockMailer::new();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        seed_record(&repo, "notif_1_a", clock.now()).await;

        let dispatcher = make_dispatcher(repo.clone(), mailer.clone(), clock);
        dispatcher.sweep(None).await.unwrap();
        let second = dispatcher.sweep(None).await.unwrap();

        assert_eq!(second.total, 0);
        assert_eq!(second.sent, 0);
        assert_eq!(second.failed, 0);
        assert!(second.details.is_empty());
        // 送信は 1 回だけ
        assert_eq!(mailer.sent_emails().len(), 1);
    }

    #[tokio::test]
    async fn test_失敗はリトライされ上限でfailedに凍結される() {
        let repo = MockNotificationRepository::new();
        let mailer = MockMailer::always_failing();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let record = seed_record(&repo, "notif_1_a", clock.now()).await;

        let dispatcher = make_dispatcher(repo.clone(), mailer, clock);

        // max_retries = 3: 3 回のスイープで failed に到達する
        for expected_retry in 1..=3 {
            let summary = dispatcher.sweep(None).await.unwrap();
            assert_eq!(summary.failed, 1, "{expected_retry} 回目のスイープ");

            let stored = repo
                .find_by_notification_id(record.notification_id())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.retry_count(), expected_retry);
        }

        let stored = repo
            .find_by_notification_id(record.notification_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), NotificationStatus::Failed);
        assert_eq!(stored.retry_count(), 3);
        assert!(stored.error_message().is_some_and(|m| !m.is_empty()));

        // 4 回目のスイープは対象に含めない
        let fourth = dispatcher.sweep(None).await.unwrap();
        assert_eq!(fourth.total, 0);
    }

    #[tokio::test]
    async fn test_fifo順でlimit件だけ処理する() {
        let repo = MockNotificationRepository::new();
        let mailer = MockMailer::new();
        let clock = Arc::new(FixedClock::new(Utc::now()));

        // created_at: t1 < t2 < t3
        for id in ["notif_1_t1", "notif_1_t2", "notif_1_t3"] {
            seed_record(&repo, id, clock.now()).await;
            clock.advance(chrono::Duration::seconds(1));
        }

        let dispatcher = Dispatcher::new(
            Arc::new(repo.clone()),
            Arc::new(mailer),
            clock,
            DispatcherSettings {
                batch_limit:         2,
                inter_message_delay: Duration::ZERO,
            },
        );
        let summary = dispatcher.sweep(None).await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.details[0].notification_id, "notif_1_t1");
        assert_eq!(summary.details[1].notification_id, "notif_1_t2");

        // t3 は pending のまま残る
        let t3 = repo
            .find_by_notification_id(&NotificationId::new("notif_1_t3").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(t3.status(), NotificationStatus::Pending);
    }

    #[tokio::test]
    async fn test_明示的な冪等キー指定で対象を絞り込める() {
        let repo = MockNotificationRepository::new();
        let mailer = MockMailer::new();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        seed_record(&repo, "notif_1_a", clock.now()).await;
        seed_record(&repo, "notif_1_b", clock.now()).await;

        let dispatcher = make_dispatcher(repo.clone(), mailer, clock);
        let target = [NotificationId::new("notif_1_b").unwrap()];
        let summary = dispatcher.sweep(Some(&target)).await.unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.details[0].notification_id, "notif_1_b");

        let untouched = repo
            .find_by_notification_id(&NotificationId::new("notif_1_a").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.status(), NotificationStatus::Pending);
    }

    #[tokio::test]
    async fn test_ストア更新失敗が残りのレコードを塞がない() {
        let repo = MockNotificationRepository::new();
        let mailer = MockMailer::new();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        seed_record(&repo, "notif_1_a", clock.now()).await;
        clock.advance(chrono::Duration::seconds(1));
        let second = seed_record(&repo, "notif_1_b", clock.now()).await;

        // 1 件目の mark_sent だけ失敗させる
        repo.fail_next_marks(1);

        let dispatcher = make_dispatcher(repo.clone(), mailer, clock);
        let summary = dispatcher.sweep(None).await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.details[1].outcome, SweepOutcome::Sent);

        // 2 件目は正常に sent へ遷移している
        let stored = repo
            .find_by_notification_id(second.notification_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), NotificationStatus::Sent);
    }
}
