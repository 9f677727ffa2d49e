//! 通知パイプラインの統合テスト
//!
//! キュー投入（EnqueueService）からスイープ（Dispatcher）までを
//! インメモリのモックストア・モックメーラーで通しで検証する。

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use notiflow_dispatch_service::usecase::{
    Dispatcher,
    DispatcherSettings,
    EnqueueService,
    QueueNotificationInput,
    TemplateRenderer,
};
use notiflow_domain::{
    clock::FixedClock,
    notification::{NotificationId, NotificationStatus, NotificationType},
};
use notiflow_infra::mock::{MockMailer, MockNotificationRepository};
use notiflow_infra::repository::NotificationRepository;
use serde_json::json;

struct TestHarness {
    repo:       MockNotificationRepository,
    mailer:     MockMailer,
    clock:      Arc<FixedClock>,
    enqueue:    EnqueueService,
    dispatcher: Dispatcher,
}

fn make_harness(mailer: MockMailer) -> TestHarness {
    let repo = MockNotificationRepository::new();
    let clock = Arc::new(FixedClock::new(Utc::now()));

    let enqueue = EnqueueService::new(
        Arc::new(repo.clone()),
        TemplateRenderer::new().unwrap(),
        clock.clone(),
        3,
    );
    let dispatcher = Dispatcher::new(
        Arc::new(repo.clone()),
        Arc::new(mailer.clone()),
        clock.clone(),
        DispatcherSettings {
            batch_limit:         50,
            inter_message_delay: Duration::ZERO,
        },
    );

    TestHarness {
        repo,
        mailer,
        clock,
        enqueue,
        dispatcher,
    }
}

fn make_input(notification_id: &str, notification_type: NotificationType) -> QueueNotificationInput {
    QueueNotificationInput {
        notification_id: Some(notification_id.to_string()),
        notification_type,
        recipient_email: "klient@example.com".to_string(),
        recipient_name: Some("Jan Kowalski".to_string()),
        data: json!({ "customerName": "Jan Kowalski" }),
        metadata: json!({ "source": "integration-test" }),
        max_retries: None,
    }
}

#[tokio::test]
async fn test_投入からスイープまでの正常系でレコードがsentになる() {
    let harness = make_harness(MockMailer::new());

    harness
        .enqueue
        .queue(make_input("test_1", NotificationType::Test))
        .await
        .unwrap();

    let summary = harness.dispatcher.sweep(None).await.unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.failed, 0);

    // ストア上のレコードで検証する（サマリは便宜ビューにすぎない）
    let stored = harness
        .repo
        .find_by_notification_id(&NotificationId::new("test_1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status(), NotificationStatus::Sent);
    assert!(stored.sent_at().is_some());
    assert_eq!(stored.metadata()["provider_message_id"], "mock-0001");
    // 相関情報は保持される
    assert_eq!(stored.metadata()["source"], "integration-test");

    // 送信されたメールはレコードのレンダリング済みコンテンツと一致する
    let sent = harness.mailer.sent_emails();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "klient@example.com");
    assert_eq!(sent[0].subject, stored.subject());
}

#[tokio::test]
async fn test_常時失敗のトランスポートでは3スイープ後にfailedで凍結される() {
    let harness = make_harness(MockMailer::always_failing());

    harness
        .enqueue
        .queue(make_input("test_fail", NotificationType::Test))
        .await
        .unwrap();

    for _ in 0..3 {
        harness.dispatcher.sweep(None).await.unwrap();
    }

    let stored = harness
        .repo
        .find_by_notification_id(&NotificationId::new("test_fail").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status(), NotificationStatus::Failed);
    assert_eq!(stored.retry_count(), 3);
    assert!(stored.error_message().is_some_and(|m| !m.is_empty()));
    assert!(stored.sent_at().is_none());

    // 4 回目のスイープは何も試行しない
    let fourth = harness.dispatcher.sweep(None).await.unwrap();
    assert_eq!(fourth.total, 0);
    assert_eq!(fourth.sent, 0);
    assert_eq!(fourth.failed, 0);
}

#[tokio::test]
async fn test_対象なしのスイープはゼロサマリを返し書き込みをしない() {
    let harness = make_harness(MockMailer::new());

    let summary = harness.dispatcher.sweep(None).await.unwrap();

    assert_eq!(summary.total, 0);
    assert_eq!(summary.sent, 0);
    assert_eq!(summary.failed, 0);
    assert!(harness.repo.all().is_empty());
    assert!(harness.mailer.sent_emails().is_empty());
}

#[tokio::test]
async fn test_リトライ後の成功でsentに遷移しretry_countが残る() {
    let mailer = MockMailer::new();
    mailer.fail_times(2);
    let harness = make_harness(mailer);

    harness
        .enqueue
        .queue(make_input("test_retry", NotificationType::Test))
        .await
        .unwrap();

    // 2 回失敗
    harness.dispatcher.sweep(None).await.unwrap();
    harness.dispatcher.sweep(None).await.unwrap();
    // 3 回目で成功
    let third = harness.dispatcher.sweep(None).await.unwrap();
    assert_eq!(third.sent, 1);

    let stored = harness
        .repo
        .find_by_notification_id(&NotificationId::new("test_retry").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status(), NotificationStatus::Sent);
    assert_eq!(stored.retry_count(), 2, "送達までに要した失敗回数");
}

#[tokio::test]
async fn test_業務イベント種別が実テンプレートで配信される() {
    let harness = make_harness(MockMailer::new());

    harness
        .enqueue
        .queue(QueueNotificationInput {
            notification_id: Some("bkg_confirm_1".to_string()),
            notification_type: NotificationType::BookingConfirmation,
            recipient_email: "klient@example.com".to_string(),
            recipient_name: None,
            data: json!({
                "serviceName": "Wymiana ekranu",
                "date": "2025-06-15",
                "time": "14:30",
            }),
            metadata: json!({ "bookingId": "bkg_123" }),
            max_retries: None,
        })
        .await
        .unwrap();

    harness.dispatcher.sweep(None).await.unwrap();

    let sent = harness.mailer.sent_emails();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Potwierdzenie rezerwacji wizyty");
    assert!(sent[0].html_body.contains("Wymiana ekranu"));
    // customerName 欠損はプレースホルダで埋まる
    assert!(sent[0].html_body.contains("Nie podano"));
    assert!(!sent[0].text_body.is_empty());
}

#[tokio::test]
async fn test_fifo順にlimitまで処理し古いレコードが飢餓しない() {
    let harness = make_harness(MockMailer::new());

    for id in ["t1", "t2", "t3"] {
        harness
            .enqueue
            .queue(make_input(id, NotificationType::Test))
            .await
            .unwrap();
        harness.clock.advance(chrono::Duration::seconds(1));
    }

    let dispatcher = Dispatcher::new(
        Arc::new(harness.repo.clone()),
        Arc::new(harness.mailer.clone()),
        harness.clock.clone(),
        DispatcherSettings {
            batch_limit:         2,
            inter_message_delay: Duration::ZERO,
        },
    );

    let summary = dispatcher.sweep(None).await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.details[0].notification_id, "t1");
    assert_eq!(summary.details[1].notification_id, "t2");

    let t3 = harness
        .repo
        .find_by_notification_id(&NotificationId::new("t3").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(t3.status(), NotificationStatus::Pending);

    // 次のスイープで t3 が処理される
    let second = dispatcher.sweep(None).await.unwrap();
    assert_eq!(second.total, 1);
    assert_eq!(second.details[0].notification_id, "t3");
}

#[tokio::test]
async fn test_同じ冪等キーの再投入は重複レコードを作らない() {
    let harness = make_harness(MockMailer::new());

    let first = harness
        .enqueue
        .queue(make_input("dup_1", NotificationType::Test))
        .await
        .unwrap();
    let second = harness
        .enqueue
        .queue(make_input("dup_1", NotificationType::Test))
        .await
        .unwrap();

    assert!(!first.already_queued);
    assert!(second.already_queued);
    assert_eq!(harness.repo.all().len(), 1);

    // スイープしても送信は 1 通だけ
    harness.dispatcher.sweep(None).await.unwrap();
    assert_eq!(harness.mailer.sent_emails().len(), 1);
}

#[tokio::test]
async fn test_sent後のレコードは以降のスイープで変化しない() {
    let harness = make_harness(MockMailer::new());

    harness
        .enqueue
        .queue(make_input("immutable_1", NotificationType::Test))
        .await
        .unwrap();
    harness.dispatcher.sweep(None).await.unwrap();

    let after_first = harness
        .repo
        .find_by_notification_id(&NotificationId::new("immutable_1").unwrap())
        .await
        .unwrap()
        .unwrap();

    harness.clock.advance(chrono::Duration::minutes(5));
    harness.dispatcher.sweep(None).await.unwrap();

    let after_second = harness
        .repo
        .find_by_notification_id(&NotificationId::new("immutable_1").unwrap())
        .await
        .unwrap()
        .unwrap();

    // status・sent_at・コンテンツとも変化しない（終端状態の単調性）
    assert_eq!(after_second, after_first);
}
