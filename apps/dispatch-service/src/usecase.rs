//! # ユースケース層
//!
//! Dispatch Service のビジネスロジックを実装する。
//!
//! ## 設計方針
//!
//! - **依存性注入**: リポジトリ・メーラー・時計を `Arc<dyn Trait>` で外部から注入
//! - **薄いハンドラ**: ハンドラは薄く保ち、ロジックはユースケースに集約

pub mod notification;

pub use notification::{
    Dispatcher,
    DispatcherSettings,
    EnqueueService,
    QueueNotificationInput,
    SweepSummary,
    TemplateRenderer,
};
