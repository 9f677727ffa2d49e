//! # 通知ユースケース
//!
//! 通知のキュー投入（プロデューサ境界）とバッチ配信（ディスパッチャ）を実装する。
//!
//! ## モジュール構成
//!
//! - [`template_renderer`] - tera テンプレートエンジンによるメール生成
//! - [`enqueue`] - レンダリング + アウトボックス投入
//! - [`dispatcher`] - スイープ（取得 → 送信 → 記録）

pub mod dispatcher;
pub mod enqueue;
pub mod template_renderer;

pub use dispatcher::{Dispatcher, DispatcherSettings, SweepDetail, SweepOutcome, SweepSummary};
pub use enqueue::{EnqueueService, QueueNotificationInput, QueueOutcome};
pub use template_renderer::{RenderedMessage, TemplateRenderer};
