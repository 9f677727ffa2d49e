//! # HTTP リクエストハンドラ
//!
//! axum のルートに対応するハンドラ関数を定義する。
//!
//! ## 設計方針
//!
//! - 各ハンドラはサブモジュールに配置
//! - 親モジュール（この `handler.rs`）で re-export し、フラットな API を提供
//! - ハンドラは薄く保ち、ビジネスロジックはユースケース層に委譲

pub mod dispatch;
pub mod health;
pub mod notification;

pub use dispatch::{DispatchState, run_dispatch};
pub use health::{ReadinessState, health_check, readiness_check};
pub use notification::{NotificationState, get_notification, queue_notification};
