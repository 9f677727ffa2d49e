//! # NotiFlow インフラ層
//!
//! 外部システムとの接続・通信を担当するインフラストラクチャ層。
//!
//! ## 責務
//!
//! - **データベース接続**: PostgreSQL への接続プール管理とマイグレーション
//! - **リポジトリ実装**: 通知アウトボックスの永続化
//!   （[`repository::NotificationRepository`]）
//! - **メールトランスポート**: メールプロバイダへの送信
//!   （[`mailer::Mailer`]: Resend HTTP API / SMTP / Noop）
//!
//! ## 依存関係
//!
//! ```text
//! dispatch-service → infra → domain → shared
//! ```
//!
//! インフラ層は `domain` に依存する。
//! ドメイン層はインフラ層に依存しない（依存性逆転の原則）。
//!
//! ## モジュール構成
//!
//! - [`db`] - PostgreSQL データベース接続管理
//! - [`error`] - インフラ層エラー定義
//! - [`repository`] - 通知リポジトリ実装
//! - [`mailer`] - メールトランスポート実装
//! - [`mock`] - テスト用インメモリ実装（`test-utils` feature）

pub mod db;
pub mod error;
pub mod mailer;
pub mod repository;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{InfraError, InfraErrorKind};
