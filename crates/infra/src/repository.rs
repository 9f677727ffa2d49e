//! # リポジトリ実装
//!
//! 通知アウトボックスの永続化を担当するリポジトリを提供する。
//!
//! ## 設計方針
//!
//! - **依存性逆転**: トレイトで抽象化し、ユースケース層からモック可能に
//! - **データベース抽象化**: sqlx を使用し、PostgreSQL 固有の処理をカプセル化
//! - **単一ステートメント書き込み**: 各操作は 1 本の原子的な SQL であり、
//!   並行スイープに対して安全（at-least-once 配信）

pub mod notification_repository;

pub use notification_repository::{NotificationRepository, PostgresNotificationRepository};
