//! # API レスポンスエンベロープ
//!
//! 管理 API の統一レスポンス形式 `{ "data": T }` を提供する。

use serde::{Deserialize, Serialize};

/// 管理 API の統一レスポンス型
///
/// 通知の投入・照会エンドポイントは `{ "data": T }` 形式でレスポンスを返す。
/// ディスパッチエンドポイントのみ例外で、`{ "success": …, … }`
/// 形式のサマリを直接返す（外部スケジューラとの契約のため）。
///
/// ## 使用例
///
/// ```
/// use notiflow_shared::ApiResponse;
///
/// let response = ApiResponse::new("queued");
/// assert_eq!(response.data, "queued");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    /// 新しい `ApiResponse` を作成する
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializeを正しいjson形状にする() {
        let response = ApiResponse::new("queued");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json, serde_json::json!({ "data": "queued" }));
    }

    #[test]
    fn test_deserializeでjsonからオブジェクトに変換する() {
        let json = r#"{"data": "sent"}"#;
        let response: ApiResponse<String> = serde_json::from_str(json).unwrap();

        assert_eq!(response.data, "sent");
    }

    #[test]
    fn test_構造体ペイロードをシリアライズする() {
        #[derive(Serialize)]
        struct Payload {
            notification_id: &'static str,
        }

        let response = ApiResponse::new(Payload {
            notification_id: "notif_1718000000000_abc123",
        });
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(
            json,
            serde_json::json!({ "data": { "notification_id": "notif_1718000000000_abc123" } })
        );
    }
}
