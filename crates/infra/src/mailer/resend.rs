//! Resend 通知送信実装
//!
//! Resend のトランザクショナルメール HTTP API
//! （`POST /emails`）を使用してメールを送信する。本番環境で使用する。

use std::time::Duration;

use async_trait::async_trait;
use notiflow_domain::notification::{EmailMessage, NotificationError};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use super::{Mailer, SendReceipt};

/// Resend API のデフォルトエンドポイント
const DEFAULT_ENDPOINT: &str = "https://api.resend.com";

/// 成功応答（2xx）のボディ
#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Resend 通知送信
///
/// `reqwest::Client` をラップする。リクエストタイムアウトを超えた送信は
/// `SendFailed`（リトライ対象）として扱われる。
pub struct ResendMailer {
    client:       reqwest::Client,
    api_key:      String,
    from_address: String,
    endpoint:     String,
}

impl ResendMailer {
    /// 新しい Resend 送信インスタンスを作成
    ///
    /// # 引数
    ///
    /// - `api_key`: Resend の API キー（Bearer トークン）
    /// - `from_address`: 送信元メールアドレス（Resend で検証済みドメインであること）
    /// - `request_timeout`: 1 送信あたりのリクエストタイムアウト
    pub fn new(
        api_key: String,
        from_address: String,
        request_timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NotificationError::SendFailed {
                status:  None,
                message: format!("HTTP クライアントの初期化に失敗: {e}"),
            })?;

        Ok(Self {
            client,
            api_key,
            from_address,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    /// エンドポイントを差し替える（プロキシ・ローカルスタブ用）
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// 送信リクエストのボディを組み立てる
///
/// 宛先表示名がある場合は `"Jan Kowalski <jan@example.com>"` 形式にする。
fn build_payload(from_address: &str, email: &EmailMessage) -> JsonValue {
    let to = match &email.recipient_name {
        Some(name) => format!("{name} <{}>", email.to),
        None => email.to.clone(),
    };

    json!({
        "from": from_address,
        "to": [to],
        "subject": email.subject,
        "html": email.html_body,
        "text": email.text_body,
    })
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send_email(&self, email: &EmailMessage) -> Result<SendReceipt, NotificationError> {
        let payload = build_payload(&self.from_address, email);

        let response = self
            .client
            .post(format!("{}/emails", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed {
                status:  None,
                message: format!("リクエスト送信失敗: {e}"),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NotificationError::SendFailed {
                status:  Some(status.as_u16()),
                message: format!("レスポンスボディの読み取りに失敗: {e}"),
            })?;

        if !status.is_success() {
            return Err(NotificationError::SendFailed {
                status:  Some(status.as_u16()),
                message: body,
            });
        }

        let parsed: SendResponse =
            serde_json::from_str(&body).map_err(|e| NotificationError::SendFailed {
                status:  Some(status.as_u16()),
                message: format!("レスポンスの解析に失敗: {e}"),
            })?;

        Ok(SendReceipt {
            provider_message_id: Some(parsed.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ResendMailer>();
    }

    fn make_email(recipient_name: Option<&str>) -> EmailMessage {
        EmailMessage {
            to:             "klient@example.com".to_string(),
            recipient_name: recipient_name.map(str::to_string),
            subject:        "Potwierdzenie rezerwacji".to_string(),
            html_body:      "<p>Dziękujemy!</p>".to_string(),
            text_body:      "Dziękujemy!".to_string(),
        }
    }

    #[test]
    fn test_build_payloadが契約どおりのjsonを組み立てる() {
        let payload = build_payload("serwis@example.com", &make_email(None));

        assert_eq!(
            payload,
            json!({
                "from": "serwis@example.com",
                "to": ["klient@example.com"],
                "subject": "Potwierdzenie rezerwacji",
                "html": "<p>Dziękujemy!</p>",
                "text": "Dziękujemy!",
            })
        );
    }

    #[test]
    fn test_build_payloadが表示名付きの宛先を組み立てる() {
        let payload = build_payload("serwis@example.com", &make_email(Some("Jan Kowalski")));

        assert_eq!(payload["to"][0], "Jan Kowalski <klient@example.com>");
    }
}
