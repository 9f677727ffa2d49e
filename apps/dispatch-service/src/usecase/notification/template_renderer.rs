//! # テンプレートレンダラー
//!
//! tera テンプレートエンジンで通知メールを HTML/plaintext 両形式で生成する。
//!
//! ## 設計方針
//!
//! - **`include_str!` によるコンパイル時埋め込み**: テンプレートはバイナリに埋め込まれる
//! - **閉じた種別ディスパッチ**: テンプレート選択は [`NotificationType`] の
//!   match で行う。種別の追加はコンパイル時に検査される列挙可能な変更になる
//! - **欠損フィールドはデフォルト値**: 任意フィールドの欠損では決して
//!   エラーにせず、"Nie podano"（未記入）等のプレースホルダで埋める
//! - **plaintext はフォールバック生成**: `.txt` テンプレートが無い種別は
//!   HTML からタグ除去・空白圧縮で導出する

use std::sync::OnceLock;

use notiflow_domain::notification::{NotificationError, NotificationType};
use regex::Regex;
use serde_json::Value as JsonValue;
use tera::{Context, Tera};

/// レンダリング済みメッセージ
///
/// レコード作成時に一度だけ生成され、そのまま DB に永続化される
/// （配信時の再レンダリングは行わない）。
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub subject: String,
    pub html:    String,
    pub text:    String,
}

/// 任意フィールドの共通プレースホルダ（ポーランド語: 未記入）
const NOT_PROVIDED: &str = "Nie podano";

/// テンプレートレンダラー
///
/// tera テンプレートエンジンをラップし、通知種別とデータバッグから
/// [`RenderedMessage`] を生成する。
pub struct TemplateRenderer {
    engine: Tera,
}

impl TemplateRenderer {
    /// 新しいレンダラーインスタンスを作成
    ///
    /// `include_str!` で埋め込んだテンプレートを tera に登録する。
    pub fn new() -> Result<Self, NotificationError> {
        let mut engine = Tera::default();

        engine
            .add_raw_templates(vec![
                (
                    "booking_confirmation.html",
                    include_str!("../../../templates/notifications/booking_confirmation.html"),
                ),
                (
                    "booking_confirmation.txt",
                    include_str!("../../../templates/notifications/booking_confirmation.txt"),
                ),
                (
                    "repair_request.html",
                    include_str!("../../../templates/notifications/repair_request.html"),
                ),
                (
                    "repair_status_update.html",
                    include_str!("../../../templates/notifications/repair_status_update.html"),
                ),
                (
                    "repair_ready.html",
                    include_str!("../../../templates/notifications/repair_ready.html"),
                ),
                (
                    "repair_ready.txt",
                    include_str!("../../../templates/notifications/repair_ready.txt"),
                ),
                (
                    "appointment_reminder.html",
                    include_str!("../../../templates/notifications/appointment_reminder.html"),
                ),
                (
                    "email_confirmation.html",
                    include_str!("../../../templates/notifications/email_confirmation.html"),
                ),
                (
                    "test.html",
                    include_str!("../../../templates/notifications/test.html"),
                ),
            ])
            .map_err(|e| NotificationError::TemplateFailed(e.to_string()))?;

        Ok(Self { engine })
    }

    /// 通知種別とデータバッグからメッセージを生成する
    ///
    /// # Errors
    ///
    /// - `NotificationError::TemplateFailed`: 必須フィールドの欠損
    ///   （`repair_status_update` の `status`）またはテンプレート展開失敗
    pub fn render(
        &self,
        notification_type: NotificationType,
        data: &JsonValue,
    ) -> Result<RenderedMessage, NotificationError> {
        let (template_name, subject, context) =
            self.build_template_params(notification_type, data)?;

        let html = self
            .engine
            .render(&format!("{template_name}.html"), &context)
            .map_err(|e| NotificationError::TemplateFailed(e.to_string()))?;

        // .txt テンプレートがある種別はそれを使い、無ければ HTML から導出する
        let text_template = format!("{template_name}.txt");
        let text = if self.engine.get_template_names().any(|n| n == text_template) {
            self.engine
                .render(&text_template, &context)
                .map_err(|e| NotificationError::TemplateFailed(e.to_string()))?
        } else {
            html_to_text(&html)
        };

        Ok(RenderedMessage {
            subject,
            html,
            text,
        })
    }

    /// テンプレート名、件名、コンテキストを構築する
    ///
    /// コンテキストは常に全プレースホルダが埋まった状態で返す
    /// （テンプレート側に default フィルタを書かずに済ませる）。
    fn build_template_params(
        &self,
        notification_type: NotificationType,
        data: &JsonValue,
    ) -> Result<(&'static str, String, Context), NotificationError> {
        let mut context = Context::new();

        let params = match notification_type {
            NotificationType::BookingConfirmation => {
                context.insert("customer_name", str_field_or(data, "customerName", NOT_PROVIDED));
                context.insert("service_name", str_field_or(data, "serviceName", NOT_PROVIDED));
                context.insert("date", str_field_or(data, "date", NOT_PROVIDED));
                context.insert("time", str_field_or(data, "time", NOT_PROVIDED));
                (
                    "booking_confirmation",
                    "Potwierdzenie rezerwacji wizyty".to_string(),
                )
            }
            NotificationType::RepairRequest => {
                context.insert("customer_name", str_field_or(data, "customerName", NOT_PROVIDED));
                context.insert("device", str_field_or(data, "device", NOT_PROVIDED));
                context.insert(
                    "problem_description",
                    str_field_or(data, "problemDescription", NOT_PROVIDED),
                );
                let subject = match str_field(data, "ticketNumber") {
                    Some(ticket) => {
                        context.insert("ticket_number", ticket);
                        format!("Zgłoszenie naprawy przyjęte ({ticket})")
                    }
                    None => {
                        context.insert("ticket_number", NOT_PROVIDED);
                        "Zgłoszenie naprawy przyjęte".to_string()
                    }
                };
                ("repair_request", subject)
            }
            NotificationType::RepairStatusUpdate => {
                // status はこの種別の必須フィールド
                let status = str_field(data, "status").ok_or_else(|| {
                    NotificationError::TemplateFailed(
                        "repair_status_update には data.status が必要です".to_string(),
                    )
                })?;
                let label = status_label(status);
                context.insert("status_label", &label);
                context.insert("ticket_number", str_field_or(data, "ticketNumber", NOT_PROVIDED));
                context.insert("device", str_field_or(data, "device", NOT_PROVIDED));
                (
                    "repair_status_update",
                    format!("Aktualizacja statusu naprawy: {label}"),
                )
            }
            NotificationType::RepairReady => {
                context.insert("customer_name", str_field_or(data, "customerName", NOT_PROVIDED));
                context.insert("device", str_field_or(data, "device", NOT_PROVIDED));
                context.insert("ticket_number", str_field_or(data, "ticketNumber", NOT_PROVIDED));
                (
                    "repair_ready",
                    "Twój sprzęt jest gotowy do odbioru".to_string(),
                )
            }
            NotificationType::AppointmentReminder => {
                context.insert("customer_name", str_field_or(data, "customerName", NOT_PROVIDED));
                context.insert("service_name", str_field_or(data, "serviceName", NOT_PROVIDED));
                context.insert("date", str_field_or(data, "date", NOT_PROVIDED));
                context.insert("time", str_field_or(data, "time", NOT_PROVIDED));
                (
                    "appointment_reminder",
                    "Przypomnienie o wizycie".to_string(),
                )
            }
            NotificationType::EmailConfirmation => {
                context.insert("customer_name", str_field_or(data, "customerName", NOT_PROVIDED));
                // confirmationUrl が無い場合はデッドリンクとしてレンダリングする
                context.insert("confirmation_url", str_field_or(data, "confirmationUrl", "#"));
                (
                    "email_confirmation",
                    "Potwierdź swój adres e-mail".to_string(),
                )
            }
            NotificationType::Test => {
                context.insert(
                    "message",
                    str_field_or(data, "message", "Test systemu powiadomień"),
                );
                ("test", "Test systemu powiadomień".to_string())
            }
        };

        let (template_name, subject) = params;
        Ok((template_name, subject, context))
    }
}

/// データバッグから文字列フィールドを取り出す
fn str_field<'a>(data: &'a JsonValue, key: &str) -> Option<&'a str> {
    data.get(key)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// データバッグから文字列フィールドを取り出す（欠損時はデフォルト値）
fn str_field_or<'a>(data: &'a JsonValue, key: &str, default: &'a str) -> &'a str {
    str_field(data, key).unwrap_or(default)
}

/// 修理ステータス値を表示ラベルに変換する
///
/// ステータス語彙は今後も増えるため、未知の値はエラーにせず
/// そのまま通す。
pub fn status_label(status: &str) -> String {
    match status {
        "pending" => "Oczekuje na przyjęcie",
        "accepted" => "Przyjęty do serwisu",
        "diagnosing" => "W trakcie diagnozy",
        "in_repair" => "W trakcie naprawy",
        "waiting_for_parts" => "Oczekiwanie na części",
        "ready" => "Gotowy do odbioru",
        "completed" => "Zakończony",
        "cancelled" => "Anulowany",
        other => return other.to_string(),
    }
    .to_string()
}

/// HTML からプレーンテキストを導出する
///
/// タグを除去し、基本エンティティをデコードし、連続する空白を 1 つに
/// 圧縮する。`.txt` テンプレートを持たない種別のフォールバック。
fn html_to_text(html: &str) -> String {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    static WS_RE: OnceLock<Regex> = OnceLock::new();

    let tag_re = TAG_RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap());
    let ws_re = WS_RE.get_or_init(|| Regex::new(r"\s+").unwrap());

    let without_tags = tag_re.replace_all(html, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    ws_re.replace_all(&decoded, " ").trim().to_string()
}
