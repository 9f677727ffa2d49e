//! # 値オブジェクト
//!
//! 識別子を持たない不変の値を定義する。

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// メールアドレス（配信先・送信元）
///
/// RFC 5321 の完全なバリデーションは行わない。配信可否は最終的に
/// メールプロバイダが判定するため、ここでは「明らかに不正な値を
/// 早期に弾く」ことだけを責務とする:
///
/// - 前後の空白を除去
/// - 空文字列を拒否
/// - `@` をちょうど 1 つ含み、ローカル部・ドメイン部が空でないこと
/// - 254 文字以内（SMTP パス長の上限）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_string();

        if value.is_empty() {
            return Err(DomainError::Validation(
                "メールアドレスは必須です".to_string(),
            ));
        }

        if value.chars().count() > 254 {
            return Err(DomainError::Validation(
                "メールアドレスは 254 文字以内である必要があります".to_string(),
            ));
        }

        let mut parts = value.splitn(2, '@');
        let local = parts.next().unwrap_or_default();
        let domain = parts.next().unwrap_or_default();
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(DomainError::Validation(format!(
                "不正なメールアドレス形式です: {value}"
            )));
        }

        Ok(Self(value))
    }

    /// 文字列参照を取得する
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 所有権を持つ文字列に変換する
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_正常なメールアドレスを受け付ける() {
        let email = EmailAddress::new("klient@example.com").unwrap();
        assert_eq!(email.as_str(), "klient@example.com");
    }

    #[test]
    fn test_前後の空白を除去する() {
        let email = EmailAddress::new("  klient@example.com  ").unwrap();
        assert_eq!(email.as_str(), "klient@example.com");
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("bez-malpy")]
    #[case("@example.com")]
    #[case("klient@")]
    #[case("a@b@c")]
    fn test_不正なメールアドレスを拒否する(#[case] value: &str) {
        assert!(EmailAddress::new(value).is_err());
    }

    #[test]
    fn test_254文字を超えるアドレスを拒否する() {
        let long = format!("{}@example.com", "a".repeat(250));
        assert!(EmailAddress::new(long).is_err());
    }

    #[test]
    fn test_displayが平文のアドレスを出力する() {
        let email = EmailAddress::new("klient@example.com").unwrap();
        assert_eq!(email.to_string(), "klient@example.com");
    }
}
