use std::fmt;

use serde::{Deserialize, Serialize};

// -----------------
// ContactMethod
// -----------------

/// How a certificate recipient is addressed. Determines which grammar
/// [`validate_recipient`] checks the address against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    Email,
    Sms,
    Wallet,
}

impl ContactMethod {
    pub fn as_str(&self) -> &'static str {
        use ContactMethod::*;
        match self {
            Email => "email",
            Sms => "sms",
            Wallet => "wallet",
        }
    }
}

impl fmt::Display for ContactMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ContactMethod {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        use ContactMethod::*;
        match value {
            "email" => Ok(Email),
            "sms" => Ok(Sms),
            "wallet" => Ok(Wallet),
            _ => Err(format!("invalid contact method: '{}'", value)),
        }
    }
}

// -----------------
// Recipient
// -----------------

/// A contact descriptor for one certificate recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    pub contact_method: ContactMethod,
}

impl Recipient {
    pub fn email<S: Into<String>>(address: S) -> Self {
        Self {
            address: address.into(),
            contact_method: ContactMethod::Email,
        }
    }

    pub fn sms<S: Into<String>>(address: S) -> Self {
        Self {
            address: address.into(),
            contact_method: ContactMethod::Sms,
        }
    }

    pub fn wallet<S: Into<String>>(address: S) -> Self {
        Self {
            address: address.into(),
            contact_method: ContactMethod::Wallet,
        }
    }
}

// -----------------
// Validation
// -----------------

/// Validates a recipient address against its declared contact method.
/// Pure and deterministic, called once per batch item before dispatch.
/// Returns the rejection reason on failure.
pub fn validate_recipient(
    address: &str,
    method: ContactMethod,
) -> Result<(), String> {
    match method {
        ContactMethod::Email => validate_email(address),
        ContactMethod::Sms => validate_phone(address),
        ContactMethod::Wallet => validate_wallet(address),
    }
}

fn validate_email(address: &str) -> Result<(), String> {
    let Some((local, domain)) = address.split_once('@') else {
        return Err("email is missing '@'".to_string());
    };
    if local.is_empty() {
        return Err("email has an empty local part".to_string());
    }
    if address.chars().any(char::is_whitespace) {
        return Err("email contains whitespace".to_string());
    }
    if domain.contains('@') {
        return Err("email contains more than one '@'".to_string());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(format!("email domain '{}' is not dotted", domain));
    }
    let label_ok = |l: &&str| {
        l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    if !labels.iter().all(label_ok) {
        return Err(format!("email domain '{}' has invalid labels", domain));
    }
    Ok(())
}

fn validate_phone(address: &str) -> Result<(), String> {
    // E.164: leading '+', nonzero first digit, 8..=15 digits total
    let Some(digits) = address.strip_prefix('+') else {
        return Err("phone number must start with '+'".to_string());
    };
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err("phone number contains non-digits".to_string());
    }
    if digits.starts_with('0') {
        return Err("phone country code cannot start with 0".to_string());
    }
    if !(8..=15).contains(&digits.len()) {
        return Err(format!(
            "phone number has {} digits, expected 8..=15",
            digits.len()
        ));
    }
    Ok(())
}

fn validate_wallet(address: &str) -> Result<(), String> {
    let Some(hex) = address.strip_prefix("0x") else {
        return Err("wallet address must start with '0x'".to_string());
    };
    if hex.len() != 40 {
        return Err(format!(
            "wallet address has {} hex chars, expected 40",
            hex.len()
        ));
    }
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("wallet address contains non-hex chars".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

    #[test]
    fn test_valid_emails() {
        for addr in [
            "a@b.co",
            "jane.doe@factory.example.com",
            "ops+batch@mill-east.io",
        ] {
            assert_eq!(
                validate_recipient(addr, ContactMethod::Email),
                Ok(()),
                "{addr}"
            );
        }
    }

    #[test]
    fn test_invalid_emails() {
        for addr in [
            "",
            "no-at-sign",
            "@example.com",
            "a@no-dot",
            "a@dot.",
            "two@@example.com",
            "spa ce@example.com",
        ] {
            assert!(
                validate_recipient(addr, ContactMethod::Email).is_err(),
                "{addr}"
            );
        }
    }

    #[test]
    fn test_valid_phones() {
        for addr in ["+14155550132", "+4915112345678", "+85212345678"] {
            assert_eq!(
                validate_recipient(addr, ContactMethod::Sms),
                Ok(()),
                "{addr}"
            );
        }
    }

    #[test]
    fn test_invalid_phones() {
        for addr in [
            "14155550132",
            "+0415555013",
            "+1-415-555-0132",
            "+1234567",
            "+1234567890123456",
        ] {
            assert!(
                validate_recipient(addr, ContactMethod::Sms).is_err(),
                "{addr}"
            );
        }
    }

    #[test]
    fn test_valid_wallets() {
        assert_eq!(validate_recipient(WALLET, ContactMethod::Wallet), Ok(()));
        let lower = WALLET.to_lowercase();
        assert_eq!(validate_recipient(&lower, ContactMethod::Wallet), Ok(()));
    }

    #[test]
    fn test_invalid_wallets() {
        for addr in [
            "",
            "52908400098527886E0F7030069857D2E4169EE7",
            "0x5290840009852",
            "0xZZ908400098527886E0F7030069857D2E4169EE7",
            "0x52908400098527886E0F7030069857D2E4169EE70",
        ] {
            assert!(
                validate_recipient(addr, ContactMethod::Wallet).is_err(),
                "{addr}"
            );
        }
    }

    #[test]
    fn test_method_grammars_do_not_cross() {
        assert!(validate_recipient(WALLET, ContactMethod::Email).is_err());
        assert!(
            validate_recipient("a@b.co", ContactMethod::Wallet).is_err()
        );
    }

    #[test]
    fn test_contact_method_serde_shape() {
        let json = serde_json::to_string(&ContactMethod::Wallet).unwrap();
        assert_eq!(json, "\"wallet\"");
    }
}
