use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a per-item failure, stored alongside the item so
/// clients and the retry path can tell local validation failures apart
/// from relayer-side ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The recipient or product failed validation before dispatch.
    /// Items with this kind never reached the relayer.
    Validation,
    /// The relayer rejected the transaction or it reverted on chain.
    Chain,
    /// The relayer did not answer within the per-item deadline.
    Timeout,
    /// A certificate for this product + recipient already exists.
    Duplicate,
    /// Anything we could not classify.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            Validation => "validation",
            Chain => "chain",
            Timeout => "timeout",
            Duplicate => "duplicate",
            Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ErrorKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        use ErrorKind::*;
        match value {
            "validation" => Ok(Validation),
            "chain" => Ok(Chain),
            "timeout" => Ok(Timeout),
            "duplicate" => Ok(Duplicate),
            "unknown" => Ok(Unknown),
            _ => Err(format!("invalid error kind: '{}'", value)),
        }
    }
}
