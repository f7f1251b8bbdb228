//! Gateway errors and failure classification

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway answered with an error body
    #[error("Gateway API error ({http_status}): {message}")]
    Api {
        http_status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Gateway call timed out after {0} ms")]
    Timeout(u64),

    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Gateway response decode error: {0}")]
    Decode(String),
}

/// What a gateway error means for the transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayErrorClass {
    /// Terminal: the payout cannot succeed without payee action
    Failed(String),
    /// Rejected for a reason that may clear up; caller may retry
    SubmissionError(Option<String>),
    /// No answer; the gateway may or may not have acted
    Unknown,
}

impl GatewayError {
    /// Structured code of an API error, parsed from the message if absent
    pub fn error_code(&self) -> Option<String> {
        match self {
            GatewayError::Api { code, message, .. } => extract_error_code(code.as_deref(), message),
            _ => None,
        }
    }

    pub fn classify(&self, failed_codes: &[String]) -> GatewayErrorClass {
        match self {
            GatewayError::Api { .. } => match self.error_code() {
                Some(code) if failed_codes.iter().any(|c| c == &code) => {
                    GatewayErrorClass::Failed(code)
                }
                code => GatewayErrorClass::SubmissionError(code),
            },
            GatewayError::Timeout(_) | GatewayError::Transport(_) | GatewayError::Decode(_) => {
                GatewayErrorClass::Unknown
            }
        }
    }
}

/// Prefer the explicit code; otherwise recognize well-known messages.
pub fn extract_error_code(code: Option<&str>, message: &str) -> Option<String> {
    if let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) {
        return Some(code.to_string());
    }

    let msg = message.to_lowercase();
    if msg.contains("no external account") || msg.contains("no bank account") {
        return Some("no_external_account".to_string());
    }
    if msg.contains("payouts")
        && (msg.contains("not allowed")
            || msg.contains("disabled")
            || msg.contains("cannot currently make"))
    {
        return Some("payouts_not_allowed".to_string());
    }
    if msg.contains("insufficient funds") {
        return Some("balance_insufficient".to_string());
    }
    None
}
