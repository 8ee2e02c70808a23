use crate::domain::types::{AccountId, OrderId};
use thiserror::Error;

/// Errors raised while talking to the brokerage gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {message} (code {code:?})")]
    Auth { code: Option<i64>, message: String },

    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("gateway refused request: {message} (code {code})")]
    Refused { code: i64, message: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Transient errors are retried by the caller's backoff policy.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::RateLimited | GatewayError::Transport(_) => true,
            GatewayError::Http { status, .. } => *status >= 500,
            GatewayError::Auth { .. } | GatewayError::Refused { .. } | GatewayError::Malformed(_) => {
                false
            }
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, GatewayError::Auth { .. })
            || matches!(self, GatewayError::Http { status: 401, .. })
    }
}

/// Errors surfaced by the enforcement executor after its retry policy is
/// exhausted.
#[derive(Debug, Error)]
pub enum EnforcementError {
    #[error("remediation refused for account {account_id}: {detail}")]
    Refused { account_id: AccountId, detail: String },

    #[error("retries exhausted for account {account_id} after {attempts} attempts: {detail}")]
    RetriesExhausted {
        account_id: AccountId,
        attempts: u32,
        detail: String,
    },

    #[error("order {order_id} not modifiable for account {account_id}: {detail}")]
    NotModifiable {
        account_id: AccountId,
        order_id: OrderId,
        detail: String,
    },
}

/// Configuration validation failures. The daemon refuses to start on any of
/// these; every message names the account and field at fault.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("account {account_id}: field `{field}`: {detail}")]
    InvalidAccountField {
        account_id: AccountId,
        field: &'static str,
        detail: String,
    },

    #[error("rule `{rule}` for account {account_id}: field `{field}`: {detail}")]
    InvalidRuleField {
        account_id: AccountId,
        rule: &'static str,
        field: &'static str,
        detail: String,
    },

    #[error("config file {path}: {detail}")]
    UnreadableFile { path: String, detail: String },

    #[error("environment variable `{name}` referenced by {context} is not set")]
    MissingEnvVar { name: String, context: String },

    #[error("duplicate account id {account_id} in accounts file")]
    DuplicateAccount { account_id: AccountId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(GatewayError::RateLimited.is_transient());
        assert!(
            GatewayError::Http {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !GatewayError::Http {
                status: 404,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !GatewayError::Refused {
                code: 2,
                message: "no such order".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn auth_classification() {
        assert!(
            GatewayError::Http {
                status: 401,
                body: String::new()
            }
            .is_auth()
        );
        assert!(!GatewayError::RateLimited.is_auth());
    }

    #[test]
    fn config_error_names_account_and_field() {
        let err = ConfigError::InvalidRuleField {
            account_id: 7,
            rule: "daily_realized_loss",
            field: "limit",
            detail: "must be negative".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains('7'));
        assert!(msg.contains("limit"));
        assert!(msg.contains("daily_realized_loss"));
    }
}
