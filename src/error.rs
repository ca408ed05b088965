use thiserror::Error;

/// Errors and security decisions surfaced by the engine.
///
/// Decision variants are deliberately precise so callers can present exact
/// but non-leaky responses; none of them reveal whether a lockout was
/// identifier- or IP-triggered.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("secret rejected: {0}")]
    WeakSecret(String),
    #[error("secret not found: {0}")]
    SecretNotFound(String),
    #[error("encryption failure: {0}")]
    Crypto(String),
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
    #[error("refresh token revoked or unknown")]
    RefreshReuse,
    #[error("account locked")]
    AccountLocked,
    #[error("blocked by threat detection")]
    ThreatBlocked,
    #[error("two-factor authentication not enrolled")]
    TwoFactorNotEnrolled,
    #[error("two-factor enrollment not verified")]
    TwoFactorNotVerified,
    #[error("internal state error: {0}")]
    Internal(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
