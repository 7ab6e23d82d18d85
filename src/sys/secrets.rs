// src/sys/secrets.rs

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

/// Temporary AWS credentials as returned by STS and stored in the CLI cache.
///
/// 1. The secret key and session token cannot be accidentally logged
///    (`{:?}` prints `[REDACTED]` for both).
/// 2. When the struct goes out of scope both secrets are zeroized.
///
/// Cached credentials always carry an expiration; there is no non-expiring form.
#[derive(Debug)]
pub struct Credentials {
    pub access_key_id: String,
    secret_access_key: SecretString,
    session_token: SecretString,
    pub expiration: DateTime<Utc>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::new(secret_access_key.into()),
            session_token: SecretString::new(session_token.into()),
            expiration,
        }
    }

    /// Exposes the secret key for serialization. Keep the borrow short.
    pub fn secret_access_key(&self) -> &str {
        self.secret_access_key.expose_secret()
    }

    /// Exposes the session token for serialization. Keep the borrow short.
    pub fn session_token(&self) -> &str {
        self.session_token.expose_secret()
    }

    /// Expired at or after `now`: an expiration equal to now is already stale.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}
