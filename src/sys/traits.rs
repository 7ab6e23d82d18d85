use async_trait::async_trait;

use crate::error::{MfaError, RetrieveError};
use crate::sys::secrets::Credentials;

// ==============================================================================
// 1. MFA Token Acquisition
// ==============================================================================

#[async_trait]
pub trait MfaTokenSource: Send + Sync {
    /// Produces one one-time code.
    /// 🛡️ Implementations talk to the controlling terminal only, never to
    /// stdout/stderr, so the JSON written by the broker stays parseable.
    async fn obtain(&self) -> Result<String, MfaError>;
}

// ==============================================================================
// 2. Upstream Credential Retrieval
// ==============================================================================

#[async_trait]
pub trait CredentialRetriever: Send + Sync {
    /// Runs the upstream exchange once. No retries: failures go straight back
    /// to the caller.
    async fn retrieve(&self) -> Result<Credentials, RetrieveError>;
}
