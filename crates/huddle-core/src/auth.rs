//! Connect-time authentication.
//!
//! The gate runs before anything else on a new transport: until it resolves
//! an identity, no other event handler is reachable. Failure is terminal for
//! the attempt; there is no retry at this layer.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::Identity;

/// Why a handshake was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The credential was once valid but has expired.
    ExpiredCredential,
    /// The credential failed verification.
    InvalidCredential,
    /// No credential was presented.
    CredentialMissing,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::ExpiredCredential => "expired credential",
            RejectReason::InvalidCredential => "invalid credential",
            RejectReason::CredentialMissing => "credential missing",
        };
        write!(f, "{s}")
    }
}

/// Verification failures reported by a `CredentialVerifier`.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The credential has expired.
    #[error("Credential expired")]
    Expired,
    /// The credential is malformed or its signature does not verify.
    #[error("Credential invalid")]
    Invalid,
}

/// External credential-verification collaborator.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify a bearer credential and resolve the identity behind it.
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError>;
}

/// Validates credentials at connect time.
pub struct AuthGate {
    verifier: Arc<dyn CredentialVerifier>,
}

impl AuthGate {
    /// Create a gate backed by the given verifier.
    #[must_use]
    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self { verifier }
    }

    /// Authenticate a handshake credential.
    ///
    /// # Errors
    ///
    /// Returns the reject reason; the caller must close the transport and
    /// must not register the connection.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, RejectReason> {
        let Some(token) = credential else {
            warn!("Handshake without credential");
            return Err(RejectReason::CredentialMissing);
        };

        match self.verifier.verify(token).await {
            Ok(identity) => {
                debug!(identity = %identity.id, "Handshake authenticated");
                Ok(identity)
            }
            Err(VerifyError::Expired) => {
                warn!("Handshake with expired credential");
                Err(RejectReason::ExpiredCredential)
            }
            Err(VerifyError::Invalid) => {
                warn!("Handshake with invalid credential");
                Err(RejectReason::InvalidCredential)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapVerifier;

    #[async_trait]
    impl CredentialVerifier for MapVerifier {
        async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
            match token {
                "good" => Ok(Identity::new("u1", "Alice")),
                "stale" => Err(VerifyError::Expired),
                _ => Err(VerifyError::Invalid),
            }
        }
    }

    fn gate() -> AuthGate {
        AuthGate::new(Arc::new(MapVerifier))
    }

    #[tokio::test]
    async fn test_valid_credential_resolves_identity() {
        let identity = gate().authenticate(Some("good")).await.unwrap();
        assert_eq!(identity.id, "u1");
    }

    #[tokio::test]
    async fn test_reject_reasons() {
        assert_eq!(
            gate().authenticate(None).await.unwrap_err(),
            RejectReason::CredentialMissing
        );
        assert_eq!(
            gate().authenticate(Some("stale")).await.unwrap_err(),
            RejectReason::ExpiredCredential
        );
        assert_eq!(
            gate().authenticate(Some("garbage")).await.unwrap_err(),
            RejectReason::InvalidCredential
        );
    }
}
