//! HMAC-signed credential verification.
//!
//! The bundled verifier accepts compact tokens of the form
//! `base64url(identity|display_name|expiry_ms) . base64url(tag)` where `tag`
//! is HMAC-SHA256 over the payload under the configured shared secret.
//! Deployments with their own account system implement
//! [`CredentialVerifier`] against it instead; the engine only sees the trait.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::trace;

use huddle_core::auth::{CredentialVerifier, VerifyError};
use huddle_core::types::unix_timestamp_ms;
use huddle_core::Identity;

type HmacSha256 = Hmac<Sha256>;

/// Verifies HMAC-signed bearer tokens against a shared secret.
pub struct HmacVerifier {
    secret: Vec<u8>,
}

impl HmacVerifier {
    /// Create a verifier for the given shared secret.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Mint a token for an identity, valid until `expiry_ms`.
    ///
    /// Used by operators to issue dev credentials and by the test suite.
    #[must_use]
    pub fn mint(&self, identity: &str, display_name: &str, expiry_ms: u64) -> String {
        let payload = format!("{identity}|{display_name}|{expiry_ms}");
        let tag = self.tag(payload.as_bytes());
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(tag)
        )
    }

    fn tag(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

#[async_trait]
impl CredentialVerifier for HmacVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        let (payload_b64, tag_b64) = token.split_once('.').ok_or(VerifyError::Invalid)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| VerifyError::Invalid)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| VerifyError::Invalid)?;

        // Constant-time comparison via the MAC itself.
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(&payload);
        mac.verify_slice(&tag).map_err(|_| VerifyError::Invalid)?;

        let payload = String::from_utf8(payload).map_err(|_| VerifyError::Invalid)?;
        let mut fields = payload.splitn(3, '|');
        let identity = fields.next().filter(|s| !s.is_empty()).ok_or(VerifyError::Invalid)?;
        let display_name = fields.next().ok_or(VerifyError::Invalid)?;
        let expiry_ms: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(VerifyError::Invalid)?;

        if expiry_ms <= unix_timestamp_ms() {
            return Err(VerifyError::Expired);
        }

        trace!(identity = %identity, "Token verified");
        Ok(Identity::new(identity, display_name))
    }
}
