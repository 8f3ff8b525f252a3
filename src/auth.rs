//! Bearer token issuance and validation.
//!
//! Tokens have the form `base64url(claims).hex(hmac_sha256(base64url(claims)))`, where the
//! claims are `{"sub": <identity>, "exp": <unix seconds>}`. Only the subject is trusted after
//! validation; it becomes the [`Identity`] every store query is scoped by.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

/// Authenticated tenant handle; the owner of documents and history entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Wrap an already-authenticated subject.
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    /// Borrow the subject string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reasons a token could not be issued or validated.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Token is not two dot-separated segments of the expected encodings.
    #[error("token is malformed")]
    Malformed,
    /// Signature does not match the claims.
    #[error("token signature is invalid")]
    BadSignature,
    /// Token lifetime has elapsed.
    #[error("token has expired")]
    Expired,
    /// Subject is empty.
    #[error("token subject must not be empty")]
    EmptySubject,
    /// Signing key was rejected by the MAC implementation.
    #[error("invalid signing key")]
    InvalidKey,
    /// Claims could not be serialized.
    #[error("failed to encode claims: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Capability to mint and check bearer tokens.
pub trait TokenAuthority: Send + Sync {
    /// Mint a token for `identity` valid for `ttl`.
    fn issue(&self, identity: &Identity, ttl: Duration) -> Result<String, TokenError>;

    /// Validate `token` and return the identity it was issued to.
    fn validate(&self, token: &str) -> Result<Identity, TokenError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// HMAC-SHA256 token authority keyed by a shared secret.
pub struct HmacTokenAuthority {
    secret: Vec<u8>,
}

impl HmacTokenAuthority {
    /// Create an authority signing with `secret`.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::InvalidKey)
    }

    fn issue_at(
        &self,
        identity: &Identity,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<String, TokenError> {
        if identity.as_str().trim().is_empty() {
            return Err(TokenError::EmptySubject);
        }
        let claims = Claims {
            sub: identity.as_str().to_string(),
            exp: (now + ttl).unix_timestamp(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    fn validate_at(&self, token: &str, now: OffsetDateTime) -> Result<Identity, TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&claims_bytes).map_err(|_| TokenError::Malformed)?;

        if claims.exp <= now.unix_timestamp() {
            return Err(TokenError::Expired);
        }
        if claims.sub.trim().is_empty() {
            return Err(TokenError::EmptySubject);
        }
        Ok(Identity::new(claims.sub))
    }
}

impl TokenAuthority for HmacTokenAuthority {
    fn issue(&self, identity: &Identity, ttl: Duration) -> Result<String, TokenError> {
        self.issue_at(identity, ttl, OffsetDateTime::now_utc())
    }

    fn validate(&self, token: &str) -> Result<Identity, TokenError> {
        self.validate_at(token, OffsetDateTime::now_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30 * 60);

    #[test]
    fn issued_token_validates_to_the_same_identity() {
        let authority = HmacTokenAuthority::new("secret");
        let alice = Identity::new("alice");
        let token = authority.issue(&alice, TTL).unwrap();
        assert_eq!(authority.validate(&token).unwrap(), alice);
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let token = HmacTokenAuthority::new("one")
            .issue(&Identity::new("alice"), TTL)
            .unwrap();
        let error = HmacTokenAuthority::new("two").validate(&token).unwrap_err();
        assert!(matches!(error, TokenError::BadSignature));
    }

    #[test]
    fn tampered_claims_are_rejected() {
        let authority = HmacTokenAuthority::new("secret");
        let token = authority.issue(&Identity::new("alice"), TTL).unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let forged_claims = URL_SAFE_NO_PAD.encode(br#"{"sub":"mallory","exp":9999999999}"#);
        let forged = format!("{forged_claims}.{signature}");
        assert!(matches!(
            authority.validate(&forged),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let authority = HmacTokenAuthority::new("secret");
        let issued_at = OffsetDateTime::now_utc() - Duration::from_secs(3600);
        let token = authority
            .issue_at(&Identity::new("alice"), TTL, issued_at)
            .unwrap();
        assert!(matches!(authority.validate(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn garbage_is_malformed() {
        let authority = HmacTokenAuthority::new("secret");
        assert!(matches!(
            authority.validate("not-a-token"),
            Err(TokenError::Malformed)
        ));
        assert!(matches!(
            authority.validate("abc.zz"),
            Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn empty_subject_cannot_be_issued() {
        let authority = HmacTokenAuthority::new("secret");
        assert!(matches!(
            authority.issue(&Identity::new("  "), TTL),
            Err(TokenError::EmptySubject)
        ));
    }
}
