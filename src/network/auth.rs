//! Token Authentication
//!
//! `auth:connect` carries a bearer token minted by an external identity
//! provider (Firebase, Auth0, Supabase, ...). This module verifies that
//! token and maps its subject onto the stable [`UserId`] the rest of the
//! server keys on. Tokens are only ever verified here, never issued, and
//! a verified subject still has to exist in the user directory before the
//! session is admitted (that check lives in `network/server.rs`).

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::ids::UserId;

/// Salt mixed into the subject hash so ids derived here can never collide
/// with ids another deployment derives from the same provider accounts.
const USER_ID_SALT: &[u8] = b"quiz-battle-user:";

/// Verification settings, usually loaded from `AUTH_*` environment
/// variables. An RS256 public key wins over an HS256 secret when both are
/// present; with neither, every token is rejected.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Required `iss` claim. Unset accepts any issuer.
    pub issuer: Option<String>,
    /// Required `aud` claim. Unset accepts any audience.
    pub audience: Option<String>,
    /// PEM-encoded RS256 public key of the provider.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret, for setups without asymmetric keys.
    pub secret: Option<String>,
    /// Disable expiry checking. Test environments only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Load from `AUTH_ISSUER`, `AUTH_AUDIENCE`, `AUTH_PUBLIC_KEY_PEM`,
    /// `AUTH_SECRET`, and `AUTH_SKIP_EXPIRY`.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: matches!(
                std::env::var("AUTH_SKIP_EXPIRY").as_deref(),
                Ok("1") | Ok("true")
            ),
        }
    }

    /// Whether any verification material is present.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }

    fn algorithm(&self) -> Algorithm {
        if self.public_key_pem.is_some() {
            Algorithm::RS256
        } else {
            Algorithm::HS256
        }
    }

    fn decoding_key(&self) -> Result<DecodingKey, AuthError> {
        if let Some(pem) = &self.public_key_pem {
            DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::BadKeyMaterial(e.to_string()))
        } else if let Some(secret) = &self.secret {
            Ok(DecodingKey::from_secret(secret.as_bytes()))
        } else {
            Err(AuthError::NotConfigured)
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm());
        // providers differ in which registered claims they emit, so none
        // are mandatory here; sub is enforced separately after decoding
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = !self.skip_expiry;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

/// Claims read out of a provider token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Provider-side account id. Everything else keys off this.
    pub sub: String,
    /// Expiry, unix seconds. Zero means the provider opted out.
    #[serde(default)]
    pub exp: u64,
    /// Issued-at, unix seconds.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience, in whatever shape the provider uses.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Display-name claim, when the provider sends one.
    #[serde(default)]
    pub name: Option<String>,
}

impl TokenClaims {
    /// The stable quiz id for this subject: the first 16 bytes of a
    /// salted SHA256 over the subject string, as a uuid. The same
    /// provider account lands on the same [`UserId`] across reconnects
    /// and server restarts, which is what lets the user-directory lookup
    /// and duplicate-login eviction key on it.
    pub fn user_id(&self) -> UserId {
        let digest = Sha256::new_with_prefix(USER_ID_SALT)
            .chain_update(self.sub.as_bytes())
            .finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        UserId::from_bytes(bytes)
    }

    /// What the provider calls this account, for log lines. Players see
    /// the user directory's display name, never this.
    pub fn provider_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.sub)
    }
}

/// Authentication failures. All of them surface to the client as
/// `auth.error` and close the socket.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The server has no verification material.
    #[error("authentication not configured")]
    NotConfigured,
    /// Not a parseable JWT.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature does not verify against the configured key.
    #[error("invalid signature")]
    InvalidSignature,
    /// Past its expiry.
    #[error("token expired")]
    Expired,
    /// `iss` does not match the pinned issuer.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// `aud` does not match the pinned audience.
    #[error("invalid audience")]
    InvalidAudience,
    /// A claim the server insists on is absent or empty.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// The configured key itself is unusable.
    #[error("invalid verification key: {0}")]
    BadKeyMaterial(String),
    /// Anything else the JWT library reports.
    #[error("token verification failed: {0}")]
    Verification(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            ErrorKind::InvalidAudience => AuthError::InvalidAudience,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => AuthError::InvalidFormat,
            _ => AuthError::Verification(err.to_string()),
        }
    }
}

/// Verify a provider token and return its claims.
///
/// Signature, issuer, audience, and expiry are enforced per the config;
/// on top of that the subject must be non-blank, and a non-zero `exp` is
/// re-checked against the wall clock so a config that disabled library
/// validation cannot silently admit stale tokens.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let key = config.decoding_key()?;
    let claims = decode::<TokenClaims>(token, &key, &config.validation())?.claims;

    if claims.sub.trim().is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }
    if !config.skip_expiry && claims.exp > 0 && unix_now() > claims.exp {
        return Err(AuthError::Expired);
    }

    Ok(claims)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "quiz-battle-hs256-test-secret!!!";

    fn hs_config() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    fn sign(claims: &TokenClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims_for(sub: &str) -> TokenClaims {
        TokenClaims {
            sub: sub.into(),
            exp: unix_now() + 600,
            iat: unix_now(),
            iss: Some("quiz-idp".into()),
            aud: Some(serde_json::json!("quiz-battle")),
            name: Some("Player One".into()),
        }
    }

    #[test]
    fn test_accepts_valid_token_and_derives_id() {
        let claims = claims_for("player-77");
        let token = sign(&claims, SECRET);

        let verified = validate_token(&token, &hs_config()).unwrap();
        assert_eq!(verified.sub, "player-77");
        // the round trip through the wire must not change the derived id
        assert_eq!(verified.user_id(), claims.user_id());
    }

    #[test]
    fn test_subject_maps_to_stable_distinct_ids() {
        let first = claims_for("player-1").user_id();
        let again = claims_for("player-1").user_id();
        let other = claims_for("player-2").user_id();

        assert_eq!(first, again);
        assert_ne!(first, other);
        // a near-miss subject must not alias onto the same account
        assert_ne!(claims_for("player-1").user_id(), claims_for("player-1 ").user_id());
    }

    #[test]
    fn test_rejects_expired_token() {
        let mut claims = claims_for("player-1");
        claims.exp = unix_now().saturating_sub(600);
        let token = sign(&claims, SECRET);

        let result = validate_token(&token, &hs_config());
        assert!(matches!(result, Err(AuthError::Expired)));

        // the testing-only override lets the same token through
        let lenient = AuthConfig {
            skip_expiry: true,
            ..hs_config()
        };
        assert!(validate_token(&token, &lenient).is_ok());
    }

    #[test]
    fn test_rejects_foreign_signature() {
        let token = sign(&claims_for("player-1"), "some-other-service-secret!!!");
        let result = validate_token(&token, &hs_config());
        assert!(matches!(result, Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_rejects_blank_subject() {
        for sub in ["", "   "] {
            let token = sign(&claims_for(sub), SECRET);
            let result = validate_token(&token, &hs_config());
            assert!(matches!(result, Err(AuthError::MissingClaim(_))), "sub {sub:?}");
        }
    }

    #[test]
    fn test_issuer_pinning() {
        let token = sign(&claims_for("player-1"), SECRET);

        let wrong = AuthConfig {
            issuer: Some("someone-else".into()),
            ..hs_config()
        };
        assert!(matches!(
            validate_token(&token, &wrong),
            Err(AuthError::InvalidIssuer)
        ));

        let right = AuthConfig {
            issuer: Some("quiz-idp".into()),
            ..hs_config()
        };
        assert!(validate_token(&token, &right).is_ok());
    }

    #[test]
    fn test_audience_pinning() {
        let token = sign(&claims_for("player-1"), SECRET);

        let wrong = AuthConfig {
            audience: Some("some-other-game".into()),
            ..hs_config()
        };
        assert!(matches!(
            validate_token(&token, &wrong),
            Err(AuthError::InvalidAudience)
        ));

        let right = AuthConfig {
            audience: Some("quiz-battle".into()),
            ..hs_config()
        };
        assert!(validate_token(&token, &right).is_ok());
    }

    #[test]
    fn test_garbage_token_is_a_format_error() {
        let result = validate_token("definitely not a jwt", &hs_config());
        assert!(matches!(result, Err(AuthError::InvalidFormat)));
    }

    #[test]
    fn test_rejects_everything_when_unconfigured() {
        let token = sign(&claims_for("player-1"), SECRET);
        let result = validate_token(&token, &AuthConfig::default());
        assert!(matches!(result, Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_provider_name_falls_back_to_subject() {
        let mut claims = claims_for("player-1");
        assert_eq!(claims.provider_name(), "Player One");
        claims.name = None;
        assert_eq!(claims.provider_name(), "player-1");
    }
}
