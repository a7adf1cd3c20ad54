//! Access Token Issuance and Verification
//!
//! RS256-signed JWTs. The private key signs, the public key verifies, so
//! downstream domains can validate tokens without holding signing material.
//! Every token carries a fresh `jti`, which doubles as the blacklist key.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::error::AuthError;
use crate::config::Config;

/// JWT claims carried by every access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
    /// Subject (user UUID).
    pub sub: String,
    /// Subject email.
    pub email: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Unique token ID.
    pub jti: String,
    /// OAuth scope, for tokens minted by the code exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// OAuth client, for tokens minted by the code exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl Claims {
    /// Subject parsed as a UUID.
    pub fn subject(&self) -> Result<Uuid, AuthError> {
        self.sub.parse().map_err(|_| AuthError::InvalidToken)
    }
}

/// Caller-supplied claims merged over the standard set.
#[derive(Debug, Clone, Default)]
pub struct ExtraClaims {
    pub scope: Option<String>,
    pub client_id: Option<String>,
}

/// Why a token was refused.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token issued by another issuer")]
    ForeignIssuer,
    #[error("token minted for another audience")]
    ForeignAudience,
    #[error("invalid token")]
    Invalid,
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => Self::TokenExpired,
            TokenError::ForeignIssuer | TokenError::ForeignAudience | TokenError::Invalid => {
                Self::InvalidToken
            }
        }
    }
}

/// Signing and verification keys plus token policy.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    leeway_seconds: u64,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Build from PEM-encoded RSA keys.
    pub fn new(
        private_pem: &str,
        public_pem: &str,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        ttl_seconds: i64,
        refresh_ttl_seconds: i64,
        leeway_seconds: u64,
    ) -> Result<Self, AuthError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| AuthError::Internal(format!("Invalid RSA private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| AuthError::Internal(format!("Invalid RSA public key: {e}")))?;

        Ok(Self {
            encoding_key,
            decoding_key,
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_seconds,
            refresh_ttl_seconds,
            leeway_seconds,
        })
    }

    /// Build from server configuration.
    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        Self::new(
            &config.jwt_private_key,
            &config.jwt_public_key,
            &config.jwt_issuer,
            &config.jwt_audience,
            config.jwt_ttl,
            config.jwt_refresh_ttl,
            config.jwt_leeway,
        )
    }

    /// Access token lifetime in seconds.
    pub const fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Refresh token lifetime in seconds.
    pub const fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    /// Sign a new access token for `subject`.
    pub fn issue(&self, subject: Uuid, email: &str, extra: ExtraClaims) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: subject.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.ttl_seconds)).timestamp(),
            jti: Uuid::new_v4().to_string(),
            scope: extra.scope,
            client_id: extra.client_id,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Failed to sign token: {e}")))
    }

    /// Verify signature, issuer, audience and expiry (with leeway).
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        validation.leeway = self.leeway_seconds;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidIssuer => TokenError::ForeignIssuer,
                ErrorKind::InvalidAudience => TokenError::ForeignAudience,
                _ => TokenError::Invalid,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FOREIGN_PUBLIC_KEY;
    use std::collections::HashSet;

    fn service_with(ttl: i64, leeway: u64) -> TokenService {
        let config = Config::default_for_test();
        TokenService::new(
            &config.jwt_private_key,
            &config.jwt_public_key,
            &config.jwt_issuer,
            &config.jwt_audience,
            ttl,
            config.jwt_refresh_ttl,
            leeway,
        )
        .unwrap()
    }

    fn service() -> TokenService {
        service_with(300, 10)
    }

    #[test]
    fn test_issue_and_decode_round_trip() {
        let tokens = service();
        let user = Uuid::new_v4();

        let token = tokens.issue(user, "ada@example.com", ExtraClaims::default()).unwrap();
        let claims = tokens.decode(&token).unwrap();

        assert_eq!(claims.subject().unwrap(), user);
        assert_eq!(claims.email, "ada@example.com");
        assert_eq!(claims.iss, "https://solucomp.com/AuthCenter/");
        assert_eq!(claims.aud, "authcenter");
        assert_eq!(claims.exp - claims.iat, 300);
        assert!(claims.scope.is_none());
    }

    #[test]
    fn test_every_token_gets_a_distinct_jti() {
        let tokens = service();
        let user = Uuid::new_v4();

        let jtis: HashSet<String> = (0..25)
            .map(|_| {
                let token = tokens.issue(user, "a@b.c", ExtraClaims::default()).unwrap();
                tokens.decode(&token).unwrap().jti
            })
            .collect();

        assert_eq!(jtis.len(), 25);
    }

    #[test]
    fn test_extra_claims_are_embedded() {
        let tokens = service();
        let extra = ExtraClaims {
            scope: Some("admin:access".into()),
            client_id: Some("client-1".into()),
        };

        let token = tokens.issue(Uuid::new_v4(), "a@b.c", extra).unwrap();
        let claims = tokens.decode(&token).unwrap();

        assert_eq!(claims.scope.as_deref(), Some("admin:access"));
        assert_eq!(claims.client_id.as_deref(), Some("client-1"));
    }

    #[test]
    fn test_expired_token_is_distinguished() {
        let tokens = service_with(-120, 10);
        let token = tokens.issue(Uuid::new_v4(), "a@b.c", ExtraClaims::default()).unwrap();

        assert_eq!(tokens.decode(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_leeway_tolerates_small_skew() {
        let tokens = service_with(-5, 10);
        let token = tokens.issue(Uuid::new_v4(), "a@b.c", ExtraClaims::default()).unwrap();

        assert!(tokens.decode(&token).is_ok());
    }

    #[test]
    fn test_wrong_public_key_fails() {
        let config = Config::default_for_test();
        let signer = service();
        let verifier = TokenService::new(
            &config.jwt_private_key,
            FOREIGN_PUBLIC_KEY,
            &config.jwt_issuer,
            &config.jwt_audience,
            300,
            config.jwt_refresh_ttl,
            10,
        )
        .unwrap();

        let token = signer.issue(Uuid::new_v4(), "a@b.c", ExtraClaims::default()).unwrap();
        assert_eq!(verifier.decode(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn test_foreign_audience_and_issuer() {
        let config = Config::default_for_test();
        let other = TokenService::new(
            &config.jwt_private_key,
            &config.jwt_public_key,
            &config.jwt_issuer,
            "someone-else",
            300,
            config.jwt_refresh_ttl,
            10,
        )
        .unwrap();
        let token = other.issue(Uuid::new_v4(), "a@b.c", ExtraClaims::default()).unwrap();
        assert_eq!(service().decode(&token), Err(TokenError::ForeignAudience));

        let other = TokenService::new(
            &config.jwt_private_key,
            &config.jwt_public_key,
            "https://elsewhere.example/",
            &config.jwt_audience,
            300,
            config.jwt_refresh_ttl,
            10,
        )
        .unwrap();
        let token = other.issue(Uuid::new_v4(), "a@b.c", ExtraClaims::default()).unwrap();
        assert_eq!(service().decode(&token), Err(TokenError::ForeignIssuer));
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert_eq!(service().decode("not.a.jwt"), Err(TokenError::Invalid));
        assert_eq!(service().decode(""), Err(TokenError::Invalid));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let tokens = service();
        let token = tokens.issue(Uuid::new_v4(), "a@b.c", ExtraClaims::default()).unwrap();
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[1] = parts[1].chars().rev().collect();

        assert_eq!(tokens.decode(&parts.join(".")), Err(TokenError::Invalid));
    }
}
