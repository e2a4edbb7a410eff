//! HS256 bearer token validation and issuance.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use medscribe_core::UserId;

use crate::claims::{TokenClaims, TokenValidationError, validate_claims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed or badly signed token: {0}")]
    Invalid(String),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Resolves a bearer credential to verified claims.
pub trait TokenValidator: Send + Sync + 'static {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError>;
}

/// Shared-secret (HS256) token validator.
pub struct Hs256TokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256TokenValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks run in `validate_claims` against the caller's clock.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl TokenValidator for Hs256TokenValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

/// Shared-secret (HS256) token issuer for tooling and tests.
pub struct Hs256TokenIssuer {
    key: EncodingKey,
    ttl: Duration,
}

impl Hs256TokenIssuer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_ref()),
            ttl: Duration::minutes(30),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn issue(&self, user_id: UserId, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = TokenClaims::new(user_id, now, now + self.ttl);
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_round_trips_through_validator() {
        let now = Utc::now();
        let user = UserId::new();
        let token = Hs256TokenIssuer::new("s3cret").issue(user, now).unwrap();

        let claims = Hs256TokenValidator::new("s3cret").validate(&token, now).unwrap();
        assert_eq!(claims.sub, user);
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let now = Utc::now();
        let token = Hs256TokenIssuer::new("a").issue(UserId::new(), now).unwrap();

        let err = Hs256TokenValidator::new("b").validate(&token, now).unwrap_err();
        assert!(matches!(err, TokenError::Invalid(_)));
    }

    #[test]
    fn expiry_is_checked_against_supplied_clock() {
        let now = Utc::now();
        let token = Hs256TokenIssuer::new("k")
            .with_ttl(Duration::minutes(1))
            .issue(UserId::new(), now)
            .unwrap();

        let later = now + Duration::minutes(2);
        let err = Hs256TokenValidator::new("k").validate(&token, later).unwrap_err();
        assert_eq!(err, TokenError::Claims(TokenValidationError::Expired));
    }
}
