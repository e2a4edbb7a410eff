use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use medscribe_core::UserId;

/// Bearer token claims (transport-agnostic).
///
/// Timestamps use the registered numeric JWT claims (`iat`, `exp`, seconds since
/// the epoch) so tokens interoperate with standard tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the authenticated user.
    pub sub: UserId,

    /// Issued-at timestamp.
    pub iat: i64,

    /// Expiration timestamp.
    pub exp: i64,
}

impl TokenClaims {
    pub fn new(sub: UserId, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            sub,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        }
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate token claims.
///
/// Note: this validates the *claims* only. Signature verification happens in
/// [`crate::token`].
pub fn validate_claims(claims: &TokenClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    let now = now.timestamp();
    if now < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn accepts_token_inside_window() {
        let now = Utc::now();
        let claims = TokenClaims::new(UserId::new(), now - Duration::minutes(1), now + Duration::minutes(5));
        assert_eq!(validate_claims(&claims, now), Ok(()));
    }

    #[test]
    fn rejects_expired_and_future_tokens() {
        let now = Utc::now();
        let expired = TokenClaims::new(UserId::new(), now - Duration::hours(2), now - Duration::hours(1));
        assert_eq!(validate_claims(&expired, now), Err(TokenValidationError::Expired));

        let future = TokenClaims::new(UserId::new(), now + Duration::hours(1), now + Duration::hours(2));
        assert_eq!(validate_claims(&future, now), Err(TokenValidationError::NotYetValid));
    }

    #[test]
    fn rejects_inverted_window() {
        let now = Utc::now();
        let claims = TokenClaims::new(UserId::new(), now, now - Duration::seconds(1));
        assert_eq!(validate_claims(&claims, now), Err(TokenValidationError::InvalidTimeWindow));
    }
}
