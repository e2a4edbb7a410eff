use thiserror::Error;

use medscribe_core::UserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: record is owned by another user")]
    NotOwner,
}

/// Allow a principal to act on a record only if it owns that record.
///
/// - No IO
/// - No caching: callers re-check on every request
pub fn ensure_owner(principal: UserId, owner: UserId) -> Result<(), AuthzError> {
    if principal == owner {
        Ok(())
    } else {
        Err(AuthzError::NotOwner)
    }
}
