//! `medscribe-auth`: bearer token authentication and ownership checks.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod authorize;
pub mod claims;
pub mod token;

pub use authorize::{AuthzError, ensure_owner};
pub use claims::{TokenClaims, TokenValidationError, validate_claims};
pub use token::{Hs256TokenIssuer, Hs256TokenValidator, TokenError, TokenValidator};
