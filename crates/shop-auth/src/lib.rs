//! shop-auth
//!
//! Password hashing and bearer-token auth for the storefront.
//! - Passwords are stored as salted, iterated BLAKE3 digests (`b3i$...`)
//! - Tokens are keyed-BLAKE3 signed claims, base64url on the wire
//! - Verification is pure: callers supply the clock
//! - No database wiring; the persistence layer maps rows to these types

use std::fmt;

use serde::{Deserialize, Serialize};

mod password;
mod token;

pub use password::{hash_password, verify_password};
pub use token::{issue_token, verify_token, Claims, TokenKey};

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Account role. Stored as text in the users table and carried in token
/// claims; `as_str`/`parse` are the canonical mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "CUSTOMER")]
    Customer,
    #[serde(rename = "ADMIN")]
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "CUSTOMER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(input: &str) -> Result<Self, ParseRoleError> {
        match input {
            "CUSTOMER" => Ok(Role::Customer),
            "ADMIN" => Ok(Role::Admin),
            other => Err(ParseRoleError {
                input: other.to_string(),
            }),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseRoleError {
    pub input: String,
}

impl fmt::Display for ParseRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown role: '{}' (expected CUSTOMER or ADMIN)",
            self.input
        )
    }
}

impl std::error::Error for ParseRoleError {}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthError {
    /// `hash_password` called with zero iterations.
    BadIterations,
    /// Stored password hash does not parse as `b3i$iters$salt$digest`.
    HashMalformed,
    /// Token key material rejected (wrong length or not hex).
    KeyMalformed { reason: String },
    /// Claims failed to encode as JSON.
    ClaimsEncode,
    /// Token is not `<payload>.<signature>` base64url.
    TokenMalformed,
    /// Signature does not verify under the supplied key.
    TokenSignature,
    /// Signature verified but the token is past its expiry.
    TokenExpired { expired_at: i64 },
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::BadIterations => {
                write!(f, "password hashing requires at least one iteration")
            }
            AuthError::HashMalformed => {
                write!(f, "stored password hash is not in the b3i format")
            }
            AuthError::KeyMalformed { reason } => write!(f, "token key rejected: {reason}"),
            AuthError::ClaimsEncode => write!(f, "token claims could not be encoded"),
            AuthError::TokenMalformed => {
                write!(f, "token is not in the <payload>.<signature> format")
            }
            AuthError::TokenSignature => write!(f, "token signature does not verify"),
            AuthError::TokenExpired { expired_at } => {
                write!(f, "token expired at unix {expired_at}")
            }
        }
    }
}

impl std::error::Error for AuthError {}
