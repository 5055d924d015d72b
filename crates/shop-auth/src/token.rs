//! Bearer tokens.
//!
//! Wire form: `base64url(claims_json) . base64url(keyed_blake3_mac)`, no
//! padding. The MAC is computed over the encoded payload string, so a verifier
//! never parses JSON that has not already authenticated. Expiry lives in the
//! claims; callers supply `now` so verification stays clock-free and
//! deterministic in tests.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{AuthError, Role};

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// 32-byte MAC key. Zeroed on drop; `Debug` never prints material.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct TokenKey([u8; 32]);

impl TokenKey {
    /// Parse a 64-hex-char key, as read from the env var named in config.
    pub fn from_hex(hex_key: &str) -> Result<Self, AuthError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| AuthError::KeyMalformed {
            reason: "not valid hex".to_string(),
        })?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| AuthError::KeyMalformed {
            reason: "expected 32 bytes (64 hex chars)".to_string(),
        })?;
        Ok(TokenKey(bytes))
    }

    /// Fresh random key. Used in TEST mode where no env-backed key is
    /// required; tokens die with the process.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        TokenKey(bytes)
    }

    fn bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenKey(REDACTED)")
    }
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: Uuid,
    pub role: Role,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds. A token is dead from this instant on.
    pub exp: i64,
    /// Unique token id; lets audit lines distinguish re-logins.
    pub jti: Uuid,
}

impl Claims {
    pub fn mint(sub: Uuid, role: Role, now: i64, ttl_secs: i64) -> Self {
        debug_assert!(ttl_secs > 0, "token ttl must be positive");
        Claims {
            sub,
            role,
            iat: now,
            exp: now.saturating_add(ttl_secs),
            jti: Uuid::new_v4(),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.exp
    }
}

// ---------------------------------------------------------------------------
// Sign / verify
// ---------------------------------------------------------------------------

pub fn issue_token(key: &TokenKey, claims: &Claims) -> Result<String, AuthError> {
    let payload = serde_json::to_vec(claims).map_err(|_| AuthError::ClaimsEncode)?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let mac = blake3::keyed_hash(key.bytes(), payload_b64.as_bytes());
    let mac_b64 = URL_SAFE_NO_PAD.encode(mac.as_bytes());
    Ok(format!("{payload_b64}.{mac_b64}"))
}

/// Verify `token` and return its claims.
///
/// Order of checks: shape, signature, then expiry. `TokenExpired` therefore
/// implies the token was authentic.
pub fn verify_token(key: &TokenKey, token: &str, now: i64) -> Result<Claims, AuthError> {
    let (payload_b64, mac_b64) = token.split_once('.').ok_or(AuthError::TokenMalformed)?;
    if mac_b64.contains('.') {
        return Err(AuthError::TokenMalformed);
    }
    let mac_bytes = URL_SAFE_NO_PAD
        .decode(mac_b64)
        .map_err(|_| AuthError::TokenMalformed)?;
    let mac: [u8; 32] = mac_bytes
        .try_into()
        .map_err(|_| AuthError::TokenMalformed)?;

    let expected = blake3::keyed_hash(key.bytes(), payload_b64.as_bytes());
    // blake3::Hash comparison is constant-time.
    if expected != blake3::Hash::from(mac) {
        return Err(AuthError::TokenSignature);
    }

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::TokenMalformed)?;
    let claims: Claims =
        serde_json::from_slice(&payload).map_err(|_| AuthError::TokenMalformed)?;
    if claims.is_expired(now) {
        return Err(AuthError::TokenExpired {
            expired_at: claims.exp,
        });
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn test_key() -> TokenKey {
        TokenKey::from_hex(&"11".repeat(32)).unwrap()
    }

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn issue_then_verify_returns_the_claims() {
        let key = test_key();
        let claims = Claims::mint(uid(1), Role::Customer, NOW, 3600);
        let token = issue_token(&key, &claims).unwrap();
        let back = verify_token(&key, &token, NOW + 10).unwrap();
        assert_eq!(back, claims);
    }

    #[test]
    fn expired_token_is_rejected_with_its_expiry() {
        let key = test_key();
        let claims = Claims::mint(uid(1), Role::Customer, NOW, 60);
        let token = issue_token(&key, &claims).unwrap();
        assert_eq!(
            verify_token(&key, &token, NOW + 61),
            Err(AuthError::TokenExpired {
                expired_at: NOW + 60
            })
        );
    }

    #[test]
    fn expiry_instant_itself_is_expired() {
        let key = test_key();
        let claims = Claims::mint(uid(1), Role::Customer, NOW, 60);
        let token = issue_token(&key, &claims).unwrap();
        assert!(matches!(
            verify_token(&key, &token, NOW + 60),
            Err(AuthError::TokenExpired { .. })
        ));
    }

    #[test]
    fn wrong_key_fails_on_signature() {
        let claims = Claims::mint(uid(1), Role::Admin, NOW, 3600);
        let token = issue_token(&test_key(), &claims).unwrap();
        let other = TokenKey::from_hex(&"22".repeat(32)).unwrap();
        assert_eq!(
            verify_token(&other, &token, NOW),
            Err(AuthError::TokenSignature)
        );
    }

    #[test]
    fn spliced_payload_fails_on_signature() {
        let key = test_key();
        let customer = issue_token(&key, &Claims::mint(uid(1), Role::Customer, NOW, 3600)).unwrap();
        let admin = issue_token(&key, &Claims::mint(uid(2), Role::Admin, NOW, 3600)).unwrap();
        let (admin_payload, _) = admin.split_once('.').unwrap();
        let (_, customer_mac) = customer.split_once('.').unwrap();
        let forged = format!("{admin_payload}.{customer_mac}");
        assert_eq!(
            verify_token(&key, &forged, NOW),
            Err(AuthError::TokenSignature)
        );
    }

    #[test]
    fn garbage_is_malformed_not_a_signature_failure() {
        let key = test_key();
        for bad in ["", "no-dot-here", "a.b.c", "!!!.???"] {
            assert_eq!(
                verify_token(&key, bad, NOW),
                Err(AuthError::TokenMalformed),
                "input {bad:?}"
            );
        }
    }

    #[test]
    fn key_from_hex_enforces_length_and_charset() {
        assert!(TokenKey::from_hex(&"11".repeat(32)).is_ok());
        assert!(matches!(
            TokenKey::from_hex("deadbeef"),
            Err(AuthError::KeyMalformed { .. })
        ));
        assert!(matches!(
            TokenKey::from_hex(&"zz".repeat(32)),
            Err(AuthError::KeyMalformed { .. })
        ));
    }

    #[test]
    fn key_debug_is_redacted() {
        let shown = format!("{:?}", test_key());
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("11"), "debug output must not leak material");
    }

    #[test]
    fn mint_sets_expiry_from_ttl() {
        let claims = Claims::mint(uid(9), Role::Customer, NOW, 900);
        assert_eq!(claims.iat, NOW);
        assert_eq!(claims.exp, NOW + 900);
        assert!(!claims.is_expired(NOW + 899));
        assert!(claims.is_expired(NOW + 900));
    }

    #[test]
    fn distinct_mints_get_distinct_jti() {
        let a = Claims::mint(uid(1), Role::Customer, NOW, 60);
        let b = Claims::mint(uid(1), Role::Customer, NOW, 60);
        assert_ne!(a.jti, b.jti);
    }
}
