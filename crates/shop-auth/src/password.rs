//! Password hashing.
//!
//! Stored form: `b3i$<iters>$<salt_hex>$<digest_hex>`.
//!
//! The digest is an iterated BLAKE3 key derivation over `salt || password`.
//! The iteration count is recorded in the stored hash, so it can be raised
//! in config without invalidating existing rows; old hashes keep verifying
//! with the count they were written with.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::AuthError;

const SCHEME: &str = "b3i";
const PASSWORD_CONTEXT: &str = "shop-auth v1 password";
const SALT_LEN: usize = 16;

/// Hash `password` with a fresh random salt.
pub fn hash_password(password: &str, iters: u32) -> Result<String, AuthError> {
    if iters == 0 {
        return Err(AuthError::BadIterations);
    }
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let digest = derive_digest(password, &salt, iters);
    Ok(format!(
        "{SCHEME}${iters}${}${}",
        hex::encode(salt),
        hex::encode(digest)
    ))
}

/// Check `password` against a stored hash.
///
/// A hash that does not parse is an error, not a mismatch; `Ok(false)` always
/// means the password was wrong for a well-formed row.
pub fn verify_password(password: &str, encoded: &str) -> Result<bool, AuthError> {
    let mut parts = encoded.split('$');
    let (scheme, iters, salt_hex, digest_hex) = match (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) {
        (Some(s), Some(i), Some(sa), Some(d), None) => (s, i, sa, d),
        _ => return Err(AuthError::HashMalformed),
    };
    if scheme != SCHEME {
        return Err(AuthError::HashMalformed);
    }
    let iters: u32 = iters.parse().map_err(|_| AuthError::HashMalformed)?;
    if iters == 0 {
        return Err(AuthError::HashMalformed);
    }
    let salt = hex::decode(salt_hex).map_err(|_| AuthError::HashMalformed)?;
    if salt.is_empty() {
        return Err(AuthError::HashMalformed);
    }
    let stored: [u8; 32] = hex::decode(digest_hex)
        .map_err(|_| AuthError::HashMalformed)?
        .try_into()
        .map_err(|_| AuthError::HashMalformed)?;

    let computed = derive_digest(password, &salt, iters);
    // blake3::Hash comparison is constant-time.
    Ok(blake3::Hash::from(computed) == blake3::Hash::from(stored))
}

fn derive_digest(password: &str, salt: &[u8], iters: u32) -> [u8; 32] {
    let mut material = Vec::with_capacity(salt.len() + password.len());
    material.extend_from_slice(salt);
    material.extend_from_slice(password.as_bytes());
    let mut digest = blake3::derive_key(PASSWORD_CONTEXT, &material);
    material.zeroize();
    for _ in 1..iters {
        digest = blake3::derive_key(PASSWORD_CONTEXT, &digest);
    }
    digest
}
