//! Runtime secret resolution.
//!
//! This module is the single source of truth for turning env var NAMES
//! (stored in config YAML) into secret values (read from the process env).
//!
//! # Contract
//! - Config YAML stores only env var **names** (e.g. `"SHOP_TOKEN_KEY"`).
//! - Callers invoke [`resolve_secrets_for_mode`] once at startup and pass the
//!   returned [`ResolvedSecrets`] into constructors; never scatter
//!   `std::env::var` calls across the codebase.
//! - `Debug` output redacts values.
//! - Error messages reference the env var **name**, never the value.
//!
//! # Mode-aware enforcement
//! - `LIVE`:    token key + payment provider api key are **required**.
//! - `SANDBOX`: token key is **required**; the sandbox provider needs no key.
//! - `TEST`:    nothing required — callers may generate an ephemeral key.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::{str_at, ShopMode};

/// All runtime-resolved secrets for one daemon instantiation.
///
/// Built once at startup via [`resolve_secrets_for_mode`].
/// **Values are redacted in `Debug` output.**
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// 64-hex-char token signing key. `None` if the named env var was absent
    /// or empty (only permitted in TEST mode).
    pub token_key_hex: Option<String>,
    /// Payment provider api key. `None` outside LIVE mode.
    pub provider_api_key: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "token_key_hex",
                &self.token_key_hex.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "provider_api_key",
                &self.provider_api_key.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Env var names extracted from the config JSON.
/// These are the NAMES stored in YAML — not values.
struct SecretEnvNames {
    token_key_var: String,
    provider_api_key_var: String,
}

fn parse_env_names(config_json: &Value) -> SecretEnvNames {
    SecretEnvNames {
        token_key_var: str_at(config_json, "/auth/token_key_env")
            .unwrap_or_else(|| "SHOP_TOKEN_KEY".to_string()),
        provider_api_key_var: str_at(config_json, "/payments/http/api_key_env")
            .unwrap_or_else(|| "SHOP_PSP_API_KEY".to_string()),
    }
}

/// Resolve a named environment variable.
/// `None` if the variable is unset or blank. The value never appears in an
/// error path; callers report the NAME only.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve all secrets from the environment for the given mode.
///
/// # Enforcement
/// | Mode    | Required                          |
/// |---------|-----------------------------------|
/// | LIVE    | token key, provider api key       |
/// | SANDBOX | token key                         |
/// | TEST    | nothing                           |
///
/// # Errors
/// `Err` names the env var of the first missing required variable. The
/// actual value is never mentioned.
pub fn resolve_secrets_for_mode(config_json: &Value, mode: ShopMode) -> Result<ResolvedSecrets> {
    let names = parse_env_names(config_json);

    let token_key_hex = resolve_env(&names.token_key_var);
    let provider_api_key = resolve_env(&names.provider_api_key_var);

    match mode {
        ShopMode::Live => {
            if token_key_hex.is_none() {
                bail!(
                    "SECRETS_MISSING mode=LIVE: required env var '{}' \
                     (token signing key) is not set or empty",
                    names.token_key_var,
                );
            }
            if provider_api_key.is_none() {
                bail!(
                    "SECRETS_MISSING mode=LIVE: required env var '{}' \
                     (payment provider api key) is not set or empty",
                    names.provider_api_key_var,
                );
            }
        }
        ShopMode::Sandbox => {
            if token_key_hex.is_none() {
                bail!(
                    "SECRETS_MISSING mode=SANDBOX: required env var '{}' \
                     (token signing key) is not set or empty",
                    names.token_key_var,
                );
            }
        }
        ShopMode::Test => {
            // No required secrets in TEST — the daemon mints an ephemeral key.
        }
    }

    Ok(ResolvedSecrets {
        token_key_hex,
        provider_api_key,
    })
}
