use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

pub mod secrets;

/// Known secret-like prefixes. If any leaf string value in the effective
/// config starts with one of these, loading aborts with CONFIG_SECRET_DETECTED.
/// Config YAML stores env var NAMES; actual secrets live in the process env.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",        // PSP / OpenAI style
    "sk_live",    // Stripe live
    "sk_test",    // Stripe test
    "whsec_",     // Stripe webhook signing
    "AKIA",       // AWS access key ID
    "-----BEGIN", // PEM private keys
    "ghp_",       // GitHub PAT
    "xoxb-",      // Slack bot token
];

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// Deployment mode. Selects the overlay file (`<mode>.yaml`) and the secret
/// enforcement table in [`secrets::resolve_secrets_for_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShopMode {
    /// Real payment provider over HTTPS. All secrets required.
    Live,
    /// Deterministic in-process provider; token key still required.
    Sandbox,
    /// In-process testing; an ephemeral token key may be generated.
    Test,
}

impl ShopMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShopMode::Live => "LIVE",
            ShopMode::Sandbox => "SANDBOX",
            ShopMode::Test => "TEST",
        }
    }

    pub fn parse(s: &str) -> Result<ShopMode> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LIVE" => Ok(ShopMode::Live),
            "SANDBOX" => Ok(ShopMode::Sandbox),
            "TEST" => Ok(ShopMode::Test),
            other => bail!(
                "unknown shop mode '{}'; expected one of: LIVE | SANDBOX | TEST",
                other
            ),
        }
    }

    /// Overlay file stem: `sandbox.yaml`, `live.yaml`, `test.yaml`.
    pub fn overlay_file(&self) -> &'static str {
        match self {
            ShopMode::Live => "live.yaml",
            ShopMode::Sandbox => "sandbox.yaml",
            ShopMode::Test => "test.yaml",
        }
    }
}

// ---------------------------------------------------------------------------
// Consumed-key registry + unused-key guard
// ---------------------------------------------------------------------------

/// Registry of JSON-pointer prefixes the code actually reads, per mode.
/// A leaf under any listed prefix counts as consumed; everything else is
/// flagged by [`report_unused_keys`] so dead config keys get removed instead
/// of rotting.
///
/// Keep this honest: only list pointers with a real read site. Reads today:
/// - shop-daemon boot: /shop/*, /currency/allowed, /checkout/*, /stock/*,
///   /payments/provider, /payments/pending_ttl_secs, /auth/*
/// - shop-daemon boot (LIVE only): /payments/http/*
/// - shop-config::secrets: /auth/token_key_env, /payments/http/api_key_env
pub fn consumed_pointers_for_mode(mode: ShopMode) -> &'static [&'static str] {
    const COMMON: &[&str] = &[
        "/shop/service_name",
        "/shop/bind_addr",
        "/currency/allowed",
        "/checkout/enabled_at_boot",
        "/checkout/max_charge_minor",
        "/stock/low_watermark",
        "/payments/provider",
        "/payments/pending_ttl_secs",
        "/auth/token_key_env",
        "/auth/token_ttl_secs",
        "/auth/password_iters",
    ];
    const LIVE_ONLY: &[&str] = &[
        "/shop/service_name",
        "/shop/bind_addr",
        "/currency/allowed",
        "/checkout/enabled_at_boot",
        "/checkout/max_charge_minor",
        "/stock/low_watermark",
        "/payments/provider",
        "/payments/pending_ttl_secs",
        "/payments/http/base_url",
        "/payments/http/api_key_env",
        "/auth/token_key_env",
        "/auth/token_ttl_secs",
        "/auth/password_iters",
    ];
    match mode {
        ShopMode::Live => LIVE_ONLY,
        ShopMode::Sandbox | ShopMode::Test => COMMON,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub mode: String,
    /// Consumed JSON-pointer prefixes used for this analysis (sorted, unique)
    pub consumed_prefixes: Vec<String>,
    /// Unused leaf pointers (sorted)
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Produce an unused-key report for a given mode.
/// `Fail` turns a dirty report into an error; `Warn` always returns Ok.
pub fn report_unused_keys(
    mode: ShopMode,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let mut consumed: BTreeSet<String> = BTreeSet::new();
    for p in consumed_pointers_for_mode(mode) {
        consumed.insert(normalize_pointer(p));
    }
    let consumed_prefixes: Vec<String> = consumed.iter().cloned().collect();

    let mut leaves: Vec<String> = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = Vec::new();
    'leaf: for lp in leaves {
        for cp in &consumed_prefixes {
            if pointer_covers(cp, &lp) {
                continue 'leaf;
            }
        }
        unused.push(lp);
    }
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        mode: mode.as_str().to_string(),
        consumed_prefixes,
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS (mode={}): {} unused config leaf key(s) detected. \
            Remove them or update the consumed registry. First few: {}",
            report.mode,
            report.unused_leaf_pointers.len(),
            preview_list(&report.unused_leaf_pointers, 12)
        );
    }

    Ok(report)
}

/// Normalize a JSON pointer: leading "/", no trailing "/" (except bare "/").
fn normalize_pointer(p: &str) -> String {
    let mut s = p.trim().to_string();
    if s.is_empty() {
        return "/".to_string();
    }
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    while s.ends_with('/') && s.len() > 1 {
        s.pop();
    }
    s
}

/// True if `prefix` covers `leaf` as a JSON-pointer prefix.
/// "/a/b" covers "/a/b" and "/a/b/c" but NOT "/a/bc". Bare "/" covers all.
fn pointer_covers(prefix: &str, leaf: &str) -> bool {
    if prefix == "/" || leaf == prefix {
        return true;
    }
    if leaf.starts_with(prefix) {
        return leaf
            .get(prefix.len()..prefix.len() + 1)
            .map(|c| c == "/")
            .unwrap_or(false);
    }
    false
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

fn preview_list(items: &[String], n: usize) -> String {
    let take = items.iter().take(n).cloned().collect::<Vec<_>>();
    format!("{:?}", take)
}

// ---------------------------------------------------------------------------
// Loading + hashing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

/// Load `base.yaml` plus the mode overlay from `dir`.
/// The overlay file is optional; `base.yaml` is not.
pub fn load_dir(dir: impl AsRef<Path>, mode: ShopMode) -> Result<LoadedConfig> {
    let dir = dir.as_ref();
    let base = dir.join("base.yaml");
    let overlay = dir.join(mode.overlay_file());

    let mut docs: Vec<String> = Vec::new();
    docs.push(
        fs::read_to_string(&base)
            .with_context(|| format!("failed to read config file: {}", base.display()))?,
    );
    if overlay.exists() {
        docs.push(
            fs::read_to_string(&overlay)
                .with_context(|| format!("failed to read config file: {}", overlay.display()))?,
        );
    }
    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }
    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

/// Merge YAML docs in order: earlier docs are base, later docs override.
/// Maps merge recursively; scalars and arrays replace wholesale.
pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    // serde_json's Map keeps keys sorted (no preserve_order feature), so a
    // plain compact serialization is already canonical.
    let s = serde_json::to_string(v).context("canonical json serialize failed")?;
    Ok(s)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    hex::encode(out)
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(val) = v.pointer(&ptr) {
            if let Some(s) = val.as_str() {
                if looks_like_secret(s) {
                    bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
                }
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

// ---------------------------------------------------------------------------
// Typed read helpers
// ---------------------------------------------------------------------------

/// Read a non-empty string at `pointer`. `None` when absent, not a string,
/// or blank after trimming.
pub fn str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn require_str_at(config: &Value, pointer: &str) -> Result<String> {
    str_at(config, pointer)
        .with_context(|| format!("CONFIG_MISSING: required string at '{pointer}'"))
}

pub fn i64_at(config: &Value, pointer: &str) -> Option<i64> {
    config.pointer(pointer)?.as_i64()
}

pub fn require_i64_at(config: &Value, pointer: &str) -> Result<i64> {
    i64_at(config, pointer)
        .with_context(|| format!("CONFIG_MISSING: required integer at '{pointer}'"))
}

pub fn bool_at(config: &Value, pointer: &str) -> Option<bool> {
    config.pointer(pointer)?.as_bool()
}

/// Read a list of non-empty strings at `pointer`. `None` when absent or not
/// an array; blank entries are skipped.
pub fn str_list_at(config: &Value, pointer: &str) -> Option<Vec<String>> {
    let arr = config.pointer(pointer)?.as_array()?;
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        if let Some(s) = v.as_str() {
            let t = s.trim();
            if !t.is_empty() {
                out.push(t.to_string());
            }
        }
    }
    Some(out)
}
