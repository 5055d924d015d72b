use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// `prev_hash` of the first event in every log file.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit topic. Each topic gets its own daily JSONL file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditTopic {
    Auth,
    Catalog,
    Orders,
    Payments,
    Admin,
}

impl AuditTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditTopic::Auth => "auth",
            AuditTopic::Catalog => "catalog",
            AuditTopic::Orders => "orders",
            AuditTopic::Payments => "payments",
            AuditTopic::Admin => "admin",
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        match input {
            "auth" => Ok(AuditTopic::Auth),
            "catalog" => Ok(AuditTopic::Catalog),
            "orders" => Ok(AuditTopic::Orders),
            "payments" => Ok(AuditTopic::Payments),
            "admin" => Ok(AuditTopic::Admin),
            other => bail!("unknown audit topic '{}'", other),
        }
    }
}

impl fmt::Display for AuditTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit writer. Writes JSON Lines (one event per line), one
/// file per topic per UTC day, each event chained to its predecessor via
/// prev_hash/hash_self.
pub struct AuditWriter {
    dir: PathBuf,
    /// hash_self of the last event appended, keyed by file name. Seeded from
    /// the file's last line the first time a file is touched, so the chain
    /// survives restarts.
    last_hash: BTreeMap<String, String>,
}

impl AuditWriter {
    /// Creates the audit writer and ensures the log directory exists.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create_dir_all {:?}", dir))?;

        Ok(Self {
            dir,
            last_hash: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one event to its topic's file for today.
    pub fn append(
        &mut self,
        topic: AuditTopic,
        actor: &str,
        action: &str,
        entity: &str,
        details: Value,
    ) -> Result<AuditEvent> {
        let ts_utc = Utc::now();
        let file_name = file_name_for(topic, ts_utc);
        let path = self.dir.join(&file_name);

        let prev_hash = match self.last_hash.get(&file_name) {
            Some(h) => h.clone(),
            None => read_last_hash(&path)?.unwrap_or_else(|| GENESIS_HASH.to_string()),
        };

        let mut ev = AuditEvent {
            event_id: Uuid::new_v4(),
            ts_utc,
            topic: topic.as_str().to_string(),
            actor: actor.to_string(),
            action: action.to_string(),
            entity: entity.to_string(),
            details,
            prev_hash,
            hash_self: String::new(),
        };
        ev.hash_self = compute_event_hash(&ev)?;

        let line = canonical_json_line(&ev)?;
        append_line(&path, &line)?;
        self.last_hash.insert(file_name, ev.hash_self.clone());

        Ok(ev)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub actor: String,
    pub action: String,
    pub entity: String,
    pub details: Value,
    pub prev_hash: String,
    pub hash_self: String,
}

/// File name for a topic on a given UTC day: `<topic>-YYYYMMDD.jsonl`.
pub fn file_name_for(topic: AuditTopic, ts_utc: DateTime<Utc>) -> String {
    format!("{}-{}.jsonl", topic.as_str(), ts_utc.format("%Y%m%d"))
}

/// hash_self of the last non-empty line in an existing log file, or None
/// for a missing/empty file.
fn read_last_hash(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("read audit log {:?}", path))?;
    let last = match content.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(l) => l,
        None => return Ok(None),
    };
    let ev: AuditEvent = serde_json::from_str(last.trim())
        .with_context(|| format!("parse last audit event in {:?}", path))?;
    Ok(Some(ev.hash_self))
}

/// Write a single line to file (with trailing newline).
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
/// One event == one JSON line.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// The chain hash is computed from canonical JSON of the event WITHOUT
/// hash_self (to avoid self-reference).
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut raw = serde_json::to_value(ev).context("serialize audit event failed")?;
    if let Some(obj) = raw.as_object_mut() {
        obj.remove("hash_self");
    }
    let canonical =
        serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Verify the hash chain integrity of one audit log file.
///
/// Returns Ok(VerifyResult) describing whether the chain is intact or where
/// it breaks.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Verify the hash chain integrity of an audit log string (JSONL content).
///
/// Same logic as [`verify_hash_chain`] but operates on an in-memory `&str`.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash = GENESIS_HASH.to_string();
    let mut events = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit event at line {}", i + 1))?;

        events += 1;

        // 1. Verify prev_hash matches the previous event's hash_self
        //    (GENESIS_HASH for the first event in the file).
        if ev.prev_hash != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "prev_hash mismatch: expected {}, got {}",
                    prev_hash, ev.prev_hash
                ),
            });
        }

        // 2. Verify hash_self is correct for this event's content
        let recomputed = compute_event_hash(&ev)?;
        if ev.hash_self != recomputed {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_self mismatch: claimed {}, recomputed {}",
                    ev.hash_self, recomputed
                ),
            });
        }

        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid { events })
}

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// The entire chain is valid.
    Valid { events: usize },
    /// The chain is broken at the given line.
    Broken { line: usize, reason: String },
}
