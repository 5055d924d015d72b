//! Audit hash chain integrity.
//!
//! GREEN when:
//! - Writing 5 events, then verifying the topic file, succeeds.
//! - The first event of a file carries the all-zeros genesis prev_hash.
//! - Mutating line 3's details in the file, then verifying, detects the break.
//! - Deleting a line breaks the chain at the splice point.
//! - A second writer on the same directory continues the chain (restart).
//! - Events on different topics land in different files.

use chrono::Utc;
use serde_json::json;
use shop_audit::{
    file_name_for, verify_hash_chain, AuditTopic, AuditWriter, VerifyResult, GENESIS_HASH,
};
use uuid::Uuid;

fn temp_audit_dir(suffix: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "shop_audit_test_{}_{}_{}",
        suffix,
        std::process::id(),
        Uuid::new_v4().as_simple()
    ))
}

fn topic_path(dir: &std::path::Path, topic: AuditTopic) -> std::path::PathBuf {
    dir.join(file_name_for(topic, Utc::now()))
}

#[test]
fn untampered_chain_verifies_valid() {
    let dir = temp_audit_dir("untampered");

    {
        let mut writer = AuditWriter::new(&dir).unwrap();
        for i in 0..5 {
            writer
                .append(
                    AuditTopic::Orders,
                    "system",
                    &format!("test.event_{i}"),
                    &format!("order:{i}"),
                    json!({"index": i, "data": format!("payload_{i}")}),
                )
                .unwrap();
        }
    }

    let result = verify_hash_chain(topic_path(&dir, AuditTopic::Orders)).unwrap();
    assert_eq!(
        result,
        VerifyResult::Valid { events: 5 },
        "untampered chain should verify as valid with 5 events"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn first_event_carries_genesis_prev_hash() {
    let dir = temp_audit_dir("genesis");

    let ev = {
        let mut writer = AuditWriter::new(&dir).unwrap();
        writer
            .append(AuditTopic::Auth, "anonymous", "user.register", "user:x", json!({}))
            .unwrap()
    };

    assert_eq!(ev.prev_hash, GENESIS_HASH);
    assert_eq!(ev.hash_self.len(), 64, "sha-256 hex digest");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn tampered_details_detected() {
    let dir = temp_audit_dir("tampered");
    let path = topic_path(&dir, AuditTopic::Payments);

    {
        let mut writer = AuditWriter::new(&dir).unwrap();
        for i in 0..5 {
            writer
                .append(
                    AuditTopic::Payments,
                    "system",
                    &format!("test.event_{i}"),
                    &format!("payment:{i}"),
                    json!({"index": i, "data": format!("payload_{i}")}),
                )
                .unwrap();
        }
    }

    // Tamper with line 3 (0-indexed line 2): modify the details
    {
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = content.lines().collect();
        assert!(lines.len() >= 5, "should have 5 lines");

        let mut ev: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        ev["details"]["data"] = json!("TAMPERED_VALUE");
        let tampered_line = serde_json::to_string(&ev).unwrap();

        lines[2] = &tampered_line;
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();
    }

    let result = verify_hash_chain(&path).unwrap();
    match result {
        VerifyResult::Broken { line, reason } => {
            // The break should be detected at line 3 (hash_self mismatch)
            // because we changed the details but didn't recompute hash_self.
            assert_eq!(
                line, 3,
                "tamper should be detected at line 3, got line {line}: {reason}"
            );
            assert!(
                reason.contains("hash_self mismatch"),
                "reason should mention hash_self mismatch, got: {reason}"
            );
        }
        VerifyResult::Valid { events } => {
            panic!("tampered chain should NOT verify as valid (got {events} valid events)");
        }
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn deleted_line_detected() {
    let dir = temp_audit_dir("deleted");
    let path = topic_path(&dir, AuditTopic::Orders);

    {
        let mut writer = AuditWriter::new(&dir).unwrap();
        for i in 0..5 {
            writer
                .append(
                    AuditTopic::Orders,
                    "system",
                    &format!("test.event_{i}"),
                    &format!("order:{i}"),
                    json!({"index": i}),
                )
                .unwrap();
        }
    }

    // Delete line 3 (0-indexed line 2)
    {
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        let mut new_lines = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if i != 2 {
                new_lines.push(*line);
            }
        }
        std::fs::write(&path, new_lines.join("\n") + "\n").unwrap();
    }

    let result = verify_hash_chain(&path).unwrap();
    match result {
        VerifyResult::Broken { line, reason } => {
            // What is now line 3 has prev_hash pointing at the deleted
            // event's hash, so the chain breaks there.
            assert!(
                reason.contains("prev_hash mismatch"),
                "reason should mention prev_hash mismatch, got: {reason}"
            );
            assert!(line >= 3, "break should be at line 3 or later (was at {line})");
        }
        VerifyResult::Valid { events } => {
            panic!("chain with deleted line should NOT verify as valid (got {events} events)");
        }
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn restarted_writer_continues_chain() {
    let dir = temp_audit_dir("restart");

    {
        let mut writer = AuditWriter::new(&dir).unwrap();
        for i in 0..2 {
            writer
                .append(
                    AuditTopic::Admin,
                    "admin:ops",
                    &format!("test.event_{i}"),
                    "gate:checkout",
                    json!({"index": i}),
                )
                .unwrap();
        }
    }

    // Fresh writer, same directory: must seed prev_hash from the file.
    {
        let mut writer = AuditWriter::new(&dir).unwrap();
        writer
            .append(
                AuditTopic::Admin,
                "admin:ops",
                "test.event_2",
                "gate:checkout",
                json!({"index": 2}),
            )
            .unwrap();
    }

    let result = verify_hash_chain(topic_path(&dir, AuditTopic::Admin)).unwrap();
    assert_eq!(
        result,
        VerifyResult::Valid { events: 3 },
        "chain resumed after restart should verify as one unbroken file"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn topics_write_to_separate_files() {
    let dir = temp_audit_dir("topics");

    {
        let mut writer = AuditWriter::new(&dir).unwrap();
        writer
            .append(AuditTopic::Auth, "anonymous", "user.register", "user:a", json!({}))
            .unwrap();
        writer
            .append(AuditTopic::Catalog, "admin:x", "product.create", "product:p", json!({}))
            .unwrap();
    }

    assert!(topic_path(&dir, AuditTopic::Auth).exists());
    assert!(topic_path(&dir, AuditTopic::Catalog).exists());

    // Each file is its own genesis-rooted chain.
    for topic in [AuditTopic::Auth, AuditTopic::Catalog] {
        let result = verify_hash_chain(topic_path(&dir, topic)).unwrap();
        assert_eq!(result, VerifyResult::Valid { events: 1 });
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn empty_log_is_valid() {
    let dir = temp_audit_dir("empty");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("orders-19700101.jsonl");
    std::fs::write(&path, "").unwrap();

    let result = verify_hash_chain(&path).unwrap();
    assert_eq!(
        result,
        VerifyResult::Valid { events: 0 },
        "empty log should verify as valid with 0 events"
    );

    let _ = std::fs::remove_dir_all(&dir);
}
