//! CLI scenarios that need no database: layered config inspection and
//! audit chain verification.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::json;

use shop_audit::{AuditTopic, AuditWriter};

fn write_config(dir: &std::path::Path, base: &str, sandbox: Option<&str>) {
    std::fs::write(dir.join("base.yaml"), base).expect("write base.yaml");
    if let Some(overlay) = sandbox {
        std::fs::write(dir.join("sandbox.yaml"), overlay).expect("write sandbox.yaml");
    }
}

const BASE_YAML: &str = r#"
shop:
  service_name: shop-backend
  bind_addr: 127.0.0.1:8080
currency:
  allowed: [USD, EUR]
checkout:
  enabled_at_boot: true
  max_charge_minor: 500000
"#;

const SANDBOX_YAML: &str = r#"
shop:
  bind_addr: 127.0.0.1:8081
"#;

#[test]
fn config_hash_merges_the_overlay_and_is_deterministic() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_config(dir.path(), BASE_YAML, Some(SANDBOX_YAML));
    let dir_arg = dir.path().to_string_lossy().to_string();

    let run = || {
        let mut cmd = assert_cmd::Command::cargo_bin("shop").expect("bin");
        cmd.args(["config", "hash", "--dir", &dir_arg, "--mode", "SANDBOX"]);
        cmd
    };

    let first = run().assert().success();
    let stdout = String::from_utf8(first.get_output().stdout.clone())?;
    // Overlay value won the merge; the base-only key survived.
    assert!(stdout.contains("config_hash="), "{stdout}");
    assert!(stdout.contains("127.0.0.1:8081"), "{stdout}");
    assert!(stdout.contains("shop-backend"), "{stdout}");

    let second = run().assert().success();
    let stdout2 = String::from_utf8(second.get_output().stdout.clone())?;
    assert_eq!(stdout, stdout2, "hash output must be deterministic");
    Ok(())
}

#[test]
fn config_show_prints_one_pointer() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_config(dir.path(), BASE_YAML, Some(SANDBOX_YAML));
    let dir_arg = dir.path().to_string_lossy().to_string();

    let mut cmd = assert_cmd::Command::cargo_bin("shop")?;
    cmd.args([
        "config",
        "show",
        "--pointer",
        "/checkout/max_charge_minor",
        "--dir",
        &dir_arg,
        "--mode",
        "SANDBOX",
    ]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("500000"));

    let mut missing = assert_cmd::Command::cargo_bin("shop")?;
    missing.args([
        "config",
        "show",
        "--pointer",
        "/no/such/key",
        "--dir",
        &dir_arg,
        "--mode",
        "SANDBOX",
    ]);
    missing
        .assert()
        .failure()
        .stderr(predicate::str::contains("no config value"));
    Ok(())
}

#[test]
fn config_with_secret_literal_is_refused() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_config(
        dir.path(),
        "payments:\n  api_key: sk_live_0123456789\n",
        None,
    );
    let dir_arg = dir.path().to_string_lossy().to_string();

    let mut cmd = assert_cmd::Command::cargo_bin("shop")?;
    cmd.args(["config", "hash", "--dir", &dir_arg, "--mode", "SANDBOX"]);
    let assertion = cmd
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"));
    // The secret value itself must never be echoed.
    let stderr = String::from_utf8(assertion.get_output().stderr.clone())?;
    assert!(!stderr.contains("sk_live_0123456789"), "{stderr}");
    Ok(())
}

#[test]
fn audit_verify_accepts_a_written_chain_and_catches_tampering() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    // Build a three-event chain the way the daemon does.
    let mut writer = AuditWriter::new(dir.path())?;
    for i in 0..3 {
        writer.append(
            AuditTopic::Orders,
            "test",
            "order.placed",
            &format!("order-{i}"),
            json!({ "seq": i }),
        )?;
    }
    let file = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|e| e == "jsonl"))
        .expect("audit file written");
    let file_arg = file.to_string_lossy().to_string();

    let mut cmd = assert_cmd::Command::cargo_bin("shop")?;
    cmd.args(["audit", "verify", "--file", &file_arg]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("chain_valid=true events=3"));

    // Flip one digit inside the payload of the middle line.
    let contents = std::fs::read_to_string(&file)?;
    let tampered = contents.replacen("\"seq\":1", "\"seq\":7", 1);
    assert_ne!(contents, tampered, "tamper target not found");
    std::fs::write(&file, tampered)?;

    let mut cmd = assert_cmd::Command::cargo_bin("shop")?;
    cmd.args(["audit", "verify", "--file", &file_arg]);
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("chain_valid=false"))
        .stderr(predicate::str::contains("audit chain broken"));
    Ok(())
}
