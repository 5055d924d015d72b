//! Unused-key guard.
//!
//! Keys nothing reads are config rot; the registry in
//! `consumed_pointers_for_mode` defines what the code reads per mode, and
//! `report_unused_keys` flags the rest. Warn returns the report; Fail errors.

use shop_config::{
    load_layered_yaml_from_strings, report_unused_keys, ShopMode, UnusedKeyPolicy,
};

/// Every key here is in the SANDBOX consumed registry.
const CLEAN_YAML: &str = r#"
shop:
  service_name: "shop-daemon"
  bind_addr: "127.0.0.1:8080"
currency:
  allowed: ["USD"]
checkout:
  enabled_at_boot: true
  max_charge_minor: 500000
stock:
  low_watermark: 5
payments:
  provider: "sandbox"
  pending_ttl_secs: 900
auth:
  token_key_env: "SHOP_TOKEN_KEY"
  token_ttl_secs: 86400
  password_iters: 600000
"#;

const DIRTY_YAML: &str = r#"
shop:
  service_name: "shop-daemon"
  bind_addr: "127.0.0.1:8080"
warehouse:
  region: "eu-west-1"
"#;

#[test]
fn clean_config_is_clean_in_sandbox() {
    let cfg = load_layered_yaml_from_strings(&[CLEAN_YAML])
        .unwrap()
        .config_json;
    let report = report_unused_keys(ShopMode::Sandbox, &cfg, UnusedKeyPolicy::Warn).unwrap();
    assert!(
        report.is_clean(),
        "every key in CLEAN_YAML is consumed; report was: {:?}",
        report.unused_leaf_pointers
    );
}

#[test]
fn unknown_section_is_reported_under_warn() {
    let cfg = load_layered_yaml_from_strings(&[DIRTY_YAML])
        .unwrap()
        .config_json;
    let report = report_unused_keys(ShopMode::Sandbox, &cfg, UnusedKeyPolicy::Warn).unwrap();
    assert!(!report.is_clean(), "warehouse.region must be flagged");
    assert!(
        report
            .unused_leaf_pointers
            .contains(&"/warehouse/region".to_string()),
        "report must list the unused pointer, got: {:?}",
        report.unused_leaf_pointers
    );
}

#[test]
fn unknown_section_errors_under_fail() {
    let cfg = load_layered_yaml_from_strings(&[DIRTY_YAML])
        .unwrap()
        .config_json;
    let result = report_unused_keys(ShopMode::Sandbox, &cfg, UnusedKeyPolicy::Fail);
    assert!(result.is_err(), "Fail policy must error on unused keys");
    let msg = result.unwrap_err().to_string();
    assert!(
        msg.contains("CONFIG_UNUSED_KEYS"),
        "error must contain CONFIG_UNUSED_KEYS, got: {msg}"
    );
    assert!(
        msg.contains("/warehouse/region"),
        "error must preview the offending pointer, got: {msg}"
    );
}

#[test]
fn live_registry_also_covers_http_provider_keys() {
    let yaml = r#"
payments:
  http:
    base_url: "https://psp.example.com"
    api_key_env: "SHOP_PSP_API_KEY"
"#;
    let cfg = load_layered_yaml_from_strings(&[yaml]).unwrap().config_json;

    let live = report_unused_keys(ShopMode::Live, &cfg, UnusedKeyPolicy::Warn).unwrap();
    assert!(
        live.is_clean(),
        "LIVE consumes /payments/http/*: {:?}",
        live.unused_leaf_pointers
    );

    // SANDBOX does not read the http provider section.
    let sandbox = report_unused_keys(ShopMode::Sandbox, &cfg, UnusedKeyPolicy::Warn).unwrap();
    assert!(
        !sandbox.is_clean(),
        "SANDBOX must flag /payments/http/* as unused"
    );
}
