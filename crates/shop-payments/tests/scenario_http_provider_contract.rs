//! HTTP provider client contract.
//!
//! GREEN when:
//! - authorize POSTs the charge to /v1/charges with the bearer key and
//!   decodes the returned charge state.
//! - capture/void/refund hit the per-charge subpaths.
//! - A non-2xx response surfaces as ProviderError::Api carrying the HTTP
//!   status and a body snippet.
//! - An undecodable 2xx body surfaces as ProviderError::Decode.
//!
//! No live processor involved; every test runs against a local mock server.

use httpmock::prelude::*;
use serde_json::json;
use uuid::Uuid;

use shop_payments::{HttpPaymentProvider, PaymentProvider, ProviderError};
use shop_schemas::{ProviderCaptureRequest, ProviderChargeRequest, ProviderRefundRequest};

fn charge_request(charge_ref: Uuid) -> ProviderChargeRequest {
    ProviderChargeRequest {
        charge_ref,
        order_id: Uuid::new_v4(),
        amount: "25.00".to_string(),
        currency: "USD".to_string(),
        description: "order test".to_string(),
    }
}

fn charge_state_body(provider_charge_id: &str, charge_ref: Uuid, status: &str) -> serde_json::Value {
    json!({
        "provider_charge_id": provider_charge_id,
        "charge_ref": charge_ref,
        "status": status,
        "amount": "25.00",
        "currency": "USD",
        "updated_at_utc": "2026-08-01T12:00:00Z",
    })
}

#[tokio::test]
async fn authorize_posts_charge_with_bearer_key() {
    let server = MockServer::start();
    let charge_ref = Uuid::new_v4();

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/charges")
            .header("authorization", "Bearer key-123")
            .json_body_partial(format!(r#"{{"charge_ref": "{charge_ref}", "amount": "25.00"}}"#));
        then.status(201)
            .header("content-type", "application/json")
            .json_body(charge_state_body("psp-1", charge_ref, "authorized"));
    });

    let provider = HttpPaymentProvider::new("key-123".to_string(), server.base_url());
    let state = provider
        .authorize(charge_request(charge_ref))
        .await
        .expect("authorize");

    assert_eq!(state.provider_charge_id, "psp-1");
    assert_eq!(state.charge_ref, charge_ref);
    assert_eq!(state.status, "authorized");
    mock.assert();
}

#[tokio::test]
async fn decline_surfaces_status_and_body_snippet() {
    let server = MockServer::start();

    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/charges");
        then.status(402).json_body(json!({"error": "card declined"}));
    });

    let provider = HttpPaymentProvider::new("key-123".to_string(), server.base_url());
    let err = provider
        .authorize(charge_request(Uuid::new_v4()))
        .await
        .expect_err("decline");

    match err {
        ProviderError::Api { code, message } => {
            assert_eq!(code, Some(402));
            assert!(message.contains("card declined"), "message: {message}");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    mock.assert();
}

#[tokio::test]
async fn capture_hits_the_per_charge_subpath() {
    let server = MockServer::start();
    let charge_ref = Uuid::new_v4();

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/charges/psp-7/capture")
            .header("authorization", "Bearer key-123");
        then.status(200)
            .json_body(charge_state_body("psp-7", charge_ref, "captured"));
    });

    let provider = HttpPaymentProvider::new("key-123".to_string(), server.base_url());
    let state = provider
        .capture(ProviderCaptureRequest {
            provider_charge_id: "psp-7".to_string(),
            amount: "25.00".to_string(),
            currency: "USD".to_string(),
        })
        .await
        .expect("capture");

    assert_eq!(state.status, "captured");
    mock.assert();
}

#[tokio::test]
async fn void_and_refund_hit_their_subpaths() {
    let server = MockServer::start();
    let charge_ref = Uuid::new_v4();

    let void_mock = server.mock(|when, then| {
        when.method(POST).path("/v1/charges/psp-9/void");
        then.status(200)
            .json_body(charge_state_body("psp-9", charge_ref, "voided"));
    });
    let refund_mock = server.mock(|when, then| {
        when.method(POST).path("/v1/charges/psp-9/refund");
        then.status(200)
            .json_body(charge_state_body("psp-9", charge_ref, "refunded"));
    });

    let provider = HttpPaymentProvider::new("key-123".to_string(), server.base_url());

    let state = provider.void("psp-9").await.expect("void");
    assert_eq!(state.status, "voided");

    let state = provider
        .refund(ProviderRefundRequest {
            provider_charge_id: "psp-9".to_string(),
            amount: "25.00".to_string(),
            currency: "USD".to_string(),
        })
        .await
        .expect("refund");
    assert_eq!(state.status, "refunded");

    void_mock.assert();
    refund_mock.assert();
}

#[tokio::test]
async fn undecodable_success_body_is_a_decode_error() {
    let server = MockServer::start();

    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/charges");
        then.status(200).body("not json at all");
    });

    let provider = HttpPaymentProvider::new("key-123".to_string(), server.base_url());
    let err = provider
        .authorize(charge_request(Uuid::new_v4()))
        .await
        .expect_err("decode failure");

    assert!(matches!(err, ProviderError::Decode(_)), "got {err:?}");
    mock.assert();
}
