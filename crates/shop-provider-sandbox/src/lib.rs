//! Deterministic in-memory "sandbox" payment provider.
//!
//! Design decisions (kept intentionally simple/deterministic):
//! - `provider_charge_id` is exactly `"sandbox:chg:{charge_ref}"`.
//! - Authorize is idempotent: repeating a `charge_ref` returns the stored
//!   state with no mutation, so a retried request cannot double-charge.
//! - Capture, void, and refund are idempotent in their own terminal state,
//!   so a retry after a crash between the provider call and the local write
//!   converges instead of erroring.
//! - An amount of exactly 13 minor units (`0.13` in any currency) is
//!   declined, so the decline path can be rehearsed end to end without a
//!   real processor.
//! - No randomness. State lives in process memory and is gone on restart;
//!   the sweep reconciles whatever the database still thinks is open.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use shop_cart::{Currency, Money};
use shop_payments::{PaymentProvider, ProviderError};
use shop_schemas::{
    ProviderCaptureRequest, ProviderChargeRequest, ProviderChargeState, ProviderRefundRequest,
};

/// Any charge of exactly this many minor units is declined.
pub const MAGIC_DECLINE_MINOR: i64 = 13;

#[derive(Clone, Debug)]
struct ChargeRecord {
    charge_ref: Uuid,
    status: &'static str,
    amount: String,
    currency: String,
    updated_at_utc: DateTime<Utc>,
}

impl ChargeRecord {
    fn state(&self, provider_charge_id: &str) -> ProviderChargeState {
        ProviderChargeState {
            provider_charge_id: provider_charge_id.to_string(),
            charge_ref: self.charge_ref,
            status: self.status.to_string(),
            amount: self.amount.clone(),
            currency: self.currency.clone(),
            updated_at_utc: self.updated_at_utc,
        }
    }
}

/// In-memory stand-in for a card processor.
#[derive(Debug, Default)]
pub struct SandboxPaymentProvider {
    charges: Mutex<BTreeMap<String, ChargeRecord>>, // keyed by provider_charge_id
}

impl SandboxPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

fn charge_id_for(charge_ref: Uuid) -> String {
    format!("sandbox:chg:{charge_ref}")
}

fn parse_amount(amount: &str, currency: &str) -> Result<Money, ProviderError> {
    let currency = Currency::parse(currency).map_err(|e| ProviderError::Api {
        code: Some(400),
        message: e.to_string(),
    })?;
    Money::parse(amount, currency).map_err(|e| ProviderError::Api {
        code: Some(400),
        message: e.to_string(),
    })
}

fn unknown_charge(provider_charge_id: &str) -> ProviderError {
    ProviderError::Api {
        code: Some(404),
        message: format!("unknown charge {provider_charge_id}"),
    }
}

fn wrong_state(action: &str, status: &str) -> ProviderError {
    ProviderError::Api {
        code: Some(409),
        message: format!("cannot {action} a charge in state {status}"),
    }
}

#[async_trait]
impl PaymentProvider for SandboxPaymentProvider {
    fn provider_name(&self) -> &'static str {
        "sandbox"
    }

    async fn authorize(
        &self,
        req: ProviderChargeRequest,
    ) -> Result<ProviderChargeState, ProviderError> {
        let amount = parse_amount(&req.amount, &req.currency)?;
        if amount.minor() == MAGIC_DECLINE_MINOR {
            return Err(ProviderError::Api {
                code: Some(402),
                message: format!("card declined (sandbox auto-declines {})", req.amount),
            });
        }

        let id = charge_id_for(req.charge_ref);
        let mut charges = self.charges.lock().await;
        if let Some(existing) = charges.get(&id) {
            return Ok(existing.state(&id));
        }

        let rec = ChargeRecord {
            charge_ref: req.charge_ref,
            status: "authorized",
            amount: amount.decimal_str(),
            currency: amount.currency().as_str().to_string(),
            updated_at_utc: Utc::now(),
        };
        let state = rec.state(&id);
        charges.insert(id, rec);
        Ok(state)
    }

    async fn capture(
        &self,
        req: ProviderCaptureRequest,
    ) -> Result<ProviderChargeState, ProviderError> {
        let mut charges = self.charges.lock().await;
        let rec = charges
            .get_mut(&req.provider_charge_id)
            .ok_or_else(|| unknown_charge(&req.provider_charge_id))?;
        match rec.status {
            "captured" => return Ok(rec.state(&req.provider_charge_id)),
            "authorized" => {}
            other => return Err(wrong_state("capture", other)),
        }
        if req.amount != rec.amount {
            return Err(ProviderError::Api {
                code: Some(409),
                message: format!(
                    "capture amount {} does not match authorized {}",
                    req.amount, rec.amount
                ),
            });
        }
        rec.status = "captured";
        rec.updated_at_utc = Utc::now();
        Ok(rec.state(&req.provider_charge_id))
    }

    async fn void(&self, provider_charge_id: &str) -> Result<ProviderChargeState, ProviderError> {
        let mut charges = self.charges.lock().await;
        let rec = charges
            .get_mut(provider_charge_id)
            .ok_or_else(|| unknown_charge(provider_charge_id))?;
        match rec.status {
            "voided" => return Ok(rec.state(provider_charge_id)),
            "authorized" => {}
            other => return Err(wrong_state("void", other)),
        }
        rec.status = "voided";
        rec.updated_at_utc = Utc::now();
        Ok(rec.state(provider_charge_id))
    }

    async fn refund(
        &self,
        req: ProviderRefundRequest,
    ) -> Result<ProviderChargeState, ProviderError> {
        let mut charges = self.charges.lock().await;
        let rec = charges
            .get_mut(&req.provider_charge_id)
            .ok_or_else(|| unknown_charge(&req.provider_charge_id))?;
        match rec.status {
            "refunded" => return Ok(rec.state(&req.provider_charge_id)),
            "captured" => {}
            other => return Err(wrong_state("refund", other)),
        }
        if req.amount != rec.amount {
            return Err(ProviderError::Api {
                code: Some(409),
                message: format!(
                    "refund amount {} does not match captured {}",
                    req.amount, rec.amount
                ),
            });
        }
        rec.status = "refunded";
        rec.updated_at_utc = Utc::now();
        Ok(rec.state(&req.provider_charge_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge_req(charge_ref: Uuid, amount: &str) -> ProviderChargeRequest {
        ProviderChargeRequest {
            charge_ref,
            order_id: Uuid::new_v4(),
            amount: amount.to_string(),
            currency: "USD".to_string(),
            description: "order test".to_string(),
        }
    }

    fn capture_req(provider_charge_id: &str, amount: &str) -> ProviderCaptureRequest {
        ProviderCaptureRequest {
            provider_charge_id: provider_charge_id.to_string(),
            amount: amount.to_string(),
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn authorize_is_idempotent_per_charge_ref() {
        let sandbox = SandboxPaymentProvider::new();
        let charge_ref = Uuid::new_v4();

        let first = sandbox
            .authorize(charge_req(charge_ref, "25.00"))
            .await
            .unwrap();
        assert_eq!(first.provider_charge_id, format!("sandbox:chg:{charge_ref}"));
        assert_eq!(first.status, "authorized");

        let again = sandbox
            .authorize(charge_req(charge_ref, "25.00"))
            .await
            .unwrap();
        assert_eq!(again.provider_charge_id, first.provider_charge_id);
        assert_eq!(again.updated_at_utc, first.updated_at_utc, "no mutation");

        let other = sandbox
            .authorize(charge_req(Uuid::new_v4(), "25.00"))
            .await
            .unwrap();
        assert_ne!(other.provider_charge_id, first.provider_charge_id);
    }

    #[tokio::test]
    async fn magic_amount_is_declined() {
        let sandbox = SandboxPaymentProvider::new();
        let err = sandbox
            .authorize(charge_req(Uuid::new_v4(), "0.13"))
            .await
            .unwrap_err();
        match err {
            ProviderError::Api { code, message } => {
                assert_eq!(code, Some(402));
                assert!(message.contains("declined"), "message: {message}");
            }
            other => panic!("expected Api decline, got {other:?}"),
        }

        // A decline leaves nothing behind; the same ref can authorize later.
        let ok = sandbox
            .authorize(charge_req(Uuid::new_v4(), "0.14"))
            .await
            .unwrap();
        assert_eq!(ok.status, "authorized");
    }

    #[tokio::test]
    async fn capture_then_refund_walks_the_states() {
        let sandbox = SandboxPaymentProvider::new();
        let auth = sandbox
            .authorize(charge_req(Uuid::new_v4(), "25.00"))
            .await
            .unwrap();

        let cap = sandbox
            .capture(capture_req(&auth.provider_charge_id, "25.00"))
            .await
            .unwrap();
        assert_eq!(cap.status, "captured");

        let refund = sandbox
            .refund(ProviderRefundRequest {
                provider_charge_id: auth.provider_charge_id.clone(),
                amount: "25.00".to_string(),
                currency: "USD".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(refund.status, "refunded");
    }

    #[tokio::test]
    async fn capture_retry_converges_and_mismatched_amount_is_refused() {
        let sandbox = SandboxPaymentProvider::new();
        let auth = sandbox
            .authorize(charge_req(Uuid::new_v4(), "25.00"))
            .await
            .unwrap();

        sandbox
            .capture(capture_req(&auth.provider_charge_id, "25.00"))
            .await
            .unwrap();
        let retry = sandbox
            .capture(capture_req(&auth.provider_charge_id, "25.00"))
            .await
            .unwrap();
        assert_eq!(retry.status, "captured", "capture retry is idempotent");

        let fresh = sandbox
            .authorize(charge_req(Uuid::new_v4(), "30.00"))
            .await
            .unwrap();
        let err = sandbox
            .capture(capture_req(&fresh.provider_charge_id, "29.00"))
            .await
            .unwrap_err();
        match err {
            ProviderError::Api { code, .. } => assert_eq!(code, Some(409)),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn void_rejects_captured_charges() {
        let sandbox = SandboxPaymentProvider::new();
        let auth = sandbox
            .authorize(charge_req(Uuid::new_v4(), "25.00"))
            .await
            .unwrap();
        sandbox
            .capture(capture_req(&auth.provider_charge_id, "25.00"))
            .await
            .unwrap();

        let err = sandbox.void(&auth.provider_charge_id).await.unwrap_err();
        match err {
            ProviderError::Api { code, message } => {
                assert_eq!(code, Some(409));
                assert!(message.contains("captured"), "message: {message}");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_charge_is_a_404() {
        let sandbox = SandboxPaymentProvider::new();
        let err = sandbox.void("sandbox:chg:nope").await.unwrap_err();
        match err {
            ProviderError::Api { code, .. } => assert_eq!(code, Some(404)),
            other => panic!("expected Api error, got {other:?}"),
        }
    }
}
