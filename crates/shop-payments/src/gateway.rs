//! The single choke-point through which ALL provider traffic must flow.
//!
//! **Row first:** `charge` requires a [`PaymentAttemptToken`], which only
//! `shop_db::payments::insert_payment_attempt` can mint. A crash mid-charge
//! therefore always leaves a PENDING row for the sweep instead of an
//! untracked provider charge.
//!
//! **Gates:** every charge passes the gate chain before any provider call,
//! in a fixed order — currency allow-list, then amount ceiling. The first
//! refusal wins and is recorded on the attempt row.
//!
//! ```text
//! handler
//!     │ insert_payment_attempt ──► (PaymentRow PENDING, token)
//!     └──► PaymentGateway::charge(pool, &row, &token)
//!                ├── CurrencyGate ─► GateRefusal  (row → FAILED)
//!                ├── AmountGate   ─► GateRefusal  (row → FAILED)
//!                ├── provider.authorize  ─► err   (row → FAILED)
//!                ├── row → AUTHORIZED (+ provider_charge_id)
//!                ├── provider.capture    ─► err   (row → FAILED)
//!                ├── row → CAPTURED
//!                └── order PENDING_PAYMENT → PAID
//! ```

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use shop_cart::{Currency, Money};
use shop_db::orders::{self, OrderRow};
use shop_db::payments::{self, PaymentAttemptToken, PaymentRow};
use shop_orders::{OrderEvent, PaymentEvent, PaymentStatus};
use shop_schemas::{ProviderCaptureRequest, ProviderChargeRequest, ProviderRefundRequest};

use crate::provider::PaymentProvider;

// ---------------------------------------------------------------------------
// GateRefusal
// ---------------------------------------------------------------------------

/// The reason a charge was refused before reaching the provider.
///
/// Implements `std::error::Error` so it survives an `anyhow` chain and the
/// API layer can map it to 403 by its stable `GATE_REFUSED` rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRefusal {
    pub gate: &'static str,
    pub reason: String,
}

impl fmt::Display for GateRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GATE_REFUSED: {}: {}", self.gate, self.reason)
    }
}

impl std::error::Error for GateRefusal {}

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

/// Evaluates one admission rule against a charge amount.
///
/// Gates own their configuration; no verdict can be injected at call time.
/// Production wiring comes from config, tests use literal values.
pub trait ChargeGate: Send + Sync {
    fn check(&self, amount: &Money) -> Result<(), GateRefusal>;
}

/// Refuses charges in currencies outside the configured allow-list.
#[derive(Debug, Clone)]
pub struct CurrencyGate {
    allowed: Vec<Currency>,
}

impl CurrencyGate {
    pub fn new(allowed: Vec<Currency>) -> Self {
        Self { allowed }
    }
}

impl ChargeGate for CurrencyGate {
    fn check(&self, amount: &Money) -> Result<(), GateRefusal> {
        if self.allowed.contains(&amount.currency()) {
            return Ok(());
        }
        let allowed = self
            .allowed
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Err(GateRefusal {
            gate: "currency",
            reason: format!(
                "{} not in allowed set [{}]",
                amount.currency().as_str(),
                allowed
            ),
        })
    }
}

/// Refuses non-positive charges and charges above the configured ceiling.
#[derive(Debug, Clone, Copy)]
pub struct AmountGate {
    max_charge_minor: i64,
}

impl AmountGate {
    pub fn new(max_charge_minor: i64) -> Self {
        Self { max_charge_minor }
    }
}

impl ChargeGate for AmountGate {
    fn check(&self, amount: &Money) -> Result<(), GateRefusal> {
        if !amount.is_positive() {
            return Err(GateRefusal {
                gate: "amount",
                reason: format!("charge must be positive, got {amount}"),
            });
        }
        if amount.minor() > self.max_charge_minor {
            return Err(GateRefusal {
                gate: "amount",
                reason: format!(
                    "{} minor units exceeds the {} limit",
                    amount.minor(),
                    self.max_charge_minor
                ),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PaymentGateway
// ---------------------------------------------------------------------------

/// What a successful charge or refund leaves behind.
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub payment: PaymentRow,
    pub order: OrderRow,
}

/// Orchestrates gates, the provider, and payment/order rows.
///
/// Holds the provider behind `Arc<dyn PaymentProvider>` so live and sandbox
/// wiring differ only at construction.
pub struct PaymentGateway {
    provider: Arc<dyn PaymentProvider>,
    gates: Vec<Box<dyn ChargeGate>>,
}

impl PaymentGateway {
    /// Gate order is fixed: currency allow-list first, then amount ceiling.
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        allowed_currencies: Vec<Currency>,
        max_charge_minor: i64,
    ) -> Self {
        let gates: Vec<Box<dyn ChargeGate>> = vec![
            Box::new(CurrencyGate::new(allowed_currencies)),
            Box::new(AmountGate::new(max_charge_minor)),
        ];
        Self { provider, gates }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Evaluate all gates in order. Returns the first refusal encountered,
    /// or `Ok(())` if all pass.
    fn enforce_gates(&self, amount: &Money) -> Result<(), GateRefusal> {
        for gate in &self.gates {
            gate.check(amount)?;
        }
        Ok(())
    }

    /// Run the full charge flow for a persisted PENDING attempt.
    ///
    /// On success the attempt is CAPTURED and its order has moved
    /// PENDING_PAYMENT → PAID. Gate refusals and provider failures mark the
    /// attempt FAILED and propagate; the order stays payable and a retry
    /// opens a NEW attempt with its own charge_ref.
    pub async fn charge(
        &self,
        pool: &PgPool,
        attempt: &PaymentRow,
        token: &PaymentAttemptToken,
    ) -> Result<ChargeOutcome> {
        if token.payment_id != attempt.payment_id || token.charge_ref != attempt.charge_ref {
            return Err(anyhow!(
                "attempt token mismatch: token is for payment {}, row is {}",
                token.payment_id,
                attempt.payment_id
            ));
        }

        let amount = attempt_amount(attempt)?;

        if let Err(refusal) = self.enforce_gates(&amount) {
            self.mark_failed(pool, attempt.payment_id, &refusal.to_string())
                .await;
            return Err(anyhow::Error::new(refusal));
        }

        let charge_ref = Uuid::parse_str(&token.charge_ref)
            .with_context(|| format!("charge_ref is not a uuid: {}", token.charge_ref))?;

        let request = ProviderChargeRequest {
            charge_ref,
            order_id: attempt.order_id,
            amount: amount.decimal_str(),
            currency: amount.currency().as_str().to_string(),
            description: format!("order {}", attempt.order_id),
        };

        let authorized = match self.provider.authorize(request).await {
            Ok(state) => state,
            Err(e) => {
                self.mark_failed(pool, attempt.payment_id, &e.to_string())
                    .await;
                return Err(anyhow::Error::new(e).context("provider authorize failed"));
            }
        };

        let payment = payments::record_payment_event(
            pool,
            attempt.payment_id,
            &PaymentEvent::Authorize,
            Some(&authorized.provider_charge_id),
            None,
        )
        .await?;

        let capture = ProviderCaptureRequest {
            provider_charge_id: authorized.provider_charge_id.clone(),
            amount: amount.decimal_str(),
            currency: amount.currency().as_str().to_string(),
        };
        if let Err(e) = self.provider.capture(capture).await {
            self.mark_failed(pool, attempt.payment_id, &e.to_string())
                .await;
            return Err(anyhow::Error::new(e).context("provider capture failed"));
        }

        let payment = payments::record_payment_event(
            pool,
            payment.payment_id,
            &PaymentEvent::Capture,
            None,
            None,
        )
        .await?;

        let order =
            orders::transition_order(pool, attempt.order_id, &OrderEvent::PaymentCaptured).await?;

        Ok(ChargeOutcome { payment, order })
    }

    /// Refund a captured attempt and move its order to REFUNDED.
    ///
    /// Ops path. The payment must be CAPTURED with a stored provider charge
    /// id; stock restoration follows the order-side refund rules.
    pub async fn refund(&self, pool: &PgPool, payment_id: Uuid) -> Result<ChargeOutcome> {
        let payment = payments::fetch_payment(pool, payment_id)
            .await?
            .ok_or_else(|| anyhow!("PAYMENT_NOT_FOUND: {payment_id}"))?;

        if payment.status != PaymentStatus::Captured {
            return Err(anyhow!(
                "PAYMENT_NOT_REFUNDABLE: payment={payment_id} status={}",
                payment.status.as_str()
            ));
        }
        let provider_charge_id = payment.provider_charge_id.clone().ok_or_else(|| {
            anyhow!("PAYMENT_NOT_REFUNDABLE: payment={payment_id} has no provider charge id")
        })?;

        let amount = attempt_amount(&payment)?;
        self.provider
            .refund(ProviderRefundRequest {
                provider_charge_id,
                amount: amount.decimal_str(),
                currency: amount.currency().as_str().to_string(),
            })
            .await
            .map_err(|e| anyhow::Error::new(e).context("provider refund failed"))?;

        let payment =
            payments::record_payment_event(pool, payment_id, &PaymentEvent::Refund, None, None)
                .await?;
        let order = orders::refund_order(pool, payment.order_id).await?;

        Ok(ChargeOutcome { payment, order })
    }

    /// Sweep stale attempts.
    ///
    /// PENDING rows older than the cutoff fail outright. AUTHORIZED rows
    /// older than the cutoff are voided at the provider first; a provider
    /// error leaves the row for the next sweep. Returns every row changed.
    pub async fn sweep(&self, pool: &PgPool, older_than_secs: i64) -> Result<Vec<PaymentRow>> {
        let mut swept = payments::sweep_stale_pending(pool, older_than_secs).await?;

        for stuck in payments::list_stale_authorized(pool, older_than_secs).await? {
            let provider_charge_id = match stuck.provider_charge_id.as_deref() {
                Some(id) => id,
                None => {
                    warn!(payment_id = %stuck.payment_id, "stale AUTHORIZED row has no provider charge id");
                    continue;
                }
            };
            if let Err(e) = self.provider.void(provider_charge_id).await {
                warn!(payment_id = %stuck.payment_id, error = %e, "void failed; leaving row for next sweep");
                continue;
            }
            let voided = payments::record_payment_event(
                pool,
                stuck.payment_id,
                &PaymentEvent::Void,
                None,
                Some("swept: stale authorized"),
            )
            .await?;
            swept.push(voided);
        }

        Ok(swept)
    }

    /// Best-effort FAILED marking. A failure here leaves the row for the
    /// sweep; the primary error still propagates to the caller.
    async fn mark_failed(&self, pool: &PgPool, payment_id: Uuid, detail: &str) {
        if let Err(e) =
            payments::record_payment_event(pool, payment_id, &PaymentEvent::Fail, None, Some(detail))
                .await
        {
            warn!(payment_id = %payment_id, error = %e, "could not mark payment attempt FAILED");
        }
    }
}

fn attempt_amount(row: &PaymentRow) -> Result<Money> {
    let currency = Currency::parse(&row.currency)?;
    Ok(Money::new(row.amount_minor, currency))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
