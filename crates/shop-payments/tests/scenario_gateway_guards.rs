//! Gateway guard rails, exercised without a database.
//!
//! Activates the `testkit` feature to forge [`PaymentAttemptToken`]s; the
//! pool is lazy and never actually connects, proving the guards fire before
//! any persistence or provider traffic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use shop_cart::Currency;
use shop_db::payments::{PaymentAttemptToken, PaymentRow};
use shop_orders::PaymentStatus;
use shop_payments::{PaymentGateway, PaymentProvider, ProviderError};
use shop_schemas::{
    ProviderCaptureRequest, ProviderChargeRequest, ProviderChargeState, ProviderRefundRequest,
};

/// Panics on any call; the guard under test must refuse first.
struct UnreachableProvider;

#[async_trait]
impl PaymentProvider for UnreachableProvider {
    fn provider_name(&self) -> &'static str {
        "unreachable"
    }

    async fn authorize(
        &self,
        _req: ProviderChargeRequest,
    ) -> Result<ProviderChargeState, ProviderError> {
        unreachable!("guard must refuse before authorize")
    }

    async fn capture(
        &self,
        _req: ProviderCaptureRequest,
    ) -> Result<ProviderChargeState, ProviderError> {
        unreachable!("guard must refuse before capture")
    }

    async fn void(&self, _provider_charge_id: &str) -> Result<ProviderChargeState, ProviderError> {
        unreachable!("guard must refuse before void")
    }

    async fn refund(
        &self,
        _req: ProviderRefundRequest,
    ) -> Result<ProviderChargeState, ProviderError> {
        unreachable!("guard must refuse before refund")
    }
}

/// A pool pointing at a port nothing listens on. Guards that fire before any
/// query never notice; anything that does touch it errors fast.
fn dead_pool() -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(Duration::from_secs(2))
        .connect_lazy("postgres://nobody@127.0.0.1:1/nothing")
        .expect("lazy pool")
}

fn pending_row(payment_id: Uuid, charge_ref: &str) -> PaymentRow {
    PaymentRow {
        payment_id,
        order_id: Uuid::new_v4(),
        attempt_seq: 1,
        charge_ref: charge_ref.to_string(),
        status: PaymentStatus::Pending,
        amount_minor: 2_500,
        currency: "USD".to_string(),
        provider: "unreachable".to_string(),
        provider_charge_id: None,
        detail: None,
        created_at_utc: Utc::now(),
        updated_at_utc: Utc::now(),
    }
}

fn gateway() -> PaymentGateway {
    PaymentGateway::new(Arc::new(UnreachableProvider), vec![Currency::Usd], 500_000)
}

#[tokio::test]
async fn token_for_another_payment_is_refused() {
    let charge_ref = Uuid::new_v4().to_string();
    let row = pending_row(Uuid::new_v4(), &charge_ref);
    let forged = PaymentAttemptToken::for_test(Uuid::new_v4(), &charge_ref);

    let err = gateway()
        .charge(&dead_pool(), &row, &forged)
        .await
        .expect_err("mismatched token must be refused");
    assert!(
        err.to_string().contains("attempt token mismatch"),
        "unexpected error: {err:#}"
    );
}

#[tokio::test]
async fn token_with_stale_charge_ref_is_refused() {
    let payment_id = Uuid::new_v4();
    let row = pending_row(payment_id, &Uuid::new_v4().to_string());
    let forged = PaymentAttemptToken::for_test(payment_id, Uuid::new_v4().to_string());

    let err = gateway()
        .charge(&dead_pool(), &row, &forged)
        .await
        .expect_err("stale charge_ref must be refused");
    assert!(err.to_string().contains("attempt token mismatch"));
}

#[tokio::test]
async fn gate_refusal_survives_a_dead_database() {
    // FAILED marking is best-effort: with no database the refusal must still
    // reach the caller rather than being masked by the write failure.
    let charge_ref = Uuid::new_v4().to_string();
    let payment_id = Uuid::new_v4();
    let row = pending_row(payment_id, &charge_ref);
    let token = PaymentAttemptToken::for_test(payment_id, &charge_ref);

    let tight = PaymentGateway::new(Arc::new(UnreachableProvider), vec![Currency::Usd], 100);
    let err = tight
        .charge(&dead_pool(), &row, &token)
        .await
        .expect_err("over-limit charge must be refused");
    assert!(
        err.to_string().starts_with("GATE_REFUSED: amount"),
        "unexpected error: {err:#}"
    );
}
