//! Payment attempt rows.
//!
//! One order can accumulate several attempts (attempt_seq 1, 2, ...); each
//! attempt is a fresh row with its own deterministic charge_ref. Status
//! changes go through the shop-orders payment state machine.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use shop_orders::{OrderStatus, PaymentEvent, PaymentLifecycle, PaymentStatus};

#[derive(Debug, Clone)]
pub struct PaymentRow {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub attempt_seq: i64,
    pub charge_ref: String,
    pub status: PaymentStatus,
    pub amount_minor: i64,
    pub currency: String,
    pub provider: String,
    pub provider_charge_id: Option<String>,
    /// Provider decline reason, gate refusal, or sweep provenance.
    pub detail: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

/// Proof that a charge targets a persisted PENDING payment attempt.
///
/// Minted only by [`insert_payment_attempt`]: the attempt row must exist
/// before any provider traffic, so a crash mid-charge leaves a sweepable
/// PENDING row instead of an untracked provider charge. The `_priv` field is
/// `pub(crate)` and there is no public constructor, so external code cannot
/// fabricate one via struct literal.
#[allow(clippy::manual_non_exhaustive)]
#[derive(Debug, Clone)]
pub struct PaymentAttemptToken {
    /// The payment row this charge is allowed to act on.
    pub payment_id: Uuid,
    /// The deterministic charge reference of that row.
    pub charge_ref: String,
    /// Prevents struct-literal construction outside this crate.
    pub(crate) _priv: (),
}

impl PaymentAttemptToken {
    /// Test-only constructor. Gated so production crates cannot fabricate
    /// attempt provenance; only test builds activate `testkit`.
    #[cfg(feature = "testkit")]
    pub fn for_test(payment_id: Uuid, charge_ref: impl Into<String>) -> Self {
        Self {
            payment_id,
            charge_ref: charge_ref.into(),
            _priv: (),
        }
    }
}

/// Derive the charge reference for (order, attempt).
///
/// UUIDv5 in the order's namespace: the same attempt always derives the same
/// ref, so a retried insert collides on payments_charge_ref_uniq instead of
/// opening a second charge at the provider.
pub fn charge_ref_for(order_id: Uuid, attempt_seq: i64) -> String {
    Uuid::new_v5(&order_id, attempt_seq.to_string().as_bytes()).to_string()
}

/// Open a new payment attempt for an order.
///
/// The order row is locked first, which serializes concurrent attempts and
/// makes attempt_seq gapless per order. Only a PENDING_PAYMENT order can
/// open an attempt; anything else fails with `ORDER_NOT_PAYABLE`.
///
/// Returns the row plus the [`PaymentAttemptToken`] the gateway requires.
pub async fn insert_payment_attempt(
    pool: &PgPool,
    order_id: Uuid,
    provider: &str,
) -> Result<(PaymentRow, PaymentAttemptToken)> {
    let mut tx = pool
        .begin()
        .await
        .context("insert_payment_attempt begin failed")?;

    let order = sqlx::query(
        r#"
        select status, currency, total_minor
        from orders
        where order_id = $1
        for update
        "#,
    )
    .bind(order_id)
    .fetch_optional(&mut *tx)
    .await
    .context("insert_payment_attempt order lock failed")?;

    let order = order.ok_or_else(|| anyhow!("ORDER_NOT_FOUND: {order_id}"))?;
    let status = OrderStatus::parse(&order.try_get::<String, _>("status")?)?;
    if status != OrderStatus::PendingPayment {
        return Err(anyhow!(
            "ORDER_NOT_PAYABLE: order={order_id} status={}",
            status.as_str()
        ));
    }
    let currency: String = order.try_get("currency")?;
    let amount_minor: i64 = order.try_get("total_minor")?;

    let (seq,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select coalesce(max(attempt_seq), 0) + 1
        from payments
        where order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_one(&mut *tx)
    .await
    .context("insert_payment_attempt seq query failed")?;

    let payment_id = Uuid::new_v4();
    let charge_ref = charge_ref_for(order_id, seq);

    let row = sqlx::query(
        r#"
        insert into payments
          (payment_id, order_id, attempt_seq, charge_ref, status, amount_minor, currency, provider)
        values
          ($1, $2, $3, $4, $5, $6, $7, $8)
        returning created_at_utc, updated_at_utc
        "#,
    )
    .bind(payment_id)
    .bind(order_id)
    .bind(seq)
    .bind(&charge_ref)
    .bind(PaymentStatus::Pending.as_str())
    .bind(amount_minor)
    .bind(&currency)
    .bind(provider)
    .fetch_one(&mut *tx)
    .await
    .context("insert_payment_attempt insert failed")?;

    let created_at_utc = row.try_get("created_at_utc")?;
    let updated_at_utc = row.try_get("updated_at_utc")?;

    tx.commit()
        .await
        .context("insert_payment_attempt commit failed")?;

    let token = PaymentAttemptToken {
        payment_id,
        charge_ref: charge_ref.clone(),
        _priv: (),
    };

    Ok((
        PaymentRow {
            payment_id,
            order_id,
            attempt_seq: seq,
            charge_ref,
            status: PaymentStatus::Pending,
            amount_minor,
            currency,
            provider: provider.to_string(),
            provider_charge_id: None,
            detail: None,
            created_at_utc,
            updated_at_utc,
        },
        token,
    ))
}

/// Apply a payment lifecycle event and persist the new status.
///
/// `provider_charge_id` is recorded when the provider hands one back
/// (authorize); later events keep the stored value. `detail` records a
/// decline reason or refusal alongside a FAILED status.
pub async fn record_payment_event(
    pool: &PgPool,
    payment_id: Uuid,
    event: &PaymentEvent,
    provider_charge_id: Option<&str>,
    detail: Option<&str>,
) -> Result<PaymentRow> {
    let mut tx = pool
        .begin()
        .await
        .context("record_payment_event begin failed")?;

    let row = sqlx::query(
        r#"
        select payment_id, order_id, attempt_seq, charge_ref, status, amount_minor,
               currency, provider, provider_charge_id, detail, created_at_utc, updated_at_utc
        from payments
        where payment_id = $1
        for update
        "#,
    )
    .bind(payment_id)
    .fetch_optional(&mut *tx)
    .await
    .context("record_payment_event lock failed")?;

    let mut payment = match row {
        Some(row) => map_payment_row(row)?,
        None => return Err(anyhow!("PAYMENT_NOT_FOUND: {payment_id}")),
    };

    let mut lifecycle = PaymentLifecycle::from_status(payment_id, payment.status);
    lifecycle.apply(event, None)?;

    let row = sqlx::query(
        r#"
        update payments
        set status = $2,
            provider_charge_id = coalesce($3, provider_charge_id),
            detail = coalesce($4, detail),
            updated_at_utc = now()
        where payment_id = $1
        returning provider_charge_id, detail, updated_at_utc
        "#,
    )
    .bind(payment_id)
    .bind(lifecycle.status.as_str())
    .bind(provider_charge_id)
    .bind(detail)
    .fetch_one(&mut *tx)
    .await
    .context("record_payment_event update failed")?;

    payment.status = lifecycle.status;
    payment.provider_charge_id = row.try_get("provider_charge_id")?;
    payment.detail = row.try_get("detail")?;
    payment.updated_at_utc = row.try_get("updated_at_utc")?;

    tx.commit()
        .await
        .context("record_payment_event commit failed")?;
    Ok(payment)
}

pub async fn fetch_payment(pool: &PgPool, payment_id: Uuid) -> Result<Option<PaymentRow>> {
    let row = sqlx::query(
        r#"
        select payment_id, order_id, attempt_seq, charge_ref, status, amount_minor,
               currency, provider, provider_charge_id, detail, created_at_utc, updated_at_utc
        from payments
        where payment_id = $1
        "#,
    )
    .bind(payment_id)
    .fetch_optional(pool)
    .await
    .context("fetch_payment failed")?;

    row.map(map_payment_row).transpose()
}

/// The most recent attempt for an order, if any.
pub async fn latest_attempt(pool: &PgPool, order_id: Uuid) -> Result<Option<PaymentRow>> {
    let row = sqlx::query(
        r#"
        select payment_id, order_id, attempt_seq, charge_ref, status, amount_minor,
               currency, provider, provider_charge_id, detail, created_at_utc, updated_at_utc
        from payments
        where order_id = $1
        order by attempt_seq desc
        limit 1
        "#,
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await
    .context("latest_attempt failed")?;

    row.map(map_payment_row).transpose()
}

pub async fn list_attempts(pool: &PgPool, order_id: Uuid) -> Result<Vec<PaymentRow>> {
    let rows = sqlx::query(
        r#"
        select payment_id, order_id, attempt_seq, charge_ref, status, amount_minor,
               currency, provider, provider_charge_id, detail, created_at_utc, updated_at_utc
        from payments
        where order_id = $1
        order by attempt_seq
        "#,
    )
    .bind(order_id)
    .fetch_all(pool)
    .await
    .context("list_attempts failed")?;

    rows.into_iter().map(map_payment_row).collect()
}

/// PENDING attempts older than `older_than_secs`, without mutating them.
/// The CLI shows this listing before a sweep is confirmed.
pub async fn list_stale_pending(pool: &PgPool, older_than_secs: i64) -> Result<Vec<PaymentRow>> {
    if older_than_secs <= 0 {
        return Err(anyhow!("sweep older_than_secs must be > 0"));
    }

    let rows = sqlx::query(
        r#"
        select payment_id, order_id, attempt_seq, charge_ref, status, amount_minor,
               currency, provider, provider_charge_id, detail, created_at_utc, updated_at_utc
        from payments
        where status = 'PENDING'
          and created_at_utc < now() - make_interval(secs => $1)
        order by created_at_utc
        "#,
    )
    .bind(older_than_secs as f64)
    .fetch_all(pool)
    .await
    .context("list_stale_pending failed")?;

    rows.into_iter().map(map_payment_row).collect()
}

/// AUTHORIZED attempts older than `older_than_secs`, without mutating them.
/// The gateway sweep voids these at the provider before marking the rows.
pub async fn list_stale_authorized(
    pool: &PgPool,
    older_than_secs: i64,
) -> Result<Vec<PaymentRow>> {
    if older_than_secs <= 0 {
        return Err(anyhow!("sweep older_than_secs must be > 0"));
    }

    let rows = sqlx::query(
        r#"
        select payment_id, order_id, attempt_seq, charge_ref, status, amount_minor,
               currency, provider, provider_charge_id, detail, created_at_utc, updated_at_utc
        from payments
        where status = 'AUTHORIZED'
          and created_at_utc < now() - make_interval(secs => $1)
        order by created_at_utc
        "#,
    )
    .bind(older_than_secs as f64)
    .fetch_all(pool)
    .await
    .context("list_stale_authorized failed")?;

    rows.into_iter().map(map_payment_row).collect()
}

/// Fail every PENDING attempt older than `older_than_secs`.
///
/// Attempts the gateway never resolved (crash between insert and capture)
/// would otherwise sit PENDING forever. Returns the swept rows so callers
/// can log or publish each one.
pub async fn sweep_stale_pending(pool: &PgPool, older_than_secs: i64) -> Result<Vec<PaymentRow>> {
    if older_than_secs <= 0 {
        return Err(anyhow!("sweep older_than_secs must be > 0"));
    }

    let rows = sqlx::query(
        r#"
        update payments
        set status = 'FAILED',
            detail = coalesce(detail, 'swept: stale pending'),
            updated_at_utc = now()
        where status = 'PENDING'
          and created_at_utc < now() - make_interval(secs => $1)
        returning payment_id, order_id, attempt_seq, charge_ref, status, amount_minor,
                  currency, provider, provider_charge_id, detail, created_at_utc, updated_at_utc
        "#,
    )
    .bind(older_than_secs as f64)
    .fetch_all(pool)
    .await
    .context("sweep_stale_pending failed")?;

    rows.into_iter().map(map_payment_row).collect()
}

fn map_payment_row(row: PgRow) -> Result<PaymentRow> {
    Ok(PaymentRow {
        payment_id: row.try_get("payment_id")?,
        order_id: row.try_get("order_id")?,
        attempt_seq: row.try_get("attempt_seq")?,
        charge_ref: row.try_get("charge_ref")?,
        status: PaymentStatus::parse(&row.try_get::<String, _>("status")?)?,
        amount_minor: row.try_get("amount_minor")?,
        currency: row.try_get("currency")?,
        provider: row.try_get("provider")?,
        provider_charge_id: row.try_get("provider_charge_id")?,
        detail: row.try_get("detail")?,
        created_at_utc: row.try_get("created_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_ref_is_deterministic_per_attempt() {
        let order = Uuid::from_u128(42);
        assert_eq!(charge_ref_for(order, 1), charge_ref_for(order, 1));
        assert_ne!(charge_ref_for(order, 1), charge_ref_for(order, 2));
    }

    #[test]
    fn charge_ref_differs_across_orders() {
        assert_ne!(
            charge_ref_for(Uuid::from_u128(1), 1),
            charge_ref_for(Uuid::from_u128(2), 1)
        );
    }

    #[test]
    fn charge_ref_is_a_uuid() {
        let s = charge_ref_for(Uuid::from_u128(7), 3);
        assert!(Uuid::parse_str(&s).is_ok());
    }
}
