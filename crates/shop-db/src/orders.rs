//! Order persistence and the placement transaction.
//!
//! `place_order` runs the whole checkout under one transaction:
//!
//! ```text
//! lock cart row ─ load lines ─ lock product rows (product_id order)
//!      │
//!      ├─ price + validate via shop-cart   (pure, against locked rows)
//!      ├─ build_order                      (pure, recomputed total)
//!      ├─ decrement stock                  (check constraint backstops)
//!      ├─ insert order + lines
//!      └─ clear cart
//! commit — or the whole placement never happened
//! ```
//!
//! Products are always locked in product_id order so two overlapping
//! placements cannot deadlock. Status changes go through the shop-orders
//! state machines; this module never writes a status the machine refused.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use shop_cart::{price_cart, validate_for_checkout, Cart, CartLine, Currency, Money, ProductInfo, ProductMap};
use shop_orders::{build_order, OrderEvent, OrderLifecycle, OrderStatus};

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrderRow {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub currency: String,
    pub total_minor: i64,
    pub placed_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

impl OrderRow {
    pub fn total(&self) -> Result<Money> {
        let currency = Currency::parse(&self.currency)?;
        Ok(Money::new(self.total_minor, currency))
    }
}

#[derive(Debug, Clone)]
pub struct OrderLineRow {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub unit_price_minor: i64,
    pub qty: i64,
    pub line_total_minor: i64,
}

#[derive(Debug, Clone)]
pub struct OrderWithLines {
    pub order: OrderRow,
    pub lines: Vec<OrderLineRow>,
}

/// Result of a successful placement. `stock_after` reports the remaining
/// stock per decremented product so callers can raise low-stock signals
/// without re-querying.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: OrderRow,
    pub lines: Vec<OrderLineRow>,
    pub stock_after: Vec<(Uuid, i64)>,
}

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

/// Place an order from the user's cart.
///
/// The caller supplies `order_id` so a retried request can converge on one
/// order instead of placing two. Fails with `CART_EMPTY` when there is
/// nothing to buy and with the pricing layer's errors (including
/// `STOCK_INSUFFICIENT: ...`) when the cart cannot be honored; any failure
/// rolls back every effect.
pub async fn place_order(pool: &PgPool, user_id: Uuid, order_id: Uuid) -> Result<PlacedOrder> {
    let mut tx = pool.begin().await.context("place_order begin failed")?;

    // Cart row lock serializes concurrent placements by the same user.
    let cart_row = sqlx::query("select cart_id from carts where user_id = $1 for update")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("place_order cart lookup failed")?;

    let cart_id: Uuid = match cart_row {
        Some(row) => row.try_get("cart_id")?,
        None => return Err(anyhow!("CART_EMPTY: user={user_id}")),
    };

    let line_rows = sqlx::query(
        r#"
        select product_id, qty
        from cart_lines
        where cart_id = $1
        order by product_id
        "#,
    )
    .bind(cart_id)
    .fetch_all(&mut *tx)
    .await
    .context("place_order cart lines failed")?;

    if line_rows.is_empty() {
        return Err(anyhow!("CART_EMPTY: user={user_id}"));
    }

    let mut lines = Vec::with_capacity(line_rows.len());
    for row in &line_rows {
        lines.push(CartLine {
            product_id: row.try_get("product_id")?,
            qty: row.try_get("qty")?,
        });
    }

    // Lock every product the cart touches, in product_id order.
    let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    let product_rows = sqlx::query(
        r#"
        select product_id, sku, name, price_minor, currency, stock, active
        from products
        where product_id = any($1)
        order by product_id
        for update
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *tx)
    .await
    .context("place_order product lock failed")?;

    let mut products = ProductMap::new();
    for row in product_rows {
        let currency = Currency::parse(&row.try_get::<String, _>("currency")?)?;
        let info = ProductInfo {
            product_id: row.try_get("product_id")?,
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            price: Money::new(row.try_get("price_minor")?, currency),
            stock: row.try_get("stock")?,
            active: row.try_get("active")?,
        };
        products.insert(info.product_id, info);
    }

    // Pure validation and totalling against the locked rows.
    let cart = Cart {
        cart_id,
        user_id,
        lines,
    };
    let priced = price_cart(&cart, &products)?;
    validate_for_checkout(&priced, &products)?;
    let draft = build_order(order_id, user_id, &priced)?;

    // Decrement stock; the returning clause reports what is left.
    let mut stock_after = Vec::with_capacity(draft.lines.len());
    for line in &draft.lines {
        let row = sqlx::query(
            r#"
            update products
            set stock = stock - $2,
                updated_at_utc = now()
            where product_id = $1
            returning stock
            "#,
        )
        .bind(line.product_id)
        .bind(line.qty)
        .fetch_one(&mut *tx)
        .await
        .context("place_order stock decrement failed")?;
        stock_after.push((line.product_id, row.try_get::<i64, _>("stock")?));
    }

    let order_row = sqlx::query(
        r#"
        insert into orders (order_id, user_id, status, currency, total_minor)
        values ($1, $2, $3, $4, $5)
        returning placed_at_utc, updated_at_utc
        "#,
    )
    .bind(draft.order_id)
    .bind(user_id)
    .bind(OrderStatus::PendingPayment.as_str())
    .bind(draft.currency.as_str())
    .bind(draft.total.minor())
    .fetch_one(&mut *tx)
    .await
    .context("place_order insert order failed")?;

    let mut line_out = Vec::with_capacity(draft.lines.len());
    for line in &draft.lines {
        sqlx::query(
            r#"
            insert into order_lines
              (order_id, product_id, sku, name, unit_price_minor, qty, line_total_minor)
            values
              ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(draft.order_id)
        .bind(line.product_id)
        .bind(&line.sku)
        .bind(&line.name)
        .bind(line.unit_price.minor())
        .bind(line.qty)
        .bind(line.line_total.minor())
        .execute(&mut *tx)
        .await
        .context("place_order insert line failed")?;

        line_out.push(OrderLineRow {
            order_id: draft.order_id,
            product_id: line.product_id,
            sku: line.sku.clone(),
            name: line.name.clone(),
            unit_price_minor: line.unit_price.minor(),
            qty: line.qty,
            line_total_minor: line.line_total.minor(),
        });
    }

    // Same transaction: an order exists iff its cart was consumed.
    sqlx::query("delete from cart_lines where cart_id = $1")
        .bind(cart_id)
        .execute(&mut *tx)
        .await
        .context("place_order clear cart failed")?;
    sqlx::query("update carts set updated_at_utc = now() where cart_id = $1")
        .bind(cart_id)
        .execute(&mut *tx)
        .await
        .context("place_order touch cart failed")?;

    tx.commit().await.context("place_order commit failed")?;

    Ok(PlacedOrder {
        order: OrderRow {
            order_id: draft.order_id,
            user_id,
            status: OrderStatus::PendingPayment,
            currency: draft.currency.as_str().to_string(),
            total_minor: draft.total.minor(),
            placed_at_utc: order_row.try_get("placed_at_utc")?,
            updated_at_utc: order_row.try_get("updated_at_utc")?,
        },
        lines: line_out,
        stock_after,
    })
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Apply a lifecycle event to an order with no side effects beyond status.
/// Used for PaymentCaptured / Ship / Deliver; cancel and refund have their
/// own functions because they also move stock.
pub async fn transition_order(
    pool: &PgPool,
    order_id: Uuid,
    event: &OrderEvent,
) -> Result<OrderRow> {
    let mut tx = pool.begin().await.context("transition_order begin failed")?;
    let mut order = lock_order(&mut tx, order_id, None).await?;

    let mut lifecycle = OrderLifecycle::from_status(order_id, order.status);
    lifecycle.apply(event, None)?;

    order = update_order_status(&mut tx, order, lifecycle.status).await?;
    tx.commit().await.context("transition_order commit failed")?;
    Ok(order)
}

/// Cancel a PENDING_PAYMENT order and put its stock back on the shelf.
///
/// `requester` scopes the lookup: customers can only cancel their own
/// orders (anyone else's order behaves as not-found), operators pass `None`.
pub async fn cancel_order(
    pool: &PgPool,
    order_id: Uuid,
    requester: Option<Uuid>,
) -> Result<OrderRow> {
    let mut tx = pool.begin().await.context("cancel_order begin failed")?;
    let mut order = lock_order(&mut tx, order_id, requester).await?;

    let mut lifecycle = OrderLifecycle::from_status(order_id, order.status);
    lifecycle.apply(&OrderEvent::Cancel, None)?;

    restore_stock(&mut tx, order_id).await?;
    order = update_order_status(&mut tx, order, lifecycle.status).await?;
    tx.commit().await.context("cancel_order commit failed")?;
    Ok(order)
}

/// Refund an order after capture.
///
/// Stock returns to the shelf only when the goods never left it (refund from
/// PAID). A refund after shipment gives money back, not inventory.
pub async fn refund_order(pool: &PgPool, order_id: Uuid) -> Result<OrderRow> {
    let mut tx = pool.begin().await.context("refund_order begin failed")?;
    let mut order = lock_order(&mut tx, order_id, None).await?;
    let was_paid_only = order.status == OrderStatus::Paid;

    let mut lifecycle = OrderLifecycle::from_status(order_id, order.status);
    lifecycle.apply(&OrderEvent::Refund, None)?;

    if was_paid_only {
        restore_stock(&mut tx, order_id).await?;
    }
    order = update_order_status(&mut tx, order, lifecycle.status).await?;
    tx.commit().await.context("refund_order commit failed")?;
    Ok(order)
}

async fn lock_order(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_id: Uuid,
    requester: Option<Uuid>,
) -> Result<OrderRow> {
    let row = sqlx::query(
        r#"
        select order_id, user_id, status, currency, total_minor,
               placed_at_utc, updated_at_utc
        from orders
        where order_id = $1
        for update
        "#,
    )
    .bind(order_id)
    .fetch_optional(&mut **tx)
    .await
    .context("order lock failed")?;

    let order = match row {
        Some(row) => map_order_row(row)?,
        None => return Err(anyhow!("ORDER_NOT_FOUND: {order_id}")),
    };

    // A foreign order is indistinguishable from a missing one.
    if let Some(user_id) = requester {
        if order.user_id != user_id {
            return Err(anyhow!("ORDER_NOT_FOUND: {order_id}"));
        }
    }

    Ok(order)
}

async fn update_order_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    mut order: OrderRow,
    status: OrderStatus,
) -> Result<OrderRow> {
    let row = sqlx::query(
        r#"
        update orders
        set status = $2,
            updated_at_utc = now()
        where order_id = $1
        returning updated_at_utc
        "#,
    )
    .bind(order.order_id)
    .bind(status.as_str())
    .fetch_one(&mut **tx)
    .await
    .context("order status update failed")?;

    order.status = status;
    order.updated_at_utc = row.try_get("updated_at_utc")?;
    Ok(order)
}

async fn restore_stock(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_id: Uuid,
) -> Result<()> {
    sqlx::query(
        r#"
        update products p
        set stock = p.stock + ol.qty,
            updated_at_utc = now()
        from order_lines ol
        where ol.order_id = $1
          and ol.product_id = p.product_id
        "#,
    )
    .bind(order_id)
    .execute(&mut **tx)
    .await
    .context("stock restore failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

pub async fn fetch_order(pool: &PgPool, order_id: Uuid) -> Result<Option<OrderWithLines>> {
    let row = sqlx::query(
        r#"
        select order_id, user_id, status, currency, total_minor,
               placed_at_utc, updated_at_utc
        from orders
        where order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await
    .context("fetch_order failed")?;

    let order = match row {
        Some(row) => map_order_row(row)?,
        None => return Ok(None),
    };

    let line_rows = sqlx::query(
        r#"
        select order_id, product_id, sku, name, unit_price_minor, qty, line_total_minor
        from order_lines
        where order_id = $1
        order by product_id
        "#,
    )
    .bind(order_id)
    .fetch_all(pool)
    .await
    .context("fetch_order lines failed")?;

    let mut lines = Vec::with_capacity(line_rows.len());
    for row in line_rows {
        lines.push(OrderLineRow {
            order_id: row.try_get("order_id")?,
            product_id: row.try_get("product_id")?,
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            unit_price_minor: row.try_get("unit_price_minor")?,
            qty: row.try_get("qty")?,
            line_total_minor: row.try_get("line_total_minor")?,
        });
    }

    Ok(Some(OrderWithLines { order, lines }))
}

/// Orders for one user, newest first.
pub async fn list_orders_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<OrderRow>> {
    let rows = sqlx::query(
        r#"
        select order_id, user_id, status, currency, total_minor,
               placed_at_utc, updated_at_utc
        from orders
        where user_id = $1
        order by placed_at_utc desc
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("list_orders_for_user failed")?;

    rows.into_iter().map(map_order_row).collect()
}

/// Every order in the store, newest first. Operator surface.
pub async fn list_orders_all(pool: &PgPool) -> Result<Vec<OrderRow>> {
    let rows = sqlx::query(
        r#"
        select order_id, user_id, status, currency, total_minor,
               placed_at_utc, updated_at_utc
        from orders
        order by placed_at_utc desc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("list_orders_all failed")?;

    rows.into_iter().map(map_order_row).collect()
}

fn map_order_row(row: PgRow) -> Result<OrderRow> {
    Ok(OrderRow {
        order_id: row.try_get("order_id")?,
        user_id: row.try_get("user_id")?,
        status: OrderStatus::parse(&row.try_get::<String, _>("status")?)?,
        currency: row.try_get("currency")?,
        total_minor: row.try_get("total_minor")?,
        placed_at_utc: row.try_get("placed_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
    })
}
