//! Cart rows.
//!
//! Each user has at most one open cart (carts_user_uniq); lines upsert by
//! (cart_id, product_id). Reads come back ordered by product_id so pricing
//! and placement see a stable line order.

use anyhow::{anyhow, Context, Result};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use shop_cart::{Cart, CartLine};

#[derive(Debug, Clone, Copy)]
pub struct CartHeader {
    pub cart_id: Uuid,
    pub user_id: Uuid,
}

/// Fetch the user's cart, creating an empty one on first touch.
pub async fn fetch_or_create_cart(pool: &PgPool, user_id: Uuid) -> Result<CartHeader> {
    // Races resolve via the unique constraint; the follow-up select always
    // sees exactly one row.
    sqlx::query(
        r#"
        insert into carts (cart_id, user_id)
        values ($1, $2)
        on conflict on constraint carts_user_uniq do nothing
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .execute(pool)
    .await
    .context("fetch_or_create_cart insert failed")?;

    let row = sqlx::query("select cart_id from carts where user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .context("fetch_or_create_cart select failed")?;

    Ok(CartHeader {
        cart_id: row.try_get("cart_id")?,
        user_id,
    })
}

/// The user's cart with lines, ordered by product_id. Creates the cart row
/// if the user has never touched one.
pub async fn fetch_cart(pool: &PgPool, user_id: Uuid) -> Result<Cart> {
    let header = fetch_or_create_cart(pool, user_id).await?;

    let rows = sqlx::query(
        r#"
        select product_id, qty
        from cart_lines
        where cart_id = $1
        order by product_id
        "#,
    )
    .bind(header.cart_id)
    .fetch_all(pool)
    .await
    .context("fetch_cart lines failed")?;

    let mut lines = Vec::with_capacity(rows.len());
    for row in rows {
        lines.push(CartLine {
            product_id: row.try_get("product_id")?,
            qty: row.try_get("qty")?,
        });
    }

    Ok(Cart {
        cart_id: header.cart_id,
        user_id,
        lines,
    })
}

/// Add `qty` of a product to the cart (existing line increments).
///
/// The product must exist and be active; errors carry a stable prefix so the
/// API layer can map them to not-found vs unprocessable.
pub async fn add_line(pool: &PgPool, cart_id: Uuid, product_id: Uuid, qty: i64) -> Result<()> {
    if qty <= 0 {
        return Err(anyhow!("BAD_QTY: {qty}"));
    }

    let product = sqlx::query("select sku, active from products where product_id = $1")
        .bind(product_id)
        .fetch_optional(pool)
        .await
        .context("add_line product lookup failed")?;

    let product = product.ok_or_else(|| anyhow!("PRODUCT_NOT_FOUND: {product_id}"))?;
    let sku: String = product.try_get("sku")?;
    let active: bool = product.try_get("active")?;
    if !active {
        return Err(anyhow!("PRODUCT_INACTIVE: sku={sku} product={product_id}"));
    }

    sqlx::query(
        r#"
        insert into cart_lines (cart_id, product_id, qty)
        values ($1, $2, $3)
        on conflict (cart_id, product_id) do update set
          qty = cart_lines.qty + excluded.qty
        "#,
    )
    .bind(cart_id)
    .bind(product_id)
    .bind(qty)
    .execute(pool)
    .await
    .context("add_line upsert failed")?;

    touch_cart(pool, cart_id).await
}

/// Set an existing line to an absolute quantity. Returns false when the line
/// does not exist (the API maps that to not-found).
pub async fn set_line_qty(
    pool: &PgPool,
    cart_id: Uuid,
    product_id: Uuid,
    qty: i64,
) -> Result<bool> {
    if qty <= 0 {
        return Err(anyhow!("BAD_QTY: {qty}"));
    }

    let res = sqlx::query(
        r#"
        update cart_lines
        set qty = $3
        where cart_id = $1 and product_id = $2
        "#,
    )
    .bind(cart_id)
    .bind(product_id)
    .bind(qty)
    .execute(pool)
    .await
    .context("set_line_qty failed")?;

    if res.rows_affected() == 0 {
        return Ok(false);
    }
    touch_cart(pool, cart_id).await?;
    Ok(true)
}

/// Remove a line. Removing an absent line is not an error.
pub async fn remove_line(pool: &PgPool, cart_id: Uuid, product_id: Uuid) -> Result<bool> {
    let res = sqlx::query(
        r#"
        delete from cart_lines
        where cart_id = $1 and product_id = $2
        "#,
    )
    .bind(cart_id)
    .bind(product_id)
    .execute(pool)
    .await
    .context("remove_line failed")?;

    if res.rows_affected() == 0 {
        return Ok(false);
    }
    touch_cart(pool, cart_id).await?;
    Ok(true)
}

/// Drop every line from the cart. Returns the number of lines removed.
pub async fn clear_cart(pool: &PgPool, cart_id: Uuid) -> Result<u64> {
    let res = sqlx::query("delete from cart_lines where cart_id = $1")
        .bind(cart_id)
        .execute(pool)
        .await
        .context("clear_cart failed")?;

    if res.rows_affected() > 0 {
        touch_cart(pool, cart_id).await?;
    }
    Ok(res.rows_affected())
}

async fn touch_cart(pool: &PgPool, cart_id: Uuid) -> Result<()> {
    sqlx::query("update carts set updated_at_utc = now() where cart_id = $1")
        .bind(cart_id)
        .execute(pool)
        .await
        .context("touch_cart failed")?;
    Ok(())
}
