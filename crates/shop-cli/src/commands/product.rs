//! Catalog command handlers: add, import, list.

use anyhow::Result;
use std::path::PathBuf;
use uuid::Uuid;

use shop_cart::{Currency, Money};
use shop_db::catalog::{self, ImportCsvArgs, NewProduct};

pub async fn add(
    sku: String,
    name: String,
    price: String,
    currency: String,
    stock: i64,
    description: String,
) -> Result<()> {
    // Parse before connecting: a typo in --price should not need a database.
    let currency = Currency::parse(&currency)?;
    let price = Money::parse(&price, currency)?;
    if !price.is_positive() {
        anyhow::bail!("price must be positive, got {}", price.decimal_str());
    }
    if stock < 0 {
        anyhow::bail!("stock must be >= 0, got {stock}");
    }

    let pool = shop_db::connect_from_env().await?;
    let product_id = Uuid::new_v4();
    catalog::insert_product(
        &pool,
        &NewProduct {
            product_id,
            sku: sku.trim().to_string(),
            name: name.trim().to_string(),
            description,
            price,
            stock,
            active: true,
        },
    )
    .await?;

    println!("product_id={product_id}");
    println!(
        "sku={} price={} currency={} stock={stock} active=true",
        sku.trim(),
        price.decimal_str(),
        price.currency().as_str()
    );
    Ok(())
}

pub async fn import(csv: String, dry_run: bool) -> Result<()> {
    let pool = shop_db::connect_from_env().await?;
    let report = catalog::import_products_csv(
        &pool,
        ImportCsvArgs {
            path: PathBuf::from(&csv),
            dry_run,
        },
    )
    .await?;

    println!("csv={csv} dry_run={}", report.dry_run);
    println!(
        "rows_read={} rows_ok={} rows_rejected={} rows_upserted={}",
        report.rows_read, report.rows_ok, report.rows_rejected, report.rows_upserted
    );
    let r = &report.rejects;
    if report.rows_rejected > 0 {
        println!(
            "rejects: missing_field={} bad_price={} bad_currency={} bad_stock={} duplicate_in_batch={} unparseable={}",
            r.missing_field, r.bad_price, r.bad_currency, r.bad_stock, r.duplicate_in_batch, r.unparseable
        );
    }
    if report.dry_run {
        println!("hint=re-run without --dry-run to write {} row(s)", report.rows_ok);
    }
    Ok(())
}

pub async fn list(all: bool) -> Result<()> {
    let pool = shop_db::connect_from_env().await?;
    let rows = catalog::list_products(&pool, all).await?;

    for row in &rows {
        let price = row.price()?;
        println!(
            "sku={} name={:?} price={} currency={} stock={} active={} product_id={}",
            row.sku,
            row.name,
            price.decimal_str(),
            price.currency().as_str(),
            row.stock,
            row.active,
            row.product_id
        );
    }
    println!("products={}", rows.len());
    Ok(())
}
