//! Product catalog: rows, lookups, and CSV bulk import.
//!
//! The importer validates every record, buckets rejects deterministically,
//! and upserts by SKU, so re-running the same file converges instead of
//! duplicating products. `dry_run` produces the full report with no writes.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use shop_cart::{Currency, Money, ProductInfo, ProductMap};

use crate::is_unique_constraint_violation;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub stock: i64,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct ProductRow {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price_minor: i64,
    pub currency: String,
    pub stock: i64,
    pub active: bool,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

impl ProductRow {
    pub fn price(&self) -> Result<Money> {
        let currency = Currency::parse(&self.currency)?;
        Ok(Money::new(self.price_minor, currency))
    }

    /// Catalog view consumed by cart pricing.
    pub fn to_info(&self) -> Result<ProductInfo> {
        Ok(ProductInfo {
            product_id: self.product_id,
            sku: self.sku.clone(),
            name: self.name.clone(),
            price: self.price()?,
            stock: self.stock,
            active: self.active,
        })
    }
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

pub async fn insert_product(pool: &PgPool, product: &NewProduct) -> Result<()> {
    let res = sqlx::query(
        r#"
        insert into products (product_id, sku, name, description, price_minor, currency, stock, active)
        values ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(product.product_id)
    .bind(&product.sku)
    .bind(&product.name)
    .bind(&product.description)
    .bind(product.price.minor())
    .bind(product.price.currency().as_str())
    .bind(product.stock)
    .bind(product.active)
    .execute(pool)
    .await;

    match res {
        Ok(_) => Ok(()),
        Err(e) => {
            if is_unique_constraint_violation(&e, "products_sku_uniq") {
                return Err(anyhow!("SKU_TAKEN: {}", product.sku));
            }
            Err(anyhow::Error::new(e).context("insert_product failed"))
        }
    }
}

/// Partial product update. `None` fields keep their current value; `price`
/// moves minor units and currency together.
#[derive(Debug, Clone, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Money>,
    pub stock: Option<i64>,
    pub active: Option<bool>,
}

/// Apply a partial update. Returns the updated row, or None when the
/// product does not exist.
pub async fn update_product(
    pool: &PgPool,
    product_id: Uuid,
    update: &ProductUpdate,
) -> Result<Option<ProductRow>> {
    let row = sqlx::query(
        r#"
        update products set
          name = coalesce($2, name),
          description = coalesce($3, description),
          price_minor = coalesce($4, price_minor),
          currency = coalesce($5, currency),
          stock = coalesce($6, stock),
          active = coalesce($7, active),
          updated_at_utc = now()
        where product_id = $1
        returning product_id, sku, name, description, price_minor, currency,
                  stock, active, created_at_utc, updated_at_utc
        "#,
    )
    .bind(product_id)
    .bind(update.name.as_deref())
    .bind(update.description.as_deref())
    .bind(update.price.as_ref().map(|p| p.minor()))
    .bind(update.price.as_ref().map(|p| p.currency().as_str()))
    .bind(update.stock)
    .bind(update.active)
    .fetch_optional(pool)
    .await
    .context("update_product failed")?;

    row.map(map_product_row).transpose()
}

pub async fn fetch_product(pool: &PgPool, product_id: Uuid) -> Result<Option<ProductRow>> {
    let row = sqlx::query(
        r#"
        select product_id, sku, name, description, price_minor, currency,
               stock, active, created_at_utc, updated_at_utc
        from products
        where product_id = $1
        "#,
    )
    .bind(product_id)
    .fetch_optional(pool)
    .await
    .context("fetch_product failed")?;

    row.map(map_product_row).transpose()
}

pub async fn fetch_product_by_sku(pool: &PgPool, sku: &str) -> Result<Option<ProductRow>> {
    let row = sqlx::query(
        r#"
        select product_id, sku, name, description, price_minor, currency,
               stock, active, created_at_utc, updated_at_utc
        from products
        where sku = $1
        "#,
    )
    .bind(sku)
    .fetch_optional(pool)
    .await
    .context("fetch_product_by_sku failed")?;

    row.map(map_product_row).transpose()
}

/// List products ordered by SKU. The storefront lists active only; ops
/// tooling passes `include_inactive = true`.
pub async fn list_products(pool: &PgPool, include_inactive: bool) -> Result<Vec<ProductRow>> {
    let rows = sqlx::query(
        r#"
        select product_id, sku, name, description, price_minor, currency,
               stock, active, created_at_utc, updated_at_utc
        from products
        where active or $1
        order by sku
        "#,
    )
    .bind(include_inactive)
    .fetch_all(pool)
    .await
    .context("list_products failed")?;

    rows.into_iter().map(map_product_row).collect()
}

#[derive(Debug, Clone)]
pub struct ListProductsArgs {
    pub include_inactive: bool,
    /// Case-insensitive substring match against SKU and name.
    pub search: Option<String>,
    /// 1-based page number.
    pub page: i64,
    pub per_page: i64,
}

#[derive(Debug, Clone)]
pub struct ProductPage {
    pub items: Vec<ProductRow>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

/// One page of the catalog, ordered by SKU, with the total row count for
/// the same filter. Page and per_page are clamped, never rejected.
pub async fn list_products_page(pool: &PgPool, args: &ListProductsArgs) -> Result<ProductPage> {
    let page = args.page.max(1);
    let per_page = args.per_page.clamp(1, 100);
    let offset = (page - 1) * per_page;

    // ILIKE pattern with % and _ escaped so user input matches literally.
    let pattern = args.search.as_deref().map(|q| {
        let escaped = q.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        format!("%{escaped}%")
    });

    let total_row = sqlx::query(
        r#"
        select count(*) as n
        from products
        where (active or $1)
          and ($2::text is null or sku ilike $2 or name ilike $2)
        "#,
    )
    .bind(args.include_inactive)
    .bind(pattern.as_deref())
    .fetch_one(pool)
    .await
    .context("list_products_page count failed")?;
    let total: i64 = total_row.try_get("n")?;

    let rows = sqlx::query(
        r#"
        select product_id, sku, name, description, price_minor, currency,
               stock, active, created_at_utc, updated_at_utc
        from products
        where (active or $1)
          and ($2::text is null or sku ilike $2 or name ilike $2)
        order by sku
        limit $3 offset $4
        "#,
    )
    .bind(args.include_inactive)
    .bind(pattern.as_deref())
    .bind(per_page)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("list_products_page failed")?;

    Ok(ProductPage {
        items: rows.into_iter().map(map_product_row).collect::<Result<_>>()?,
        page,
        per_page,
        total,
    })
}

/// Catalog view for a specific set of products, keyed for cart pricing.
pub async fn product_map(pool: &PgPool, product_ids: &[Uuid]) -> Result<ProductMap> {
    let rows = sqlx::query(
        r#"
        select product_id, sku, name, description, price_minor, currency,
               stock, active, created_at_utc, updated_at_utc
        from products
        where product_id = any($1)
        "#,
    )
    .bind(product_ids)
    .fetch_all(pool)
    .await
    .context("product_map failed")?;

    let mut map = ProductMap::new();
    for row in rows {
        let info = map_product_row(row)?.to_info()?;
        map.insert(info.product_id, info);
    }
    Ok(map)
}

fn map_product_row(row: PgRow) -> Result<ProductRow> {
    Ok(ProductRow {
        product_id: row.try_get("product_id")?,
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price_minor: row.try_get("price_minor")?,
        currency: row.try_get("currency")?,
        stock: row.try_get("stock")?,
        active: row.try_get("active")?,
        created_at_utc: row.try_get("created_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
    })
}

// ---------------------------------------------------------------------------
// CSV import
// ---------------------------------------------------------------------------

/// Expected header: `sku,name,description,price,currency,stock`.
/// `price` is a decimal string ("12.34"); minor units are derived from it.
#[derive(Debug, Clone, Deserialize)]
struct CsvProductRow {
    sku: String,
    name: String,
    description: String,
    price: String,
    currency: String,
    stock: i64,
}

#[derive(Debug, Clone)]
pub struct ImportCsvArgs {
    pub path: PathBuf,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImportRejects {
    pub missing_field: i64,
    pub bad_price: i64,
    pub bad_currency: i64,
    pub bad_stock: i64,
    pub duplicate_in_batch: i64,
    pub unparseable: i64,
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub rows_read: i64,
    pub rows_ok: i64,
    pub rows_rejected: i64,
    pub rows_upserted: i64,
    pub dry_run: bool,
    pub rejects: ImportRejects,
}

pub async fn import_products_csv(pool: &PgPool, args: ImportCsvArgs) -> Result<ImportReport> {
    let text = std::fs::read_to_string(&args.path)
        .with_context(|| format!("open csv path failed: {}", args.path.display()))?;
    import_products_csv_str(pool, &text, args.dry_run).await
}

pub async fn import_products_csv_str(
    pool: &PgPool,
    csv_text: &str,
    dry_run: bool,
) -> Result<ImportReport> {
    let mut report = ImportReport {
        rows_read: 0,
        rows_ok: 0,
        rows_rejected: 0,
        rows_upserted: 0,
        dry_run,
        rejects: ImportRejects::default(),
    };

    let mut rdr = csv::Reader::from_reader(csv_text.as_bytes());

    // Duplicate SKUs within one file are rejected deterministically: the
    // first occurrence wins, later ones count as duplicate_in_batch.
    let mut seen_skus: HashSet<String> = HashSet::new();
    let mut ok_rows: Vec<NewProduct> = Vec::new();

    for rec in rdr.deserialize::<CsvProductRow>() {
        report.rows_read += 1;

        let row = match rec {
            Ok(r) => r,
            Err(_) => {
                report.rejects.unparseable += 1;
                report.rows_rejected += 1;
                continue;
            }
        };

        if row.sku.trim().is_empty() || row.name.trim().is_empty() {
            report.rejects.missing_field += 1;
            report.rows_rejected += 1;
            continue;
        }

        let currency = match Currency::parse(row.currency.trim()) {
            Ok(c) => c,
            Err(_) => {
                report.rejects.bad_currency += 1;
                report.rows_rejected += 1;
                continue;
            }
        };

        let price = match Money::parse(row.price.trim(), currency) {
            Ok(p) if p.is_non_negative() => p,
            _ => {
                report.rejects.bad_price += 1;
                report.rows_rejected += 1;
                continue;
            }
        };

        if row.stock < 0 {
            report.rejects.bad_stock += 1;
            report.rows_rejected += 1;
            continue;
        }

        if !seen_skus.insert(row.sku.trim().to_string()) {
            report.rejects.duplicate_in_batch += 1;
            report.rows_rejected += 1;
            continue;
        }

        report.rows_ok += 1;
        ok_rows.push(NewProduct {
            product_id: Uuid::new_v4(),
            sku: row.sku.trim().to_string(),
            name: row.name.trim().to_string(),
            description: row.description.trim().to_string(),
            price,
            stock: row.stock,
            active: true,
        });
    }

    if dry_run {
        return Ok(report);
    }

    for p in ok_rows {
        sqlx::query(
            r#"
            insert into products
              (product_id, sku, name, description, price_minor, currency, stock, active)
            values
              ($1, $2, $3, $4, $5, $6, $7, $8)
            on conflict on constraint products_sku_uniq do update set
              name = excluded.name,
              description = excluded.description,
              price_minor = excluded.price_minor,
              currency = excluded.currency,
              stock = excluded.stock,
              active = excluded.active,
              updated_at_utc = now()
            "#,
        )
        .bind(p.product_id)
        .bind(&p.sku)
        .bind(&p.name)
        .bind(&p.description)
        .bind(p.price.minor())
        .bind(p.price.currency().as_str())
        .bind(p.stock)
        .bind(p.active)
        .execute(pool)
        .await
        .with_context(|| format!("csv upsert failed for sku {}", p.sku))?;

        report.rows_upserted += 1;
    }

    Ok(report)
}
