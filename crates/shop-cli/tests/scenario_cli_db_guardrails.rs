//! DB-backed CLI scenarios: status, the migrate guardrail, catalog
//! commands, promotion and the stale-payment sweep.
//!
//! Every test skips itself when SHOP_DATABASE_URL is not set, so the suite
//! stays green on machines without a local Postgres.

use predicates::prelude::*;
use sqlx::PgPool;
use uuid::Uuid;

use shop_cart::{Currency, Money};

async fn try_pool() -> Option<(String, PgPool)> {
    let url = match std::env::var(shop_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: SHOP_DATABASE_URL not set");
            return None;
        }
    };
    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
    {
        Ok(p) => p,
        Err(e) => {
            eprintln!("SKIP: cannot connect to DB: {e}");
            return None;
        }
    };
    if let Err(e) = shop_db::migrate(&pool).await {
        eprintln!("SKIP: migrate failed: {e}");
        return None;
    }
    Some((url, pool))
}

fn shop_cmd(url: &str) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("shop").expect("shop binary");
    cmd.env(shop_db::ENV_DB_URL, url);
    cmd
}

async fn seed_user(pool: &PgPool) -> anyhow::Result<(Uuid, String)> {
    let user_id = Uuid::new_v4();
    let email = format!("cli-{}@example.test", Uuid::new_v4().simple());
    shop_db::users::insert_user(
        pool,
        &shop_db::users::NewUser {
            user_id,
            email: email.clone(),
            password_hash: shop_auth::hash_password("correct horse battery", 1)?,
            role: shop_auth::Role::Customer,
        },
    )
    .await?;
    Ok((user_id, email))
}

async fn seed_product(pool: &PgPool, price: &str, stock: i64) -> anyhow::Result<(Uuid, String)> {
    let product_id = Uuid::new_v4();
    let sku = format!("CLI-{}", Uuid::new_v4().simple());
    shop_db::catalog::insert_product(
        pool,
        &shop_db::catalog::NewProduct {
            product_id,
            sku: sku.clone(),
            name: format!("Test article {sku}"),
            description: String::new(),
            price: Money::parse(price, Currency::Usd)?,
            stock,
            active: true,
        },
    )
    .await?;
    Ok((product_id, sku))
}

/// A PENDING_PAYMENT order with one line, placed through the same helper
/// the daemon uses.
async fn seed_order(pool: &PgPool, user_id: Uuid, product_id: Uuid) -> anyhow::Result<Uuid> {
    let cart = shop_db::carts::fetch_or_create_cart(pool, user_id).await?;
    shop_db::carts::add_line(pool, cart.cart_id, product_id, 1).await?;
    let placed = shop_db::orders::place_order(pool, user_id, Uuid::new_v4()).await?;
    Ok(placed.order.order_id)
}

#[tokio::test]
async fn cli_db_status_reports_the_migrated_schema() -> anyhow::Result<()> {
    let Some((url, _pool)) = try_pool().await else {
        return Ok(());
    };

    let assertion = shop_cmd(&url).args(["db", "status"]).assert().success();
    let stdout = String::from_utf8(assertion.get_output().stdout.clone())?;
    assert!(stdout.contains("db="), "{stdout}");
    assert!(
        stdout.contains("db_ok=true has_orders_table=true"),
        "{stdout}"
    );
    assert!(stdout.contains("migrations_applied="), "{stdout}");
    Ok(())
}

/// `shop db migrate` must refuse once the database holds orders, unless
/// --yes is given.
#[tokio::test]
async fn cli_db_migrate_refuses_once_orders_exist() -> anyhow::Result<()> {
    let Some((url, pool)) = try_pool().await else {
        return Ok(());
    };

    let (user_id, _) = seed_user(&pool).await?;
    let (product_id, _) = seed_product(&pool, "19.99", 5).await?;
    seed_order(&pool, user_id, product_id).await?;

    shop_cmd(&url)
        .args(["db", "migrate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("REFUSING MIGRATE"));

    shop_cmd(&url)
        .args(["db", "migrate", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("migrations_applied=true"));
    Ok(())
}

#[tokio::test]
async fn cli_product_add_then_list_shows_the_row() -> anyhow::Result<()> {
    let Some((url, _pool)) = try_pool().await else {
        return Ok(());
    };
    let sku = format!("CLI-ADD-{}", Uuid::new_v4().simple());

    // Bad price fails before any database work.
    shop_cmd(&url)
        .args([
            "product", "add", "--sku", &sku, "--name", "Widget", "--price", "-1.00",
            "--currency", "USD", "--stock", "5",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("price must be positive"));

    shop_cmd(&url)
        .args([
            "product", "add", "--sku", &sku, "--name", "Widget", "--price", "12.34",
            "--currency", "USD", "--stock", "5",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("product_id="))
        .stdout(predicate::str::contains(format!(
            "sku={sku} price=12.34 currency=USD stock=5 active=true"
        )));

    shop_cmd(&url)
        .args(["product", "list", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("sku={sku}")))
        .stdout(predicate::str::contains("products="));
    Ok(())
}

#[tokio::test]
async fn cli_product_import_dry_run_writes_nothing() -> anyhow::Result<()> {
    let Some((url, pool)) = try_pool().await else {
        return Ok(());
    };

    let sku_a = format!("CLI-IMP-{}", Uuid::new_v4().simple());
    let sku_b = format!("CLI-IMP-{}", Uuid::new_v4().simple());
    let dir = tempfile::tempdir()?;
    let csv_path = dir.path().join("products.csv");
    std::fs::write(
        &csv_path,
        format!(
            "sku,name,description,price,currency,stock\n\
             {sku_a},Imported One,First,9.99,USD,3\n\
             {sku_b},Imported Two,Second,4.50,USD,7\n\
             BAD-PRICE,Imported Three,Third,cheap,USD,3\n"
        ),
    )?;
    let csv_arg = csv_path.to_string_lossy().to_string();

    shop_cmd(&url)
        .args(["product", "import", "--csv", &csv_arg, "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dry_run=true"))
        .stdout(predicate::str::contains(
            "rows_read=3 rows_ok=2 rows_rejected=1 rows_upserted=0",
        ))
        .stdout(predicate::str::contains("bad_price=1"))
        .stdout(predicate::str::contains("hint=re-run without --dry-run"));
    assert!(
        shop_db::catalog::fetch_product_by_sku(&pool, &sku_a)
            .await?
            .is_none(),
        "dry run must not upsert"
    );

    shop_cmd(&url)
        .args(["product", "import", "--csv", &csv_arg])
        .assert()
        .success()
        .stdout(predicate::str::contains("rows_upserted=2"));
    assert!(shop_db::catalog::fetch_product_by_sku(&pool, &sku_a)
        .await?
        .is_some());
    Ok(())
}

#[tokio::test]
async fn cli_user_promote_upgrades_the_role_and_audits() -> anyhow::Result<()> {
    let Some((url, pool)) = try_pool().await else {
        return Ok(());
    };
    let (_, email) = seed_user(&pool).await?;
    let audit_dir = tempfile::tempdir()?;

    shop_cmd(&url)
        .env("SHOP_AUDIT_DIR", audit_dir.path())
        .args(["user", "promote", "--email", &email])
        .assert()
        .success()
        .stdout(predicate::str::contains("promoted=true"))
        .stdout(predicate::str::contains("role=ADMIN"));

    let row = shop_db::users::fetch_user_by_email(&pool, &email)
        .await?
        .ok_or_else(|| anyhow::anyhow!("promoted user vanished"))?;
    assert!(row.role.is_admin());

    let audited = std::fs::read_dir(audit_dir.path())?
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().starts_with("admin-"));
    assert!(audited, "promotion must leave an admin audit record");

    shop_cmd(&url)
        .env("SHOP_AUDIT_DIR", audit_dir.path())
        .args([
            "user",
            "promote",
            "--email",
            &format!("nobody-{}@example.test", Uuid::new_v4().simple()),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no user with email"));
    Ok(())
}

#[tokio::test]
async fn cli_payments_sweep_is_dry_run_without_yes() -> anyhow::Result<()> {
    let Some((url, pool)) = try_pool().await else {
        return Ok(());
    };

    let (user_id, _) = seed_user(&pool).await?;
    let (product_id, _) = seed_product(&pool, "19.99", 5).await?;
    let order_id = seed_order(&pool, user_id, product_id).await?;
    let (attempt, _token) =
        shop_db::payments::insert_payment_attempt(&pool, order_id, "sandbox").await?;

    // Age the attempt past the sweep threshold.
    sqlx::query(
        "update payments set created_at_utc = created_at_utc - interval '1 hour' \
         where payment_id = $1",
    )
    .bind(attempt.payment_id)
    .execute(&pool)
    .await?;

    shop_cmd(&url)
        .args(["payments", "sweep", "--older-than-secs", "1800"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "stale payment_id={}",
            attempt.payment_id
        )))
        .stdout(predicate::str::contains("dry_run=true"))
        .stdout(predicate::str::contains("hint=re-run with --yes"));
    let after_dry = shop_db::payments::fetch_payment(&pool, attempt.payment_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("attempt vanished"))?;
    assert_eq!(after_dry.status.as_str(), "PENDING");

    shop_cmd(&url)
        .args(["payments", "sweep", "--older-than-secs", "1800", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "swept payment_id={}",
            attempt.payment_id
        )));
    let after_sweep = shop_db::payments::fetch_payment(&pool, attempt.payment_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("attempt vanished"))?;
    assert_eq!(after_sweep.status.as_str(), "FAILED");
    Ok(())
}
