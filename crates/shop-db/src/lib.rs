use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub mod carts;
pub mod catalog;
pub mod orders;
pub mod payments;
pub mod users;

pub const ENV_DB_URL: &str = "SHOP_DATABASE_URL";

/// Connect to Postgres using SHOP_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_orders_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

/// Number of applied migrations, 0 when none have run yet.
pub async fn migration_count(pool: &PgPool) -> Result<i64> {
    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='_sqlx_migrations'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("migration_count table-exists query failed")?;
    if !exists {
        return Ok(0);
    }

    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>("select count(*)::bigint from _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("migration_count failed")?;
    Ok(n)
}

/// Count orders. Used by the CLI migrate guardrail: a store that has taken
/// orders should not be re-migrated casually.
pub async fn count_orders(pool: &PgPool) -> Result<i64> {
    // If schema doesn't exist yet, treat as 0 (safe) rather than failing.
    let st = status(pool).await?;
    if !st.has_orders_table {
        return Ok(0);
    }

    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>("select count(*)::bigint from orders")
        .fetch_one(pool)
        .await
        .context("count_orders failed")?;

    Ok(n)
}

/// Convenience boolean.
pub async fn has_orders(pool: &PgPool) -> Result<bool> {
    Ok(count_orders(pool).await? > 0)
}

/// Detect a Postgres unique constraint violation by name.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint)
                // Postgres unique_violation is 23505. Not always present, but helps.
                || db_err.code().as_deref() == Some("23505")
                    && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}
