//! Account rows.
//!
//! Password hashes are opaque strings here; shop-auth owns their format.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use shop_auth::Role;

use crate::is_unique_constraint_violation;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at_utc: DateTime<Utc>,
}

/// Insert a new account.
///
/// A duplicate email surfaces as `EMAIL_TAKEN: <email>` so callers can map it
/// to a conflict response without string-parsing Postgres internals.
pub async fn insert_user(pool: &PgPool, user: &NewUser) -> Result<()> {
    let res = sqlx::query(
        r#"
        insert into users (user_id, email, password_hash, role)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(user.user_id)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.role.as_str())
    .execute(pool)
    .await;

    match res {
        Ok(_) => Ok(()),
        Err(e) => {
            if is_unique_constraint_violation(&e, "users_email_uniq") {
                return Err(anyhow!("EMAIL_TAKEN: {}", user.email));
            }
            Err(anyhow::Error::new(e).context("insert_user failed"))
        }
    }
}

pub async fn fetch_user(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRow>> {
    let row = sqlx::query(
        r#"
        select user_id, email, password_hash, role, created_at_utc
        from users
        where user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("fetch_user failed")?;

    row.map(map_user_row).transpose()
}

pub async fn fetch_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRow>> {
    let row = sqlx::query(
        r#"
        select user_id, email, password_hash, role, created_at_utc
        from users
        where email = $1
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .context("fetch_user_by_email failed")?;

    row.map(map_user_row).transpose()
}

/// Promote an account to ADMIN by email. Returns false when no row matched.
pub async fn promote_to_admin(pool: &PgPool, email: &str) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update users
        set role = 'ADMIN'
        where email = $1
        "#,
    )
    .bind(email)
    .execute(pool)
    .await
    .context("promote_to_admin failed")?;

    Ok(res.rows_affected() > 0)
}

fn map_user_row(row: PgRow) -> Result<UserRow> {
    Ok(UserRow {
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role: Role::parse(&row.try_get::<String, _>("role")?)?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}
