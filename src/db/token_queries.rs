use sqlx::{Row, SqlitePool};

use crate::models::token::ApiToken;

/// Look up a worker token by its secret value.
pub async fn find_token(pool: &SqlitePool, token: &str) -> Result<Option<ApiToken>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, token, description, is_active, created_at, last_used_at
        FROM api_tokens
        WHERE token = $1
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        Ok(ApiToken {
            id: r.try_get("id")?,
            token: r.try_get("token")?,
            description: r.try_get("description")?,
            is_active: r.try_get("is_active")?,
            created_at: r.try_get("created_at")?,
            last_used_at: r.try_get("last_used_at")?,
        })
    })
    .transpose()
}

/// Stamp `last_used_at` on a token.
pub async fn touch_token(pool: &SqlitePool, token_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE api_tokens SET last_used_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = $1",
    )
    .bind(token_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Provision an active token. Returns `false` if the token already exists,
/// in which case its active flag is left as it was.
pub async fn create_token(
    pool: &SqlitePool,
    token: &str,
    description: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO api_tokens (token, description, is_active) VALUES ($1, $2, 1)",
    )
    .bind(token)
    .bind(description)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Revoke a token by clearing its active flag. The row is kept so its
/// `last_used_at` history survives.
pub async fn revoke_token(pool: &SqlitePool, token: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE api_tokens SET is_active = 0 WHERE token = $1")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}
