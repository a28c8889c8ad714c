//! `system_settings` key/value rows: migration flags and OAuth2 state nonces.

use chrono::{Duration, Utc};
use sha2::{Digest, Sha512};
use sqlx::SqliteExecutor;

use crate::error::Result;
use crate::models::to_micros;

/// How long a stored OAuth2 state stays valid.
pub const OAUTH2_STATE_TTL_SECS: i64 = 300;

const OAUTH2_KEY_PREFIX: &str = "oauth2_";

/// Read a setting, ignoring expired rows.
pub async fn get_setting<'e, E: SqliteExecutor<'e>>(ex: E, name: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>(
        r#"
        SELECT value
        FROM msteamssync_system_settings
        WHERE name = ? AND (expiresAt = 0 OR expiresAt > ?)
        "#,
    )
    .bind(name)
    .bind(to_micros(Utc::now()))
    .fetch_optional(ex)
    .await?;

    Ok(value)
}

/// Insert or replace a setting. `ttl` of `None` never expires.
pub async fn set_setting<'e, E: SqliteExecutor<'e>>(
    ex: E,
    name: &str,
    value: &str,
    ttl: Option<Duration>,
) -> Result<()> {
    let expires_at = ttl.map(|ttl| to_micros(Utc::now() + ttl)).unwrap_or(0);
    sqlx::query(
        r#"
        INSERT INTO msteamssync_system_settings (name, value, expiresAt)
        VALUES (?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET value = excluded.value, expiresAt = excluded.expiresAt
        "#,
    )
    .bind(name)
    .bind(value)
    .bind(expires_at)
    .execute(ex)
    .await?;

    Ok(())
}

/// Delete a setting.
pub async fn delete_setting<'e, E: SqliteExecutor<'e>>(ex: E, name: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM msteamssync_system_settings WHERE name = ?")
        .bind(name)
        .execute(ex)
        .await?;

    Ok(result.rows_affected())
}

/// Whether a boolean flag setting is `"true"`.
pub async fn is_flag_set<'e, E: SqliteExecutor<'e>>(ex: E, name: &str) -> Result<bool> {
    Ok(get_setting(ex, name).await?.as_deref() == Some("true"))
}

/// Key under which an OAuth2 state is stored.
pub fn oauth2_state_key(state: &str) -> String {
    let digest = Sha512::digest(state.as_bytes());
    format!("{OAUTH2_KEY_PREFIX}{}", hex::encode(digest))
}

/// Remember an OAuth2 state for [`OAUTH2_STATE_TTL_SECS`].
pub async fn store_oauth2_state<'e, E: SqliteExecutor<'e>>(ex: E, state: &str) -> Result<()> {
    set_setting(
        ex,
        &oauth2_state_key(state),
        state,
        Some(Duration::seconds(OAUTH2_STATE_TTL_SECS)),
    )
    .await
}

/// Check and consume an OAuth2 state. Returns `false` when it is unknown,
/// expired or does not match.
pub async fn verify_oauth2_state(conn: &mut sqlx::SqliteConnection, state: &str) -> Result<bool> {
    let key = oauth2_state_key(state);
    let stored = get_setting(&mut *conn, &key).await?;
    delete_setting(&mut *conn, &key).await?;

    Ok(stored.as_deref() == Some(state))
}
