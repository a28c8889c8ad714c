//! User links, sealed tokens and connect/disconnect accounting.

use bridge_core::OAuthToken;
use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqliteExecutor};

use crate::crypt::TokenCipher;
use crate::error::{Result, StoreError};
use crate::models::{optional_from_micros, to_micros, ConnectedUser, UserChatActivity, UserConnectStatus};

#[derive(sqlx::FromRow)]
struct ConnectRow {
    token: Option<String>,
    #[sqlx(rename = "lastConnectAt")]
    last_connect_at: i64,
    #[sqlx(rename = "lastDisconnectAt")]
    last_disconnect_at: i64,
    #[sqlx(rename = "lastChatSentAt")]
    last_chat_sent_at: i64,
    #[sqlx(rename = "lastChatReceivedAt")]
    last_chat_received_at: i64,
}

impl ConnectRow {
    fn connected(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Link `mattermost_user_id` to `ms_teams_user_id`, storing `token` sealed.
///
/// Storing a token counts as a connect. Clearing the token of a connected
/// user counts as a disconnect; clearing it again changes nothing. Any
/// previous link of the Mattermost user is replaced. A Teams user that is
/// already linked to someone else is an `AlreadyExists` error.
pub async fn set_user_info(
    conn: &mut SqliteConnection,
    cipher: &TokenCipher,
    mattermost_user_id: &str,
    ms_teams_user_id: &str,
    token: Option<&OAuthToken>,
) -> Result<()> {
    let sealed = match token {
        Some(token) => Some(cipher.encrypt(&serde_json::to_string(token)?)?),
        None => None,
    };

    let previous = sqlx::query_as::<_, ConnectRow>(
        r#"
        SELECT token, lastConnectAt, lastDisconnectAt, lastChatSentAt, lastChatReceivedAt
        FROM msteamssync_users
        WHERE mmUserID = ?
        ORDER BY lastConnectAt DESC
        LIMIT 1
        "#,
    )
    .bind(mattermost_user_id)
    .fetch_optional(&mut *conn)
    .await?;

    let now = to_micros(Utc::now());
    let (prev_connect, prev_disconnect, was_connected) = previous
        .as_ref()
        .map(|row| (row.last_connect_at, row.last_disconnect_at, row.connected()))
        .unwrap_or((0, 0, false));

    let (last_connect_at, last_disconnect_at) = if sealed.is_some() {
        (now.max(prev_connect + 1), prev_disconnect)
    } else if was_connected {
        (prev_connect, now.max(prev_disconnect + 1))
    } else {
        (prev_connect, prev_disconnect)
    };

    let (last_chat_sent_at, last_chat_received_at) = previous
        .as_ref()
        .map(|row| (row.last_chat_sent_at, row.last_chat_received_at))
        .unwrap_or((0, 0));

    sqlx::query("DELETE FROM msteamssync_users WHERE mmUserID = ?")
        .bind(mattermost_user_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO msteamssync_users
            (mmUserID, msTeamsUserID, token, lastConnectAt, lastDisconnectAt,
             lastChatSentAt, lastChatReceivedAt)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(mattermost_user_id)
    .bind(ms_teams_user_id)
    .bind(sealed)
    .bind(last_connect_at)
    .bind(last_disconnect_at)
    .bind(last_chat_sent_at)
    .bind(last_chat_received_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| StoreError::from_insert(e, "UserInfo", ms_teams_user_id))?;

    tracing::debug!(
        mattermost_user_id,
        connected = token.is_some(),
        "Stored user info"
    );

    Ok(())
}

fn open_token(cipher: &TokenCipher, sealed: Option<String>) -> Result<Option<OAuthToken>> {
    match sealed {
        Some(sealed) if !sealed.is_empty() => {
            let plain = cipher.decrypt(&sealed)?;
            Ok(Some(serde_json::from_str(&plain)?))
        }
        _ => Ok(None),
    }
}

/// Token of a Mattermost user. A missing row and an empty token both give
/// `Ok(None)`; a token that cannot be opened is an error.
pub async fn get_token_for_mattermost_user<'e, E: SqliteExecutor<'e>>(
    ex: E,
    cipher: &TokenCipher,
    mattermost_user_id: &str,
) -> Result<Option<OAuthToken>> {
    let sealed = sqlx::query_scalar::<_, Option<String>>(
        "SELECT token FROM msteamssync_users WHERE mmUserID = ? AND token IS NOT NULL AND token != ''",
    )
    .bind(mattermost_user_id)
    .fetch_optional(ex)
    .await?
    .flatten();

    open_token(cipher, sealed)
}

/// Token of a Teams user; same contract as [`get_token_for_mattermost_user`].
pub async fn get_token_for_ms_teams_user<'e, E: SqliteExecutor<'e>>(
    ex: E,
    cipher: &TokenCipher,
    ms_teams_user_id: &str,
) -> Result<Option<OAuthToken>> {
    let sealed = sqlx::query_scalar::<_, Option<String>>(
        "SELECT token FROM msteamssync_users WHERE msTeamsUserID = ?",
    )
    .bind(ms_teams_user_id)
    .fetch_optional(ex)
    .await?
    .flatten();

    open_token(cipher, sealed)
}

/// Mattermost user linked to a Teams user.
pub async fn teams_to_mattermost_user_id<'e, E: SqliteExecutor<'e>>(
    ex: E,
    ms_teams_user_id: &str,
) -> Result<String> {
    sqlx::query_scalar::<_, String>("SELECT mmUserID FROM msteamssync_users WHERE msTeamsUserID = ?")
        .bind(ms_teams_user_id)
        .fetch_optional(ex)
        .await?
        .ok_or_else(|| StoreError::not_found("UserInfo", ms_teams_user_id))
}

/// Teams user linked to a Mattermost user.
pub async fn mattermost_to_teams_user_id<'e, E: SqliteExecutor<'e>>(
    ex: E,
    mattermost_user_id: &str,
) -> Result<String> {
    sqlx::query_scalar::<_, String>(
        "SELECT msTeamsUserID FROM msteamssync_users WHERE mmUserID = ? LIMIT 1",
    )
    .bind(mattermost_user_id)
    .fetch_optional(ex)
    .await?
    .ok_or_else(|| StoreError::not_found("UserInfo", mattermost_user_id))
}

/// Connect state of a Mattermost user.
pub async fn user_connect_status<'e, E: SqliteExecutor<'e>>(
    ex: E,
    mattermost_user_id: &str,
) -> Result<UserConnectStatus> {
    let row = sqlx::query_as::<_, ConnectRow>(
        r#"
        SELECT token, lastConnectAt, lastDisconnectAt, lastChatSentAt, lastChatReceivedAt
        FROM msteamssync_users
        WHERE mmUserID = ?
        ORDER BY lastConnectAt DESC
        LIMIT 1
        "#,
    )
    .bind(mattermost_user_id)
    .fetch_optional(ex)
    .await?
    .ok_or_else(|| StoreError::not_found("UserInfo", mattermost_user_id))?;

    Ok(UserConnectStatus {
        mattermost_user_id: mattermost_user_id.to_string(),
        connected: row.connected(),
        last_connect_at: optional_from_micros(row.last_connect_at),
        last_disconnect_at: optional_from_micros(row.last_disconnect_at),
    })
}

/// Remove every link of a Mattermost user.
pub async fn delete_user_info<'e, E: SqliteExecutor<'e>>(
    ex: E,
    mattermost_user_id: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM msteamssync_users WHERE mmUserID = ?")
        .bind(mattermost_user_id)
        .execute(ex)
        .await?;

    Ok(())
}

/// One page of users holding a token, ordered by Mattermost id.
pub async fn get_connected_users<'e, E: SqliteExecutor<'e>>(
    ex: E,
    page: i64,
    per_page: i64,
) -> Result<Vec<ConnectedUser>> {
    let rows = sqlx::query_as::<_, (String, String, i64)>(
        r#"
        SELECT mmUserID, msTeamsUserID, lastConnectAt
        FROM msteamssync_users
        WHERE token IS NOT NULL AND token != ''
        ORDER BY mmUserID
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(per_page)
    .bind(page.max(0) * per_page)
    .fetch_all(ex)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(mattermost_user_id, ms_teams_user_id, at)| ConnectedUser {
            mattermost_user_id,
            ms_teams_user_id,
            last_connect_at: optional_from_micros(at),
        })
        .collect())
}

/// Number of users holding a token.
pub async fn get_connected_users_count<'e, E: SqliteExecutor<'e>>(ex: E) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM msteamssync_users WHERE token IS NOT NULL AND token != ''",
    )
    .fetch_one(ex)
    .await?;

    Ok(count)
}

/// Record that a Mattermost user sent a chat message.
pub async fn set_user_last_chat_sent_at<'e, E: SqliteExecutor<'e>>(
    ex: E,
    mattermost_user_id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE msteamssync_users SET lastChatSentAt = MAX(lastChatSentAt, ?) WHERE mmUserID = ?",
    )
    .bind(to_micros(at))
    .bind(mattermost_user_id)
    .execute(ex)
    .await?;

    Ok(())
}

/// Record that a Mattermost user received a chat message.
pub async fn set_user_last_chat_received_at<'e, E: SqliteExecutor<'e>>(
    ex: E,
    mattermost_user_id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE msteamssync_users
        SET lastChatReceivedAt = MAX(lastChatReceivedAt, ?)
        WHERE mmUserID = ?
        "#,
    )
    .bind(to_micros(at))
    .bind(mattermost_user_id)
    .execute(ex)
    .await?;

    Ok(())
}

/// [`set_user_last_chat_received_at`] for every recipient of a message.
pub async fn set_users_last_chat_received_at(
    conn: &mut SqliteConnection,
    mattermost_user_ids: &[String],
    at: DateTime<Utc>,
) -> Result<()> {
    for id in mattermost_user_ids {
        set_user_last_chat_received_at(&mut *conn, id, at).await?;
    }

    Ok(())
}

/// Chat timestamps of a Mattermost user.
pub async fn get_user_chat_activity<'e, E: SqliteExecutor<'e>>(
    ex: E,
    mattermost_user_id: &str,
) -> Result<UserChatActivity> {
    let (sent, received) = sqlx::query_as::<_, (i64, i64)>(
        "SELECT lastChatSentAt, lastChatReceivedAt FROM msteamssync_users WHERE mmUserID = ? LIMIT 1",
    )
    .bind(mattermost_user_id)
    .fetch_optional(ex)
    .await?
    .ok_or_else(|| StoreError::not_found("UserInfo", mattermost_user_id))?;

    Ok(UserChatActivity {
        mattermost_user_id: mattermost_user_id.to_string(),
        last_chat_sent_at: optional_from_micros(sent),
        last_chat_received_at: optional_from_micros(received),
    })
}

/// Users who sent a chat message within `window`.
pub async fn get_active_users_sending_count<'e, E: SqliteExecutor<'e>>(
    ex: E,
    window: Duration,
) -> Result<i64> {
    let since = to_micros(Utc::now() - window);
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM msteamssync_users WHERE lastChatSentAt > ?",
    )
    .bind(since)
    .fetch_one(ex)
    .await?;

    Ok(count)
}

/// Users who received a chat message within `window`.
pub async fn get_active_users_receiving_count<'e, E: SqliteExecutor<'e>>(
    ex: E,
    window: Duration,
) -> Result<i64> {
    let since = to_micros(Utc::now() - window);
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM msteamssync_users WHERE lastChatReceivedAt > ?",
    )
    .bind(since)
    .fetch_one(ex)
    .await?;

    Ok(count)
}
