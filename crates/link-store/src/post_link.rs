//! Post link persistence.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqliteExecutor};

use crate::error::{Result, StoreError};
use crate::models::{to_micros, PostInfo, PostInfoRow};

/// Insert a post link, or replace the Teams side of an existing one.
pub async fn link_posts<'e, E: SqliteExecutor<'e>>(ex: E, info: &PostInfo) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO msteamssync_posts (mmPostID, msTeamsPostID, msTeamsChannelID, msTeamsLastUpdateAt)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(mmPostID) DO UPDATE SET
            msTeamsPostID = excluded.msTeamsPostID,
            msTeamsChannelID = excluded.msTeamsChannelID,
            msTeamsLastUpdateAt = excluded.msTeamsLastUpdateAt
        "#,
    )
    .bind(&info.mattermost_id)
    .bind(&info.ms_teams_id)
    .bind(&info.ms_teams_channel)
    .bind(to_micros(info.ms_teams_last_update_at))
    .execute(ex)
    .await?;

    Ok(())
}

/// Get the link of a Mattermost post.
pub async fn get_post_info_by_mattermost_id<'e, E: SqliteExecutor<'e>>(
    ex: E,
    post_id: &str,
) -> Result<PostInfo> {
    sqlx::query_as::<_, PostInfoRow>(
        r#"
        SELECT mmPostID, msTeamsPostID, msTeamsChannelID, msTeamsLastUpdateAt
        FROM msteamssync_posts
        WHERE mmPostID = ?
        "#,
    )
    .bind(post_id)
    .fetch_optional(ex)
    .await?
    .map(PostInfo::from)
    .ok_or_else(|| StoreError::not_found("PostInfo", post_id))
}

/// Get the link of a Teams message within a chat or channel.
pub async fn get_post_info_by_ms_teams_id<'e, E: SqliteExecutor<'e>>(
    ex: E,
    channel_key: &str,
    ms_teams_post_id: &str,
) -> Result<PostInfo> {
    sqlx::query_as::<_, PostInfoRow>(
        r#"
        SELECT mmPostID, msTeamsPostID, msTeamsChannelID, msTeamsLastUpdateAt
        FROM msteamssync_posts
        WHERE msTeamsChannelID = ? AND msTeamsPostID = ?
        "#,
    )
    .bind(channel_key)
    .bind(ms_teams_post_id)
    .fetch_optional(ex)
    .await?
    .map(PostInfo::from)
    .ok_or_else(|| StoreError::not_found("PostInfo", format!("{channel_key}/{ms_teams_post_id}")))
}

/// Record the Teams modification time of a Mattermost post.
pub async fn set_post_last_update_at_by_mattermost_id<'e, E: SqliteExecutor<'e>>(
    ex: E,
    post_id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    let result =
        sqlx::query("UPDATE msteamssync_posts SET msTeamsLastUpdateAt = ? WHERE mmPostID = ?")
            .bind(to_micros(at))
            .bind(post_id)
            .execute(ex)
            .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("PostInfo", post_id));
    }

    Ok(())
}

/// Record the Teams modification time of a Teams message.
pub async fn set_post_last_update_at_by_ms_teams_id<'e, E: SqliteExecutor<'e>>(
    ex: E,
    ms_teams_post_id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    let result =
        sqlx::query("UPDATE msteamssync_posts SET msTeamsLastUpdateAt = ? WHERE msTeamsPostID = ?")
            .bind(to_micros(at))
            .bind(ms_teams_post_id)
            .execute(ex)
            .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("PostInfo", ms_teams_post_id));
    }

    Ok(())
}

/// Take the write lock on the post links for the rest of the transaction.
///
/// SQLite has no row locks; a write statement is the narrowest way to make
/// a concurrent creator wait for this transaction before its dedup check.
pub async fn lock_post_links(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "UPDATE msteamssync_posts SET msTeamsLastUpdateAt = msTeamsLastUpdateAt WHERE 1 = 0",
    )
    .execute(conn)
    .await?;

    Ok(())
}
