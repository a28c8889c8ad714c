//! Channel link CRUD.

use sqlx::SqliteExecutor;

use crate::error::{Result, StoreError};
use crate::models::ChannelLink;

/// Link a Mattermost channel to a Teams channel. Either side being linked
/// already is an `AlreadyExists` error.
pub async fn store_channel_link<'e, E: SqliteExecutor<'e>>(ex: E, link: &ChannelLink) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO msteamssync_links (mmChannelID, mmTeamID, msTeamsChannelID, msTeamsTeamID, creator)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&link.mattermost_channel_id)
    .bind(&link.mattermost_team_id)
    .bind(&link.ms_teams_channel_id)
    .bind(&link.ms_teams_team_id)
    .bind(&link.creator)
    .execute(ex)
    .await
    .map_err(|e| StoreError::from_insert(e, "ChannelLink", &link.mattermost_channel_id))?;

    Ok(())
}

/// Get the link of a Mattermost channel.
pub async fn get_link_by_channel_id<'e, E: SqliteExecutor<'e>>(
    ex: E,
    channel_id: &str,
) -> Result<ChannelLink> {
    sqlx::query_as::<_, ChannelLink>(
        r#"
        SELECT mmChannelID, mmTeamID, msTeamsChannelID, msTeamsTeamID, creator
        FROM msteamssync_links
        WHERE mmChannelID = ?
        "#,
    )
    .bind(channel_id)
    .fetch_optional(ex)
    .await?
    .ok_or_else(|| StoreError::not_found("ChannelLink", channel_id))
}

/// Get the link of a Teams channel.
pub async fn get_link_by_ms_teams_channel_id<'e, E: SqliteExecutor<'e>>(
    ex: E,
    team_id: &str,
    channel_id: &str,
) -> Result<ChannelLink> {
    sqlx::query_as::<_, ChannelLink>(
        r#"
        SELECT mmChannelID, mmTeamID, msTeamsChannelID, msTeamsTeamID, creator
        FROM msteamssync_links
        WHERE msTeamsTeamID = ? AND msTeamsChannelID = ?
        "#,
    )
    .bind(team_id)
    .bind(channel_id)
    .fetch_optional(ex)
    .await?
    .ok_or_else(|| StoreError::not_found("ChannelLink", format!("{team_id}/{channel_id}")))
}

/// Remove the link of a Mattermost channel.
pub async fn delete_link_by_channel_id<'e, E: SqliteExecutor<'e>>(
    ex: E,
    channel_id: &str,
) -> Result<()> {
    let result = sqlx::query("DELETE FROM msteamssync_links WHERE mmChannelID = ?")
        .bind(channel_id)
        .execute(ex)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("ChannelLink", channel_id));
    }

    Ok(())
}

/// List all channel links.
pub async fn list_channel_links<'e, E: SqliteExecutor<'e>>(ex: E) -> Result<Vec<ChannelLink>> {
    let rows = sqlx::query_as::<_, ChannelLink>(
        r#"
        SELECT mmChannelID, mmTeamID, msTeamsChannelID, msTeamsTeamID, creator
        FROM msteamssync_links
        ORDER BY mmChannelID
        "#,
    )
    .fetch_all(ex)
    .await?;

    Ok(rows)
}

/// Number of linked channels.
pub async fn get_linked_channels_count<'e, E: SqliteExecutor<'e>>(ex: E) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM msteamssync_links")
        .fetch_one(ex)
        .await?;

    Ok(count)
}
