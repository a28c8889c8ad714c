//! Pending connect invitations.

use sqlx::SqliteExecutor;

use crate::error::{Result, StoreError};
use crate::models::{to_micros, InvitedUser, InvitedUserRow};

/// Insert or update an invitation.
pub async fn store_invited_user<'e, E: SqliteExecutor<'e>>(ex: E, invited: &InvitedUser) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO msteamssync_invited_users (mmUserID, invitePendingSince, inviteLastSentAt)
        VALUES (?, ?, ?)
        ON CONFLICT(mmUserID) DO UPDATE SET
            invitePendingSince = excluded.invitePendingSince,
            inviteLastSentAt = excluded.inviteLastSentAt
        "#,
    )
    .bind(&invited.mattermost_user_id)
    .bind(to_micros(invited.invite_pending_since))
    .bind(to_micros(invited.invite_last_sent_at))
    .execute(ex)
    .await?;

    Ok(())
}

pub async fn get_invited_user<'e, E: SqliteExecutor<'e>>(ex: E, user_id: &str) -> Result<InvitedUser> {
    sqlx::query_as::<_, InvitedUserRow>(
        r#"
        SELECT mmUserID, invitePendingSince, inviteLastSentAt
        FROM msteamssync_invited_users
        WHERE mmUserID = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(ex)
    .await?
    .map(InvitedUser::from)
    .ok_or_else(|| StoreError::not_found("InvitedUser", user_id))
}

pub async fn delete_user_invite<'e, E: SqliteExecutor<'e>>(ex: E, user_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM msteamssync_invited_users WHERE mmUserID = ?")
        .bind(user_id)
        .execute(ex)
        .await?;

    Ok(())
}

pub async fn get_invited_count<'e, E: SqliteExecutor<'e>>(ex: E) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM msteamssync_invited_users")
        .fetch_one(ex)
        .await?;

    Ok(count)
}

/// All pending invitations, oldest first.
pub async fn list_invited_users<'e, E: SqliteExecutor<'e>>(ex: E) -> Result<Vec<InvitedUser>> {
    let rows = sqlx::query_as::<_, InvitedUserRow>(
        r#"
        SELECT mmUserID, invitePendingSince, inviteLastSentAt
        FROM msteamssync_invited_users
        ORDER BY invitePendingSince
        "#,
    )
    .fetch_all(ex)
    .await?;

    Ok(rows.into_iter().map(InvitedUser::from).collect())
}
