//! Subscription records.
//!
//! There is at most one row per watched resource: saving a subscription first
//! removes whatever was recorded for the same kind (global), team and channel
//! (channel) or user (chat).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqliteExecutor};

use crate::error::{Result, StoreError};
use crate::models::{to_micros, Subscription, SubscriptionKind, SubscriptionRow};

const SELECT_SUBSCRIPTIONS: &str = r#"
    SELECT subscriptionID, type, msTeamsTeamID, msTeamsChannelID, msTeamsUserID,
           secret, expiresOn, certificate, lastActivityAt
    FROM msteamssync_subscriptions
"#;

/// Replace the subscription recorded for `sub`'s resource with `sub`.
pub async fn save_subscription(conn: &mut SqliteConnection, sub: &Subscription) -> Result<()> {
    match sub.kind {
        SubscriptionKind::AllChats | SubscriptionKind::AllChannels => {
            sqlx::query("DELETE FROM msteamssync_subscriptions WHERE type = ?")
                .bind(sub.kind.as_str())
                .execute(&mut *conn)
                .await?;
        }
        SubscriptionKind::Channel => {
            if sub.team_id.is_empty() || sub.channel_id.is_empty() {
                return Err(StoreError::Invalid {
                    field: "channel subscription",
                    message: "team and channel ids are required".to_string(),
                });
            }
            sqlx::query(
                r#"
                DELETE FROM msteamssync_subscriptions
                WHERE type = ? AND msTeamsTeamID = ? AND msTeamsChannelID = ?
                "#,
            )
            .bind(sub.kind.as_str())
            .bind(&sub.team_id)
            .bind(&sub.channel_id)
            .execute(&mut *conn)
            .await?;
        }
        SubscriptionKind::Chat => {
            if sub.user_id.is_empty() {
                return Err(StoreError::Invalid {
                    field: "chat subscription",
                    message: "user id is required".to_string(),
                });
            }
            sqlx::query("DELETE FROM msteamssync_subscriptions WHERE type = ? AND msTeamsUserID = ?")
                .bind(sub.kind.as_str())
                .bind(&sub.user_id)
                .execute(&mut *conn)
                .await?;
        }
    }

    sqlx::query(
        r#"
        INSERT INTO msteamssync_subscriptions
            (subscriptionID, type, msTeamsTeamID, msTeamsChannelID, msTeamsUserID,
             secret, expiresOn, certificate, lastActivityAt)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(subscriptionID) DO UPDATE SET
            type = excluded.type,
            msTeamsTeamID = excluded.msTeamsTeamID,
            msTeamsChannelID = excluded.msTeamsChannelID,
            msTeamsUserID = excluded.msTeamsUserID,
            secret = excluded.secret,
            expiresOn = excluded.expiresOn,
            certificate = excluded.certificate
        "#,
    )
    .bind(&sub.subscription_id)
    .bind(sub.kind.as_str())
    .bind(&sub.team_id)
    .bind(&sub.channel_id)
    .bind(&sub.user_id)
    .bind(&sub.secret)
    .bind(to_micros(sub.expires_on))
    .bind(&sub.certificate)
    .bind(sub.last_activity_at.map(to_micros).unwrap_or(0))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Get a subscription by id.
pub async fn get_subscription<'e, E: SqliteExecutor<'e>>(
    ex: E,
    subscription_id: &str,
) -> Result<Subscription> {
    let sql = format!("{SELECT_SUBSCRIPTIONS} WHERE subscriptionID = ?");
    let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
        .bind(subscription_id)
        .fetch_optional(ex)
        .await?
        .ok_or_else(|| StoreError::not_found("Subscription", subscription_id))?;

    Subscription::try_from(row)
}

/// List subscriptions of one kind, newest expiry first.
pub async fn list_subscriptions<'e, E: SqliteExecutor<'e>>(
    ex: E,
    kind: SubscriptionKind,
) -> Result<Vec<Subscription>> {
    let sql = format!("{SELECT_SUBSCRIPTIONS} WHERE type = ? ORDER BY expiresOn DESC");
    let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
        .bind(kind.as_str())
        .fetch_all(ex)
        .await?;

    rows.into_iter().map(Subscription::try_from).collect()
}

/// List both tenant-wide subscriptions.
pub async fn list_global_subscriptions<'e, E: SqliteExecutor<'e>>(
    ex: E,
) -> Result<Vec<Subscription>> {
    let sql =
        format!("{SELECT_SUBSCRIPTIONS} WHERE type IN (?, ?) ORDER BY type, expiresOn DESC");
    let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
        .bind(SubscriptionKind::AllChats.as_str())
        .bind(SubscriptionKind::AllChannels.as_str())
        .fetch_all(ex)
        .await?;

    rows.into_iter().map(Subscription::try_from).collect()
}

/// Get the subscription of a Teams channel.
pub async fn get_channel_subscription_by_teams_channel_id<'e, E: SqliteExecutor<'e>>(
    ex: E,
    team_id: &str,
    channel_id: &str,
) -> Result<Subscription> {
    let sql = format!(
        "{SELECT_SUBSCRIPTIONS} WHERE type = ? AND msTeamsTeamID = ? AND msTeamsChannelID = ?"
    );
    let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
        .bind(SubscriptionKind::Channel.as_str())
        .bind(team_id)
        .bind(channel_id)
        .fetch_optional(ex)
        .await?
        .ok_or_else(|| StoreError::not_found("Subscription", format!("{team_id}/{channel_id}")))?;

    Subscription::try_from(row)
}

/// Get the chat subscription of a Teams user.
pub async fn get_chat_subscription_by_user_id<'e, E: SqliteExecutor<'e>>(
    ex: E,
    user_id: &str,
) -> Result<Subscription> {
    let sql = format!("{SELECT_SUBSCRIPTIONS} WHERE type = ? AND msTeamsUserID = ?");
    let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
        .bind(SubscriptionKind::Chat.as_str())
        .bind(user_id)
        .fetch_optional(ex)
        .await?
        .ok_or_else(|| StoreError::not_found("Subscription", user_id))?;

    Subscription::try_from(row)
}

/// The kind of a subscription.
pub async fn get_subscription_type<'e, E: SqliteExecutor<'e>>(
    ex: E,
    subscription_id: &str,
) -> Result<SubscriptionKind> {
    let kind = sqlx::query_scalar::<_, String>(
        "SELECT type FROM msteamssync_subscriptions WHERE subscriptionID = ?",
    )
    .bind(subscription_id)
    .fetch_optional(ex)
    .await?
    .ok_or_else(|| StoreError::not_found("Subscription", subscription_id))?;

    kind.parse().map_err(|message| StoreError::Invalid {
        field: "subscription type",
        message,
    })
}

/// Delete a subscription record. Returns whether a row was removed.
pub async fn delete_subscription<'e, E: SqliteExecutor<'e>>(
    ex: E,
    subscription_id: &str,
) -> Result<bool> {
    let result = sqlx::query("DELETE FROM msteamssync_subscriptions WHERE subscriptionID = ?")
        .bind(subscription_id)
        .execute(ex)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Persist a new expiry after a refresh.
pub async fn update_subscription_expires_on<'e, E: SqliteExecutor<'e>>(
    ex: E,
    subscription_id: &str,
    expires_on: DateTime<Utc>,
) -> Result<()> {
    let result =
        sqlx::query("UPDATE msteamssync_subscriptions SET expiresOn = ? WHERE subscriptionID = ?")
            .bind(to_micros(expires_on))
            .bind(subscription_id)
            .execute(ex)
            .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("Subscription", subscription_id));
    }

    Ok(())
}

/// Advance `lastActivityAt`; an older value never overwrites a newer one.
pub async fn update_subscription_last_activity_at<'e, E: SqliteExecutor<'e>>(
    ex: E,
    subscription_id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE msteamssync_subscriptions
        SET lastActivityAt = MAX(lastActivityAt, ?)
        WHERE subscriptionID = ?
        "#,
    )
    .bind(to_micros(at))
    .bind(subscription_id)
    .execute(ex)
    .await?;

    Ok(())
}

/// `lastActivityAt` of every subscription that has seen activity.
pub async fn get_subscriptions_last_activity_at<'e, E: SqliteExecutor<'e>>(
    ex: E,
) -> Result<HashMap<String, DateTime<Utc>>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT subscriptionID, lastActivityAt
        FROM msteamssync_subscriptions
        WHERE lastActivityAt > 0
        "#,
    )
    .fetch_all(ex)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, at)| (id, crate::models::from_micros(at)))
        .collect())
}
