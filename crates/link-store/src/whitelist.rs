//! Connect allowlist.

use sqlx::{SqliteConnection, SqliteExecutor};

use crate::error::Result;

pub async fn store_user_in_whitelist<'e, E: SqliteExecutor<'e>>(ex: E, user_id: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO msteamssync_whitelist (mmUserID) VALUES (?)")
        .bind(user_id)
        .execute(ex)
        .await?;

    Ok(())
}

pub async fn delete_user_from_whitelist<'e, E: SqliteExecutor<'e>>(
    ex: E,
    user_id: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM msteamssync_whitelist WHERE mmUserID = ?")
        .bind(user_id)
        .execute(ex)
        .await?;

    Ok(())
}

pub async fn is_user_whitelisted<'e, E: SqliteExecutor<'e>>(ex: E, user_id: &str) -> Result<bool> {
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM msteamssync_whitelist WHERE mmUserID = ?")
            .bind(user_id)
            .fetch_one(ex)
            .await?;

    Ok(count > 0)
}

pub async fn get_whitelist_count<'e, E: SqliteExecutor<'e>>(ex: E) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM msteamssync_whitelist")
        .fetch_one(ex)
        .await?;

    Ok(count)
}

/// Whitelisted user ids, ordered.
pub async fn list_whitelisted_users<'e, E: SqliteExecutor<'e>>(ex: E) -> Result<Vec<String>> {
    let ids =
        sqlx::query_scalar::<_, String>("SELECT mmUserID FROM msteamssync_whitelist ORDER BY mmUserID")
            .fetch_all(ex)
            .await?;

    Ok(ids)
}

/// Replace the whole whitelist, inserting `batch_size` rows per statement.
pub async fn set_whitelist(
    conn: &mut SqliteConnection,
    user_ids: &[String],
    batch_size: usize,
) -> Result<()> {
    sqlx::query("DELETE FROM msteamssync_whitelist")
        .execute(&mut *conn)
        .await?;

    for chunk in user_ids.chunks(batch_size.max(1)) {
        let placeholders = vec!["(?)"; chunk.len()].join(", ");
        let sql = format!("INSERT OR IGNORE INTO msteamssync_whitelist (mmUserID) VALUES {placeholders}");
        let mut query = sqlx::query(&sql);
        for id in chunk {
            query = query.bind(id);
        }
        query.execute(&mut *conn).await?;
    }

    Ok(())
}
