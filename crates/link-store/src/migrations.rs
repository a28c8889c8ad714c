//! Schema and data migrations.
//!
//! The schema lives in `migrations/*.sql` and is applied by the sqlx
//! migrator. Data migrations follow, each in its own transaction and
//! guarded by a `system_settings` flag so they run at most once.

use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::Result;
use crate::models::to_micros;
use crate::settings;

/// Prefix of usernames owned by the bridge.
pub const SYNTHETIC_USERNAME_PREFIX: &str = "msteams_";

pub const REMOTE_ID_MIGRATION_FLAG: &str = "RemoteIDMigrationComplete";
pub const USER_ID_DEDUP_MIGRATION_FLAG: &str = "MSTeamUserIDDedupMigrationComplete";
pub const WHITELISTED_USERS_MIGRATION_FLAG: &str = "WhitelistedUsersMigrationComplete";

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply pending schema migrations, then the data migrations. `remote_id`
/// is the remote-cluster id that owns synthetic users.
pub async fn run(pool: &SqlitePool, remote_id: &str) -> Result<()> {
    MIGRATOR.run(pool).await?;

    let mut tx = pool.begin().await?;
    stamp_remote_ids(&mut *tx, remote_id).await?;
    tx.commit().await?;

    let mut tx = pool.begin().await?;
    dedup_teams_user_ids(&mut *tx).await?;
    tx.commit().await?;

    let mut tx = pool.begin().await?;
    backfill_whitelisted_users(&mut *tx).await?;
    tx.commit().await?;

    Ok(())
}

/// Whether `name` exists as a table in this database.
pub async fn table_exists(conn: &mut SqliteConnection, name: &str) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ? COLLATE NOCASE",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count > 0)
}

/// Stamp the host `Users.RemoteId` of synthetic users with our remote id.
///
/// Rows already owned by another known remote cluster are left alone. A
/// database that does not share the host tables has nothing to stamp.
async fn stamp_remote_ids(conn: &mut SqliteConnection, remote_id: &str) -> Result<()> {
    if settings::is_flag_set(&mut *conn, REMOTE_ID_MIGRATION_FLAG).await? {
        return Ok(());
    }

    if !remote_id.is_empty() && table_exists(conn, "Users").await? {
        let pattern = format!("{SYNTHETIC_USERNAME_PREFIX}%");
        let sql = if table_exists(conn, "RemoteClusters").await? {
            r#"
            UPDATE Users
            SET RemoteId = ?
            WHERE RemoteId IS NOT NULL AND RemoteId != ''
              AND RemoteId NOT IN (SELECT RemoteId FROM RemoteClusters)
              AND Username LIKE ?
            "#
        } else {
            r#"
            UPDATE Users
            SET RemoteId = ?
            WHERE RemoteId IS NOT NULL AND RemoteId != ''
              AND Username LIKE ?
            "#
        };
        let result = sqlx::query(sql)
            .bind(remote_id)
            .bind(pattern)
            .execute(&mut *conn)
            .await?;
        tracing::info!(rows = result.rows_affected(), "Stamped remote ids");
    } else {
        tracing::debug!("No host users table, skipping remote id stamp");
    }

    settings::set_setting(&mut *conn, REMOTE_ID_MIGRATION_FLAG, "true", None).await
}

#[derive(sqlx::FromRow)]
struct DuplicateRow {
    #[sqlx(rename = "mmUserID")]
    mm_user_id: String,
    #[sqlx(rename = "msTeamsUserID")]
    ms_teams_user_id: String,
    #[sqlx(rename = "remoteId")]
    remote_id: String,
    #[sqlx(rename = "createAt")]
    create_at: i64,
    seq: i64,
}

impl DuplicateRow {
    /// Lower sorts first: real users before synthetic ones, then oldest.
    fn rank(&self) -> (bool, i64, i64) {
        (!self.remote_id.is_empty(), self.create_at, self.seq)
    }
}

/// Collapse duplicate rows to one per Teams user id.
async fn dedup_teams_user_ids(conn: &mut SqliteConnection) -> Result<()> {
    if settings::is_flag_set(&mut *conn, USER_ID_DEDUP_MIGRATION_FLAG).await? {
        return unique_teams_user_index(conn).await;
    }

    let sql = if table_exists(conn, "Users").await? {
        r#"
        SELECT u.mmUserID, u.msTeamsUserID,
               COALESCE(h.RemoteId, '') AS remoteId,
               COALESCE(h.CreateAt, 0) AS createAt,
               u.rowid AS seq
        FROM msteamssync_users u
        LEFT JOIN Users h ON h.Id = u.mmUserID
        WHERE u.msTeamsUserID IN (
            SELECT msTeamsUserID FROM msteamssync_users
            GROUP BY msTeamsUserID HAVING COUNT(*) > 1
        )
        ORDER BY u.msTeamsUserID
        "#
    } else {
        r#"
        SELECT u.mmUserID, u.msTeamsUserID,
               '' AS remoteId,
               0 AS createAt,
               u.rowid AS seq
        FROM msteamssync_users u
        WHERE u.msTeamsUserID IN (
            SELECT msTeamsUserID FROM msteamssync_users
            GROUP BY msTeamsUserID HAVING COUNT(*) > 1
        )
        ORDER BY u.msTeamsUserID
        "#
    };
    let rows = sqlx::query_as::<_, DuplicateRow>(sql)
        .fetch_all(&mut *conn)
        .await?;

    let mut groups: Vec<Vec<DuplicateRow>> = Vec::new();
    for row in rows {
        match groups.last_mut() {
            Some(group) if group[0].ms_teams_user_id == row.ms_teams_user_id => group.push(row),
            _ => groups.push(vec![row]),
        }
    }

    let mut removed = 0u64;
    for mut group in groups {
        group.sort_by_key(DuplicateRow::rank);
        for loser in group.iter().skip(1) {
            let result = sqlx::query(
                "DELETE FROM msteamssync_users WHERE mmUserID = ? AND msTeamsUserID = ?",
            )
            .bind(&loser.mm_user_id)
            .bind(&loser.ms_teams_user_id)
            .execute(&mut *conn)
            .await?;
            removed += result.rows_affected();
        }
    }
    if removed > 0 {
        tracing::info!(removed, "Removed duplicate Teams user links");
    }

    settings::set_setting(&mut *conn, USER_ID_DEDUP_MIGRATION_FLAG, "true", None).await?;
    unique_teams_user_index(conn).await
}

async fn unique_teams_user_index(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("DROP INDEX IF EXISTS idx_msteamssync_users_msteams")
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_msteamssync_users_msteams_unique
        ON msteamssync_users (msTeamsUserID)
        "#,
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Backfill connect/disconnect timestamps from the legacy whitelist table
/// and carry its members into the current whitelist.
async fn backfill_whitelisted_users(conn: &mut SqliteConnection) -> Result<()> {
    if settings::is_flag_set(&mut *conn, WHITELISTED_USERS_MIGRATION_FLAG).await? {
        return drop_whitelisted_users(conn).await;
    }

    if table_exists(conn, "msteamssync_whitelisted_users").await? {
        let now = to_micros(Utc::now());
        sqlx::query(
            r#"
            UPDATE msteamssync_users
            SET lastConnectAt = ?
            WHERE lastConnectAt = 0
              AND ((token IS NOT NULL AND token != '')
                   OR mmUserID IN (SELECT mmUserID FROM msteamssync_whitelisted_users))
            "#,
        )
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            UPDATE msteamssync_users
            SET lastDisconnectAt = ?
            WHERE lastDisconnectAt = 0
              AND (token IS NULL OR token = '')
              AND mmUserID IN (SELECT mmUserID FROM msteamssync_whitelisted_users)
            "#,
        )
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO msteamssync_whitelist (mmUserID)
            SELECT mmUserID FROM msteamssync_whitelisted_users
            "#,
        )
        .execute(&mut *conn)
        .await?;
    }

    settings::set_setting(&mut *conn, WHITELISTED_USERS_MIGRATION_FLAG, "true", None).await?;
    drop_whitelisted_users(conn).await
}

async fn drop_whitelisted_users(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("DROP TABLE IF EXISTS msteamssync_whitelisted_users")
        .execute(&mut *conn)
        .await?;
    Ok(())
}
