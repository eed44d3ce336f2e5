use anyhow::{Context, Result};
use sqlx::{PgConnection, Row};
use uuid::Uuid;

/// 監視ジョブのキー。リソースごとに同時に1件しか積まれない。
#[must_use]
pub fn monitor_job_key(resource_id: Uuid) -> String {
    format!("monitor-{resource_id}")
}

/// 変更検知直後に積まれる通知ジョブのキー。
#[must_use]
pub fn change_job_key(change_id: Uuid) -> String {
    format!("change-{change_id}")
}

/// バックフィルで再投入される通知ジョブのキー。
#[must_use]
pub fn backfill_job_key(change_id: Uuid) -> String {
    format!("backfill-{change_id}")
}

/// 名前をPostgreSQLのアドバイザリロック用64ビットキーに変換する。
///
/// 名前のMD5ダイジェストの先頭8バイトをビッグエンディアンのi64として扱う。
#[must_use]
pub fn advisory_lock_key(name: &str) -> i64 {
    let digest = md5::compute(name.as_bytes());
    let bytes = digest.0;
    i64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// PostgreSQLのアドバイザリトランザクションロックを取得する。
///
/// `pg_try_advisory_xact_lock`を使用し、ロックはトランザクション終了時に自動で解放される。
///
/// # Errors
/// SQLクエリの実行に失敗した場合はエラーを返す。
pub async fn try_acquire_advisory_xact_lock(conn: &mut PgConnection, key: i64) -> Result<bool> {
    let row = sqlx::query("SELECT pg_try_advisory_xact_lock($1) AS acquired")
        .bind(key)
        .fetch_one(conn)
        .await
        .context("failed to execute pg_try_advisory_xact_lock")?;

    row.try_get("acquired")
        .context("failed to get lock acquisition result")
}
