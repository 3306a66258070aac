//! SQLite storage behind the bundled queue broker.
use anyhow::{anyhow, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

/// A message handed to a consumer. It stays in flight until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: i64,
    pub message_id: String,
    pub queue: String,
    pub body: Vec<u8>,
}

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the store. WAL, full sync and the busy timeout are applied to every
/// pooled connection, not just the first one.
pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(BUSY_TIMEOUT);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// For a file-backed SQLite URL, expand a leading `~/` and make sure the parent
/// directory exists. In-memory URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded_path}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all, fields(queue = %queue))]
pub async fn enqueue(pool: &Pool, queue: &str, body: &[u8]) -> Result<String> {
    let message_id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO messages (message_id, queue, body) VALUES (?, ?, ?)")
        .bind(&message_id)
        .bind(queue)
        .bind(body)
        .execute(pool)
        .await?;
    Ok(message_id)
}

/// Mark the oldest waiting message on `queue` as delivered and return it.
#[instrument(skip_all, fields(queue = %queue))]
pub async fn claim_next(pool: &Pool, queue: &str) -> Result<Option<Delivery>> {
    let row = sqlx::query(
        "UPDATE messages SET delivered_at = CURRENT_TIMESTAMP \
         WHERE id = (SELECT id FROM messages WHERE queue = ? AND delivered_at IS NULL AND acked_at IS NULL ORDER BY id ASC LIMIT 1) \
         RETURNING id, message_id, queue, body",
    )
    .bind(queue)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| Delivery {
        id: row.get("id"),
        message_id: row.get("message_id"),
        queue: row.get("queue"),
        body: row.get("body"),
    }))
}

#[instrument(skip_all)]
pub async fn ack(pool: &Pool, id: i64) -> Result<()> {
    let res = sqlx::query(
        "UPDATE messages SET acked_at = CURRENT_TIMESTAMP WHERE id = ? AND delivered_at IS NOT NULL AND acked_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("message {} is not awaiting acknowledgement", id));
    }
    Ok(())
}

/// Put deliveries that were never acknowledged (e.g. the consumer crashed)
/// back on their queue.
#[instrument(skip_all, fields(queue = %queue))]
pub async fn release_unacked(pool: &Pool, queue: &str) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE messages SET delivered_at = NULL WHERE queue = ? AND delivered_at IS NOT NULL AND acked_at IS NULL",
    )
    .bind(queue)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all, fields(queue = %queue))]
pub async fn count_pending(pool: &Pool, queue: &str) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE queue = ? AND acked_at IS NULL")
            .bind(queue)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Bodies currently waiting on `queue`, oldest first.
#[instrument(skip_all, fields(queue = %queue))]
pub async fn pending_bodies(pool: &Pool, queue: &str) -> Result<Vec<Vec<u8>>> {
    let rows: Vec<Vec<u8>> = sqlx::query_scalar(
        "SELECT body FROM messages WHERE queue = ? AND acked_at IS NULL ORDER BY id ASC",
    )
    .bind(queue)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
