use super::model::CachedEntry;
use crate::model::PendingUpdate;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let opts = std::str::FromStr::from_str(&normalized)
        .map(|o: sqlx::sqlite::SqliteConnectOptions| o.create_if_missing(true))
        .context("invalid sqlite url")?;
    let pool = SqlitePool::connect_with(opts)
        .await
        .context("failed to open queue store")?;
    // Enable WAL and stricter durability: a queued update must survive an
    // immediate crash once put_pending has returned.
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
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

// ---------------------------------------------------------------------------
// Pending-update queue
// ---------------------------------------------------------------------------

/// Insert or overwrite a pending update by its `id`. Durable before Ok.
#[instrument(skip_all, fields(id = %update.id))]
pub async fn put_pending(pool: &Pool, update: &PendingUpdate) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO pending_updates (id, book_id, current_page, thoughts, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&update.id)
    .bind(&update.book_id)
    .bind(update.current_page)
    .bind(&update.thoughts)
    .bind(update.timestamp.to_rfc3339())
    .execute(pool)
    .await
    .context("failed to persist pending update")?;
    Ok(())
}

/// Every stored record, in insertion order. Callers must not depend on the
/// order for correctness, only for replay-friendliness.
#[instrument(skip_all)]
pub async fn all_pending(pool: &Pool) -> Result<Vec<PendingUpdate>> {
    let rows = sqlx::query(
        "SELECT id, book_id, current_page, thoughts, created_at \
         FROM pending_updates ORDER BY rowid ASC",
    )
    .fetch_all(pool)
    .await?;

    let updates = rows
        .into_iter()
        .map(|row| {
            let created_at: String = row.get("created_at");
            let timestamp = DateTime::parse_from_rfc3339(&created_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            PendingUpdate {
                id: row.get("id"),
                book_id: row.get("book_id"),
                current_page: row.get("current_page"),
                thoughts: row.get("thoughts"),
                timestamp,
            }
        })
        .collect();
    Ok(updates)
}

/// Remove one record. Deleting a non-existent id is a no-op success.
#[instrument(skip_all, fields(id = %id))]
pub async fn delete_pending(pool: &Pool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM pending_updates WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove all records atomically. Kept for the coarse flush variant of the
/// queue; the drain itself deletes per record so partial progress survives
/// a crash.
#[instrument(skip_all)]
pub async fn clear_pending(pool: &Pool) -> Result<()> {
    sqlx::query("DELETE FROM pending_updates").execute(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_pending(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_updates")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Response cache
// ---------------------------------------------------------------------------

/// Store a response under `(container, method, url)`, fully replacing any
/// prior entry for the same key.
#[instrument(skip_all, fields(url = %url))]
pub async fn cache_put(
    pool: &Pool,
    container: &str,
    method: &str,
    url: &str,
    entry: &CachedEntry,
) -> Result<()> {
    let headers = serde_json::to_string(&entry.headers)?;
    sqlx::query(
        "INSERT OR REPLACE INTO cache_entries (container, method, url, status, headers, body, stored_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(container)
    .bind(method)
    .bind(url)
    .bind(entry.status as i64)
    .bind(headers)
    .bind(&entry.body)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .context("failed to write cache entry")?;
    Ok(())
}

#[instrument(skip_all, fields(url = %url))]
pub async fn cache_lookup(
    pool: &Pool,
    container: &str,
    method: &str,
    url: &str,
) -> Result<Option<CachedEntry>> {
    let row = sqlx::query(
        "SELECT status, headers, body FROM cache_entries \
         WHERE container = ? AND method = ? AND url = ?",
    )
    .bind(container)
    .bind(method)
    .bind(url)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status: i64 = row.get("status");
    let headers_json: String = row.get("headers");
    let headers: Vec<(String, String)> =
        serde_json::from_str(&headers_json).context("corrupt cache entry headers")?;
    Ok(Some(CachedEntry {
        status: status as u16,
        headers,
        body: row.get("body"),
    }))
}

/// Names of every cache container currently holding entries.
pub async fn cache_containers(pool: &Pool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar("SELECT DISTINCT container FROM cache_entries ORDER BY container")
        .fetch_all(pool)
        .await?;
    Ok(names)
}

/// Delete every container whose name does not match the current version tag.
/// Returns the number of entries purged.
#[instrument(skip_all, fields(current = %current))]
pub async fn purge_stale_containers(pool: &Pool, current: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM cache_entries WHERE container != ?")
        .bind(current)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}
