//! Idempotency ledger queries
//!
//! The `publish_ledger` table is the cross-process mutual-exclusion primitive
//! for the publish pipeline: a unique index on `key` guarantees that exactly
//! one concurrent request acquires the right to publish under a given
//! identity. No application-level locks are involved.

use sqlx::PgPool;
use sqlx::{Executor, Postgres};

use super::super::models::{LEDGER_PROCESSING, LedgerRecord};

/// Outcome of an acquire attempt
#[derive(Debug)]
pub enum AcquireOutcome {
    /// This request won the insert and holds the key exclusively
    Acquired,
    /// Another request holds (or completed under) this key
    Existing(LedgerRecord),
}

/// Purge `processing` rows older than the stale threshold so a crashed
/// request cannot permanently block a key.
pub async fn purge_stale<'e, E>(executor: E, stale_secs: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        DELETE FROM publish_ledger
        WHERE status = 'processing'
          AND created_at < NOW() - ($1 * INTERVAL '1 second')
        "#,
    )
    .bind(stale_secs)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Try to acquire the ledger entry for `key`.
///
/// Exactly one concurrent caller gets `Acquired`; everyone else observes the
/// existing row and decides between conflict, "already processing", and
/// replay based on its `request_hash` and `status`.
pub async fn try_acquire(
    db: &PgPool,
    key: &str,
    request_hash: &str,
) -> Result<AcquireOutcome, sqlx::Error> {
    // Two attempts cover the race where the conflicting row is released
    // between our failed insert and the follow-up read.
    for _ in 0..2 {
        let inserted: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO publish_ledger (key, request_hash, status)
            VALUES ($1, $2, 'processing')
            ON CONFLICT (key) DO NOTHING
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(request_hash)
        .fetch_optional(db)
        .await?;

        if inserted.is_some() {
            return Ok(AcquireOutcome::Acquired);
        }

        let existing: Option<LedgerRecord> = sqlx::query_as(
            r#"
            SELECT key, request_hash, status, late_post_id, response_snapshot,
                   created_at, updated_at
            FROM publish_ledger
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(db)
        .await?;

        if let Some(record) = existing {
            return Ok(AcquireOutcome::Existing(record));
        }
    }

    Err(sqlx::Error::RowNotFound)
}

/// Read a ledger entry by key (used by the replay endpoint).
pub async fn get<'e, E>(executor: E, key: &str) -> Result<Option<LedgerRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT key, request_hash, status, late_post_id, response_snapshot,
               created_at, updated_at
        FROM publish_ledger
        WHERE key = $1
        "#,
    )
    .bind(key)
    .fetch_optional(executor)
    .await
}

/// Transition `processing` -> `completed`, storing the external post id and
/// the response snapshot for later replay. Returns false if the row was not
/// in `processing` (already completed or purged).
pub async fn complete<'e, E>(
    executor: E,
    key: &str,
    late_post_id: &str,
    snapshot: &serde_json::Value,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE publish_ledger
        SET status = 'completed', late_post_id = $2, response_snapshot = $3,
            updated_at = NOW()
        WHERE key = $1 AND status = $4
        "#,
    )
    .bind(key)
    .bind(late_post_id)
    .bind(snapshot)
    .bind(LEDGER_PROCESSING)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Clear a `processing` entry after a failed publish so a legitimate retry
/// with the same identity is not deadlocked. Completed entries are untouched.
pub async fn release<'e, E>(executor: E, key: &str) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        DELETE FROM publish_ledger
        WHERE key = $1 AND status = 'processing'
        "#,
    )
    .bind(key)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}
