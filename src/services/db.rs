//! Database transaction utilities
//!
//! This module documents the database access pattern used by the publish
//! domain. Query functions accept sqlx's generic Executor trait, so they work
//! with both `&PgPool` and `&mut PgConnection` (transactions).
//!
//! # Usage Pattern
//!
//! ```ignore
//! use sqlx::{Executor, Postgres};
//!
//! pub async fn release<'e, E>(executor: E, key: &str) -> Result<bool, sqlx::Error>
//! where
//!     E: Executor<'e, Database = Postgres>,
//! {
//!     let result = sqlx::query("DELETE FROM publish_ledger WHERE key = $1")
//!         .bind(key)
//!         .execute(executor)
//!         .await?;
//!     Ok(result.rows_affected() > 0)
//! }
//! ```
//!
//! Callable with either `release(&pool, key)` or `release(&mut *tx, key)`.
//!
//! Correctness note: the publish pipeline takes no application-level locks.
//! Cross-process guarantees rest entirely on row-level uniqueness constraints:
//! `publish_ledger(key)` for the idempotency ledger and
//! `posts(job_id, late_account_id, platform) NULLS NOT DISTINCT` for post
//! upserts. Multi-statement functions that need more than one round trip
//! (the ledger acquire's insert-then-read) take `&PgPool` directly.

// Re-export commonly used types for convenience
#[allow(unused_imports)]
pub use sqlx::{Executor, Postgres};
