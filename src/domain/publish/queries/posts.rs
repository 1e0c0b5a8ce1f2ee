//! Post record queries: per-target upserts and the historical content match
//!
//! Functions use the generic Executor pattern, so they work with both
//! `&PgPool` and `&mut PgConnection` (transactions).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::{Executor, Postgres};

use super::super::models::PostStatus;

/// Fields written on every upsert of a (job, account, platform) post row.
#[derive(Debug)]
pub struct PostUpsert<'a> {
    pub job_id: Option<&'a str>,
    pub platform: &'a str,
    pub late_account_id: &'a str,
    pub video_url: &'a str,
    pub caption: &'a str,
    pub publish_mode: &'a str,
    pub status: PostStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub late_post_id: Option<&'a str>,
    pub api_key_index: i32,
}

/// Insert or update the post row for one target, keyed on
/// (job_id, late_account_id, platform). Re-publishing the same triple updates
/// in place and bumps the attempt counter; the unique index (declared NULLS
/// NOT DISTINCT so jobless posts dedupe too) guarantees no duplicate row can
/// appear.
pub async fn upsert_post<'e, E>(executor: E, row: &PostUpsert<'_>) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO posts (job_id, platform, late_account_id, video_url, caption,
                           publish_mode, status, scheduled_for, late_post_id,
                           api_key_index, publish_attempts, last_checked_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1, NOW())
        ON CONFLICT (job_id, late_account_id, platform) DO UPDATE SET
            video_url = $4,
            caption = $5,
            publish_mode = $6,
            status = $7,
            scheduled_for = $8,
            late_post_id = $9,
            api_key_index = $10,
            publish_attempts = posts.publish_attempts + 1,
            last_checked_at = NOW()
        RETURNING id
        "#,
    )
    .bind(row.job_id)
    .bind(row.platform)
    .bind(row.late_account_id)
    .bind(row.video_url)
    .bind(row.caption)
    .bind(row.publish_mode)
    .bind(row.status.as_str())
    .bind(row.scheduled_for)
    .bind(row.late_post_id)
    .bind(row.api_key_index)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

/// Follow-up for a target whose resolved status is `published`: attach the
/// publish timestamp, external ids, and platform URL. The attempt counter was
/// already bumped by the upsert that produced this row.
pub async fn mark_post_published<'e, E>(
    executor: E,
    post_id: i64,
    published_at: DateTime<Utc>,
    external_post_id: Option<&str>,
    platform_post_url: Option<&str>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE posts
        SET status = 'published', published_at = $2, external_post_id = $3,
            platform_post_url = $4, last_checked_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(post_id)
    .bind(published_at)
    .bind(external_post_id)
    .bind(platform_post_url)
    .execute(executor)
    .await?;

    Ok(())
}

/// One group of recent post rows sharing an external post id, with the
/// distinct set of account ids that post covered.
#[derive(Debug, sqlx::FromRow)]
pub struct ContentMatchCandidate {
    pub late_post_id: String,
    pub account_ids: Vec<String>,
}

/// Historical content match (dedupe Layer C): recent post rows whose content
/// identity (caption, video URL, mode, schedule) matches the incoming request
/// exactly, grouped by the external post they belong to. The caller compares
/// each candidate's account set against the requested set for exact equality.
pub async fn find_recent_content_match(
    db: &PgPool,
    caption: &str,
    video_url: &str,
    publish_mode: &str,
    scheduled_for: Option<DateTime<Utc>>,
    window_secs: i64,
) -> Result<Vec<ContentMatchCandidate>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT late_post_id, array_agg(DISTINCT late_account_id) AS account_ids
        FROM posts
        WHERE caption = $1
          AND video_url = $2
          AND publish_mode = $3
          AND scheduled_for IS NOT DISTINCT FROM $4
          AND late_post_id IS NOT NULL
          AND created_at > NOW() - ($5 * INTERVAL '1 second')
        GROUP BY late_post_id
        "#,
    )
    .bind(caption)
    .bind(video_url)
    .bind(publish_mode)
    .bind(scheduled_for)
    .bind(window_secs)
    .fetch_all(db)
    .await
}
