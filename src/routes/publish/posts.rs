//! Publish endpoints (/api/publish*)
//!
//! The pipeline: validate and fingerprint the request, pass the three dedupe
//! layers (process-local cache, persistent ledger, historical content match),
//! then orchestrate shard-grouped upload and post creation, translate
//! per-platform results, and record local post rows. The ledger insert is the
//! only strict mutual-exclusion boundary; any failure after acquiring it
//! releases the entry and clears the local cache so a retry is not deadlocked.

use axum::{Json, Router, extract::State, routing::post};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use super::dto::{PostSummary, PublishResponse, ReplayRequest, TargetResult, Timing};
use super::upload::{self, OrchestrateError};
use crate::AppState;
use crate::constants::{CONTENT_MATCH_WINDOW_SECS, STALE_LEDGER_SECS};
use crate::domain::publish::models::{PlatformTarget, PostStatus, PublishMode, PublishRequest};
use crate::domain::publish::queries::ledger::{self, AcquireOutcome};
use crate::domain::publish::queries::posts;
use crate::domain::publish::status::resolve_status;
use crate::services::dedupe::{CacheLookup, CachedResult};
use crate::services::error::{ApiError, LogErr};
use crate::services::fingerprint::{self, PublishIdentity};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/publish", post(publish_video))
        .route("/api/publish/replay", post(replay_publish))
}

/// POST /api/publish - Publish one video to every requested platform target,
/// at most once per identity key.
async fn publish_video(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, ApiError> {
    let started = Instant::now();
    // Every error body carries timing, including pre-pipeline rejections
    publish_inner(&state, &req, started)
        .await
        .map(Json)
        .map_err(|e| e.or_timing(Timing::elapsed(started)))
}

async fn publish_inner(
    state: &Arc<AppState>,
    req: &PublishRequest,
    started: Instant,
) -> Result<PublishResponse, ApiError> {
    // Fail fast, before any side effects
    fingerprint::validate(req)?;
    let identity = fingerprint::build_identity(req);

    // Layer A: process-local fast path
    match state.dedupe.begin(&identity.key) {
        CacheLookup::InFlight => {
            return Err(ApiError::conflict(
                "A publish with this key is already processing",
            ));
        }
        CacheLookup::Recent(cached) => {
            println!(
                "[publish] fast-path dedupe hit for {} -> {}",
                identity.key, cached.late_post_id
            );
            let mut resp = snapshot_response(cached.response)?;
            resp.deduped = Some(true);
            return Ok(resp);
        }
        CacheLookup::Miss => {}
    }

    let result = execute_publish(state, req, &identity, started).await;
    if result.is_err() {
        // Symmetric with the ledger cleanup inside execute_publish
        state.dedupe.clear(&identity.key);
    }
    result
}

/// POST /api/publish/replay - Replay a completed publish by its idempotency
/// key. Explicitly models "operation identified by a key, safe to replay"
/// instead of clients reconstructing a matching fingerprint.
async fn replay_publish(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReplayRequest>,
) -> Result<Json<PublishResponse>, ApiError> {
    let started = Instant::now();
    replay_inner(&state, &body)
        .await
        .map(Json)
        .map_err(|e| e.or_timing(Timing::elapsed(started)))
}

async fn replay_inner(
    state: &Arc<AppState>,
    body: &ReplayRequest,
) -> Result<PublishResponse, ApiError> {
    let record = ledger::get(&state.db, &body.key)
        .await
        .log_500("Ledger read error")?
        .ok_or_else(|| ApiError::not_found("No publish recorded under this key"))?;

    if !record.is_completed() {
        return Err(ApiError::conflict(
            "A publish with this key is still processing",
        ));
    }

    let snapshot = record
        .response_snapshot
        .ok_or_else(|| ApiError::internal("Completed publish has no stored response"))?;
    let mut resp = snapshot_response(snapshot)?;
    resp.replayed = Some(true);
    Ok(resp)
}

/// Layers B and C plus orchestration. On any error after the ledger entry is
/// acquired, the entry is released so a legitimate retry is not blocked.
async fn execute_publish(
    state: &Arc<AppState>,
    req: &PublishRequest,
    identity: &PublishIdentity,
    started: Instant,
) -> Result<PublishResponse, ApiError> {
    // Layer B: persistent ledger, the actual mutual-exclusion primitive
    ledger::purge_stale(&state.db, STALE_LEDGER_SECS)
        .await
        .log_500("Stale ledger purge error")?;

    match ledger::try_acquire(&state.db, &identity.key, &identity.request_hash)
        .await
        .log_500("Ledger acquire error")?
    {
        AcquireOutcome::Existing(record) => {
            if record.request_hash != identity.request_hash {
                return Err(ApiError::conflict(
                    "This idempotency key was already used with different request content",
                ));
            }
            if record.is_completed() {
                let resp = match record.response_snapshot {
                    Some(snapshot) => {
                        let mut resp = snapshot_response(snapshot)?;
                        resp.deduped = Some(true);
                        resp
                    }
                    None => deduped_response(
                        req,
                        record.late_post_id.as_deref().unwrap_or_default(),
                        started,
                    ),
                };
                seed_cache(state, &identity.key, &resp);
                return Ok(resp);
            }
            return Err(ApiError::conflict(
                "A publish with this key is already processing",
            ));
        }
        AcquireOutcome::Acquired => {}
    }

    let result = run_pipeline(state, req, identity, started).await;
    if result.is_err() {
        if let Err(e) = ledger::release(&state.db, &identity.key).await {
            eprintln!("Ledger release error for {}: {}", identity.key, e);
        }
    }
    result
}

/// Layer C and the orchestration pass, run while holding the ledger entry.
async fn run_pipeline(
    state: &Arc<AppState>,
    req: &PublishRequest,
    identity: &PublishIdentity,
    started: Instant,
) -> Result<PublishResponse, ApiError> {
    // Layer C: historical content match catches identical real posts that
    // slipped past A/B (different process, different client dedupe key)
    if !identity.forced {
        let candidates = posts::find_recent_content_match(
            &state.db,
            req.caption.trim(),
            &req.video_url,
            req.publish_mode.as_str(),
            req.scheduled_for,
            CONTENT_MATCH_WINDOW_SECS,
        )
        .await
        .log_500("Content match query error")?;

        let existing = candidates
            .into_iter()
            .find(|c| accounts_match_exactly(&c.account_ids, &req.platforms));

        if let Some(hit) = existing {
            println!(
                "[publish] historical content match for {} (fingerprint {}) -> {}",
                identity.key, identity.fingerprint, hit.late_post_id
            );
            let mut resp = deduped_response(req, &hit.late_post_id, started);
            resp.message =
                "An identical publish already exists; returning the existing post".to_string();
            let snapshot = serde_json::to_value(&resp).log_500("Snapshot encode error")?;
            if let Err(e) =
                ledger::complete(&state.db, &identity.key, &hit.late_post_id, &snapshot).await
            {
                eprintln!("Ledger complete error for {}: {}", identity.key, e);
            }
            seed_cache(state, &identity.key, &resp);
            return Ok(resp);
        }
    }

    // Download the source video exactly once, shared by all shard groups
    let download_started = Instant::now();
    let video = upload::download_video(&state.http, &req.video_url)
        .await
        .map_err(|e| orchestrate_error(e, Timing::default(), started))?;
    let download_ms = download_started.elapsed().as_millis() as u64;

    let groups = upload::partition_by_shard(&req.platforms);
    let run = upload::run_shard_groups(&state.late, &groups, video, req).await;

    // Record every group that did complete before any failure surfaces. Their
    // external posts exist; without local rows a blind retry could not see
    // them and would post those targets again.
    let mut results = Vec::with_capacity(req.platforms.len());
    for outcome in &run.outcomes {
        record_group(state, req, outcome, &mut results).await;
    }

    if let Some(failure) = run.failure {
        let timing = Timing {
            download_ms,
            upload_ms: run.upload_ms,
            total_ms: started.elapsed().as_millis() as u64,
        };
        return Err(with_recorded_targets(
            orchestrate_error(failure, timing, started),
            &results,
        ));
    }

    let late_post_id = run
        .outcomes
        .first()
        .map(|o| o.post.id.clone())
        .unwrap_or_default();
    let message = publish_message(req, results.len());
    let resp = PublishResponse {
        success: true,
        deduped: None,
        forced: identity.forced.then_some(true),
        replayed: None,
        post: PostSummary {
            late_post_id: late_post_id.clone(),
            platforms: platform_names(req),
        },
        results,
        message,
        timing: Timing {
            download_ms,
            upload_ms: run.upload_ms,
            total_ms: started.elapsed().as_millis() as u64,
        },
    };

    let snapshot = serde_json::to_value(&resp).log_500("Snapshot encode error")?;
    // A failure here leaves the row `processing` until the stale purge; it
    // must not fail the request, or a client retry would double-post
    if let Err(e) = ledger::complete(&state.db, &identity.key, &late_post_id, &snapshot).await {
        eprintln!("Ledger complete error for {}: {}", identity.key, e);
    }
    state.dedupe.complete(
        &identity.key,
        CachedResult {
            late_post_id,
            response: snapshot,
        },
    );

    Ok(resp)
}

/// Translate and record one shard group's external results, appending one
/// TargetResult per target the group covered. Runs as each completed group
/// comes back, so the rows exist even when a later group fails the request.
async fn record_group(
    state: &Arc<AppState>,
    req: &PublishRequest,
    outcome: &upload::ShardOutcome,
    results: &mut Vec<TargetResult>,
) {
    let external = &outcome.post;
    for target in req
        .platforms
        .iter()
        .filter(|t| t.api_key_index == outcome.api_key_index)
    {
        let sub = upload::match_sub_result(external, target);
        // No sub-result for the pair: fall back to the aggregate status
        let platform_status = sub.map(|s| s.status.as_str()).unwrap_or(&external.status);
        let status = resolve_status(req.publish_mode, &external.status, platform_status);

        let row = posts::PostUpsert {
            job_id: req.job_id.as_deref(),
            platform: target.platform.as_str(),
            late_account_id: &target.account_id,
            video_url: &req.video_url,
            caption: req.caption.trim(),
            publish_mode: req.publish_mode.as_str(),
            status,
            scheduled_for: req.scheduled_for,
            late_post_id: Some(&external.id),
            api_key_index: target.api_key_index as i32,
        };

        // The external post is authoritative: a local persistence failure
        // downgrades to a per-target warning, never to a request failure
        let (db_post_id, warning) = match posts::upsert_post(&state.db, &row).await {
            Ok(id) => {
                let mut warning = None;
                if status == PostStatus::Published {
                    let published_at = sub.and_then(|s| s.published_at).unwrap_or_else(Utc::now);
                    let external_post_id = sub.and_then(|s| s.platform_post_id.as_deref());
                    let platform_post_url = sub.and_then(|s| s.platform_post_url.as_deref());
                    if let Err(e) = posts::mark_post_published(
                        &state.db,
                        id,
                        published_at,
                        external_post_id,
                        platform_post_url,
                    )
                    .await
                    {
                        eprintln!("Mark published error for post {}: {}", id, e);
                        warning = Some(format!("Post record update failed: {}", e));
                    }
                }
                (Some(id), warning)
            }
            Err(e) => {
                eprintln!(
                    "Post upsert error for {}:{}: {}",
                    target.platform, target.account_id, e
                );
                (None, Some(format!("Local post record not saved: {}", e)))
            }
        };

        results.push(TargetResult {
            platform: target.platform.as_str().to_string(),
            account_id: target.account_id.clone(),
            db_post_id,
            status,
            warning,
        });
    }
}

/// Attach the targets already recorded before a failure to the error details,
/// so the caller knows which external posts exist and can retry with only the
/// remaining targets.
fn with_recorded_targets(mut err: ApiError, recorded: &[TargetResult]) -> ApiError {
    if recorded.is_empty() {
        return err;
    }
    let Ok(recorded) = serde_json::to_value(recorded) else {
        return err;
    };
    let mut details = match err.details.take() {
        Some(serde_json::Value::Object(map)) => map,
        Some(other) => {
            let mut map = serde_json::Map::new();
            map.insert("upstream".to_string(), other);
            map
        }
        None => serde_json::Map::new(),
    };
    details.insert("recordedResults".to_string(), recorded);
    err.details = Some(serde_json::Value::Object(details));
    err
}

/// Exact set equality between a candidate's account ids and the requested
/// targets: same cardinality, same membership. Supersets and subsets are not
/// matches.
fn accounts_match_exactly(candidate: &[String], requested: &[PlatformTarget]) -> bool {
    let candidate: BTreeSet<&str> = candidate.iter().map(String::as_str).collect();
    let requested: BTreeSet<&str> = requested.iter().map(|t| t.account_id.as_str()).collect();
    candidate == requested
}

fn snapshot_response(snapshot: serde_json::Value) -> Result<PublishResponse, ApiError> {
    serde_json::from_value(snapshot).map_err(|e| {
        eprintln!("Response snapshot decode error: {}", e);
        ApiError::internal("Stored response snapshot is unreadable")
    })
}

/// Populate the fast-path success cache after a dedupe resolution, so the
/// in-flight mark left by Layer A turns into a replayable entry.
fn seed_cache(state: &Arc<AppState>, key: &str, resp: &PublishResponse) {
    if let Ok(snapshot) = serde_json::to_value(resp) {
        state.dedupe.complete(
            key,
            CachedResult {
                late_post_id: resp.post.late_post_id.clone(),
                response: snapshot,
            },
        );
    }
}

/// Success-as-if-created response for dedupe hits that carry no stored
/// snapshot (Layer C, or a completed ledger row without one).
fn deduped_response(req: &PublishRequest, late_post_id: &str, started: Instant) -> PublishResponse {
    let status = resolve_status(req.publish_mode, "", "");
    let results = req
        .platforms
        .iter()
        .map(|target| TargetResult {
            platform: target.platform.as_str().to_string(),
            account_id: target.account_id.clone(),
            db_post_id: None,
            status,
            warning: None,
        })
        .collect();

    PublishResponse {
        success: true,
        deduped: Some(true),
        forced: None,
        replayed: None,
        post: PostSummary {
            late_post_id: late_post_id.to_string(),
            platforms: platform_names(req),
        },
        results,
        message: "This video was already published".to_string(),
        timing: Timing::elapsed(started),
    }
}

/// Unique platform names in request order
fn platform_names(req: &PublishRequest) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for target in &req.platforms {
        let name = target.platform.as_str().to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn publish_message(req: &PublishRequest, target_count: usize) -> String {
    match req.publish_mode {
        PublishMode::Now => format!("Video published to {} platform target(s)", target_count),
        PublishMode::Schedule => match req.scheduled_for {
            Some(at) => format!("Video scheduled for {}", at.to_rfc3339()),
            None => "Video scheduled".to_string(),
        },
        PublishMode::Queue => "Video added to the posting queue".to_string(),
        PublishMode::Draft => "Draft saved".to_string(),
    }
}

fn orchestrate_error(e: OrchestrateError, timing: Timing, started: Instant) -> ApiError {
    let timing = Timing {
        total_ms: started.elapsed().as_millis() as u64,
        ..timing
    };
    match e {
        OrchestrateError::Download(message) => ApiError::internal(message).with_timing(timing),
        OrchestrateError::Late(late) => {
            ApiError::from_late("Publish failed", &late).with_timing(timing)
        }
    }
}
