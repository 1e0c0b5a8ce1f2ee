//! Shard-group upload and post-creation helpers for the publish pipeline
//!
//! Targets sharing an `apiKeyIndex` form one shard group (one credential pool
//! and rate-limit domain). The source video is downloaded exactly once and
//! shared across groups; each group runs presign -> upload -> settle ->
//! create-post sequentially.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::constants::{DEFAULT_TIMEZONE, UPLOAD_SETTLE_SECS};
use crate::domain::publish::models::{Platform, PlatformTarget, PublishMode, PublishRequest};
use crate::services::late::{
    CreatePostRequest, ExternalPlatformResult, ExternalPost, LateClient, LateError, MediaItem,
    PlatformPayload,
};

/// Targets sharing one credential shard, posted as a unit
#[derive(Debug)]
pub struct ShardGroup {
    pub api_key_index: usize,
    pub targets: Vec<PlatformTarget>,
}

/// One shard group's completed external post
#[derive(Debug)]
pub struct ShardOutcome {
    pub api_key_index: usize,
    pub post: ExternalPost,
    pub upload_ms: u64,
}

/// Failure inside the orchestration sequence
#[derive(Debug)]
pub enum OrchestrateError {
    /// Fetching the source video failed
    Download(String),
    /// Presign, upload, or create-post failed
    Late(LateError),
}

impl From<LateError> for OrchestrateError {
    fn from(e: LateError) -> Self {
        OrchestrateError::Late(e)
    }
}

/// Group targets by credential shard, in ascending index order.
pub fn partition_by_shard(targets: &[PlatformTarget]) -> Vec<ShardGroup> {
    let mut groups: BTreeMap<usize, Vec<PlatformTarget>> = BTreeMap::new();
    for target in targets {
        groups
            .entry(target.api_key_index)
            .or_default()
            .push(target.clone());
    }
    groups
        .into_iter()
        .map(|(api_key_index, targets)| ShardGroup {
            api_key_index,
            targets,
        })
        .collect()
}

/// Derive the upload filename and content type from the video URL's
/// extension, defaulting to video/mp4.
pub fn filename_and_content_type(video_url: &str) -> (String, &'static str) {
    let path = video_url
        .split(['?', '#'])
        .next()
        .unwrap_or(video_url);
    let filename = path
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("video.mp4")
        .to_string();

    let content_type = match filename.rsplit('.').next() {
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        _ => "video/mp4",
    };

    (filename, content_type)
}

/// Download the source video once; the bytes are shared by all shard groups.
pub async fn download_video(http: &reqwest::Client, url: &str) -> Result<Bytes, OrchestrateError> {
    let resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| OrchestrateError::Download(format!("Failed to download video: {}", e)))?;

    if !resp.status().is_success() {
        return Err(OrchestrateError::Download(format!(
            "Failed to download video: source returned {}",
            resp.status()
        )));
    }

    resp.bytes()
        .await
        .map_err(|e| OrchestrateError::Download(format!("Failed to read video body: {}", e)))
}

/// Platform-specific metadata attached to each target in the create-post
/// payload.
fn platform_specific_data(target: &PlatformTarget, caption: &str) -> serde_json::Value {
    match target.platform {
        Platform::Tiktok => serde_json::json!({
            "privacyLevel": "PUBLIC_TO_EVERYONE",
            "disableComment": false,
            "disableDuet": false,
            "disableStitch": false,
            "isBrandedContent": false,
        }),
        Platform::Instagram => serde_json::json!({
            "shareToFeed": true,
        }),
        Platform::Youtube => {
            let title: String = caption.lines().next().unwrap_or("").chars().take(100).collect();
            serde_json::json!({
                "title": title,
                "visibility": "public",
            })
        }
    }
}

/// Build the create-post payload for one shard group: every target in the
/// group plus the timing directive derived from the publish mode.
pub fn build_create_post(
    group: &ShardGroup,
    req: &PublishRequest,
    public_url: &str,
) -> CreatePostRequest {
    let platforms = group
        .targets
        .iter()
        .map(|target| PlatformPayload {
            platform: target.platform.as_str().to_string(),
            account_id: target.account_id.clone(),
            platform_specific_data: Some(platform_specific_data(target, &req.caption)),
        })
        .collect();

    let mut create = CreatePostRequest {
        content: req.caption.trim().to_string(),
        media_items: vec![MediaItem {
            media_type: "video".to_string(),
            url: public_url.to_string(),
        }],
        platforms,
        publish_now: None,
        scheduled_for: None,
        timezone: None,
        add_to_queue: None,
        is_draft: None,
    };

    match req.publish_mode {
        PublishMode::Now => create.publish_now = Some(true),
        PublishMode::Schedule => {
            create.scheduled_for = req.scheduled_for;
            create.timezone = Some(
                req.timezone
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            );
        }
        PublishMode::Queue => create.add_to_queue = Some(true),
        PublishMode::Draft => create.is_draft = Some(true),
    }

    create
}

/// Run one shard group's presign -> upload -> settle -> create-post sequence.
pub async fn publish_shard_group(
    late: &LateClient,
    group: &ShardGroup,
    video: Bytes,
    req: &PublishRequest,
) -> Result<ShardOutcome, OrchestrateError> {
    let (filename, content_type) = filename_and_content_type(&req.video_url);

    let presign = late
        .presign(group.api_key_index, &filename, content_type)
        .await?;

    let upload_started = Instant::now();
    late.upload(&presign.upload_url, video, content_type).await?;
    let upload_ms = upload_started.elapsed().as_millis() as u64;

    // Give the storage backend a moment to make the object readable before
    // the post references it
    tokio::time::sleep(Duration::from_secs(UPLOAD_SETTLE_SECS)).await;

    let create = build_create_post(group, req, &presign.public_url);
    let post = late.create_post(group.api_key_index, &create).await?;

    println!(
        "[publish] shard {} created late post {} covering {} target(s)",
        group.api_key_index,
        post.id,
        group.targets.len()
    );

    Ok(ShardOutcome {
        api_key_index: group.api_key_index,
        post,
        upload_ms,
    })
}

/// Result of running every shard group in ascending index order: the groups
/// that completed, the cumulative upload time, and the failure that stopped
/// the run, if any.
#[derive(Debug)]
pub struct GroupRun {
    pub outcomes: Vec<ShardOutcome>,
    pub upload_ms: u64,
    pub failure: Option<OrchestrateError>,
}

/// Run each shard group's sequence in turn. A group's failure stops the run,
/// but every outcome completed before it is returned so the caller records
/// those targets; their external posts already exist and must not be lost.
pub async fn run_shard_groups(
    late: &LateClient,
    groups: &[ShardGroup],
    video: Bytes,
    req: &PublishRequest,
) -> GroupRun {
    let mut outcomes = Vec::with_capacity(groups.len());
    let mut upload_ms: u64 = 0;
    for group in groups {
        match publish_shard_group(late, group, video.clone(), req).await {
            Ok(outcome) => {
                upload_ms += outcome.upload_ms;
                outcomes.push(outcome);
            }
            Err(e) => {
                eprintln!("Shard {} failed: {}", group.api_key_index, describe(&e));
                return GroupRun {
                    outcomes,
                    upload_ms,
                    failure: Some(e),
                };
            }
        }
    }
    GroupRun {
        outcomes,
        upload_ms,
        failure: None,
    }
}

fn describe(e: &OrchestrateError) -> String {
    match e {
        OrchestrateError::Download(message) => message.clone(),
        OrchestrateError::Late(late) => late.to_string(),
    }
}

/// Find the sub-result for one target inside an external post, if any. The
/// caller falls back to the post's aggregate status when this returns None.
pub fn match_sub_result<'a>(
    post: &'a ExternalPost,
    target: &PlatformTarget,
) -> Option<&'a ExternalPlatformResult> {
    post.platforms.iter().find(|sub| {
        sub.platform.eq_ignore_ascii_case(target.platform.as_str())
            && sub.account_id == target.account_id
    })
}
