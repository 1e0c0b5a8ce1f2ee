//! API response DTOs for the publish endpoints
//!
//! These derive Deserialize as well: the success response is persisted as the
//! ledger's response snapshot and replayed typed on dedupe hits.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::domain::publish::PostStatus;

/// Per-request timing breakdown, milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub download_ms: u64,
    pub upload_ms: u64,
    pub total_ms: u64,
}

impl Timing {
    /// Wall-clock-only timing for paths that never downloaded or uploaded
    /// (validation rejects, dedupe hits, replays).
    pub fn elapsed(started: Instant) -> Self {
        Self {
            download_ms: 0,
            upload_ms: 0,
            total_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Summary of the external post the request resolved to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub late_post_id: String,
    pub platforms: Vec<String>,
}

/// Outcome for one (platform, account) target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    pub platform: String,
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_post_id: Option<i64>,
    pub status: PostStatus,
    /// Non-fatal local persistence problem; the external post is authoritative
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replayed: Option<bool>,
    pub post: PostSummary,
    pub results: Vec<TargetResult>,
    pub message: String,
    pub timing: Timing,
}

/// Body for POST /api/publish/replay
#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> PublishResponse {
        PublishResponse {
            success: true,
            deduped: None,
            forced: None,
            replayed: None,
            post: PostSummary {
                late_post_id: "lp_1".to_string(),
                platforms: vec!["tiktok".to_string()],
            },
            results: vec![TargetResult {
                platform: "tiktok".to_string(),
                account_id: "A".to_string(),
                db_post_id: Some(7),
                status: PostStatus::Published,
                warning: None,
            }],
            message: "Video published to 1 platform(s)".to_string(),
            timing: Timing {
                download_ms: 10,
                upload_ms: 20,
                total_ms: 35,
            },
        }
    }

    #[test]
    fn wire_shape_is_camel_case_with_optionals_elided() {
        let value = serde_json::to_value(sample_response()).unwrap();
        assert_eq!(value["post"]["latePostId"], "lp_1");
        assert_eq!(value["results"][0]["accountId"], "A");
        assert_eq!(value["results"][0]["dbPostId"], 7);
        assert_eq!(value["results"][0]["status"], "published");
        assert_eq!(value["timing"]["downloadMs"], 10);
        assert!(value.get("deduped").is_none());
        assert!(value["results"][0].get("warning").is_none());
    }

    #[test]
    fn snapshot_round_trips_for_replay() {
        let snapshot = serde_json::to_value(sample_response()).unwrap();
        let mut replayed: PublishResponse = serde_json::from_value(snapshot).unwrap();
        replayed.deduped = Some(true);
        assert_eq!(replayed.post.late_post_id, "lp_1");
        assert_eq!(replayed.results.len(), 1);
        let value = serde_json::to_value(&replayed).unwrap();
        assert_eq!(value["deduped"], true);
    }
}
