//! Publish domain models: inbound request shapes, status enums, ledger rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported destination platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Tiktok,
    Instagram,
    Youtube,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Tiktok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::Youtube => "youtube",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the external platform should time the post
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    #[default]
    Now,
    Schedule,
    Queue,
    Draft,
}

impl PublishMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishMode::Now => "now",
            PublishMode::Schedule => "schedule",
            PublishMode::Queue => "queue",
            PublishMode::Draft => "draft",
        }
    }
}

/// Internal status taxonomy for a local post record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Pending,
    Publishing,
    Scheduled,
    Published,
    Failed,
    Partial,
    Cancelled,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Pending => "pending",
            PostStatus::Publishing => "publishing",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
            PostStatus::Partial => "partial",
            PostStatus::Cancelled => "cancelled",
        }
    }
}

/// One (platform, account) destination in a publish request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformTarget {
    pub platform: Platform,
    pub account_id: String,
    /// Credential shard selector; targets sharing an index are uploaded and
    /// posted together
    #[serde(default)]
    pub api_key_index: usize,
}

/// Inbound publish request body.
///
/// Required fields are modeled as defaulted so validation can reject them
/// with a 400 and a useful message instead of a deserialization error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    #[serde(default)]
    pub video_url: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub platforms: Vec<PlatformTarget>,
    #[serde(default)]
    pub publish_mode: PublishMode,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub job_id: Option<String>,
    /// Caller-supplied identity key; overrides content addressing
    pub dedupe_key: Option<String>,
    #[serde(default)]
    pub force_repost: bool,
    /// Single-use token required when `force_repost` is set
    pub force_token: Option<String>,
}

/// Ledger row state
pub const LEDGER_PROCESSING: &str = "processing";
pub const LEDGER_COMPLETED: &str = "completed";

/// One idempotency ledger row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerRecord {
    #[allow(dead_code)] // Fetched for completeness; callers key by the lookup
    pub key: String,
    pub request_hash: String,
    pub status: String,
    pub late_post_id: Option<String>,
    pub response_snapshot: Option<serde_json::Value>,
    #[allow(dead_code)]
    pub created_at: DateTime<Utc>,
    #[allow(dead_code)]
    pub updated_at: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn is_completed(&self) -> bool {
        self.status == LEDGER_COMPLETED
    }
}
