//! Application constants

/// TTL for the process-local dedupe fast path (30 seconds)
pub const DEDUPE_CACHE_TTL_SECS: u64 = 30;

/// Ledger rows stuck in `processing` longer than this are purged (30 minutes)
pub const STALE_LEDGER_SECS: i64 = 30 * 60;

/// Window for the historical content match against recent posts (10 minutes)
pub const CONTENT_MATCH_WINDOW_SECS: i64 = 10 * 60;

/// Upper bound on a single binary upload to a presigned slot (120 seconds)
pub const UPLOAD_TIMEOUT_SECS: u64 = 120;

/// Settle delay between upload completion and post creation, in seconds
pub const UPLOAD_SETTLE_SECS: u64 = 2;

/// Timezone used when a scheduled request omits one
pub const DEFAULT_TIMEZONE: &str = "UTC";
