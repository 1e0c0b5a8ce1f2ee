//! Translation of external platform results into the internal status taxonomy

use super::models::{PostStatus, PublishMode};

/// Resolve the internal status for one (platform, account) target.
///
/// `aggregate_status` is the external post's overall status; `platform_status`
/// is the target's sub-result status, or the aggregate again when the external
/// response carried no sub-result for the pair. Rules are checked in order and
/// the first match wins.
pub fn resolve_status(
    mode: PublishMode,
    aggregate_status: &str,
    platform_status: &str,
) -> PostStatus {
    if mode == PublishMode::Draft {
        return PostStatus::Draft;
    }
    if platform_status.eq_ignore_ascii_case("published") {
        return PostStatus::Published;
    }
    if aggregate_status.eq_ignore_ascii_case("scheduled") || mode == PublishMode::Schedule {
        return PostStatus::Scheduled;
    }
    if platform_status.eq_ignore_ascii_case("failed") {
        return PostStatus::Failed;
    }
    if platform_status.eq_ignore_ascii_case("partial") {
        return PostStatus::Partial;
    }
    if mode == PublishMode::Now {
        PostStatus::Publishing
    } else {
        PostStatus::Pending
    }
}
