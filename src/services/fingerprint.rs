//! Fingerprint Builder: request validation, content fingerprinting, and
//! idempotency key derivation.
//!
//! The fingerprint is a sha256 over the fields that define a publish
//! operation's identity. Everything here is pure; validation fails fast with
//! no side effects.

use sha2::{Digest, Sha256};

use crate::constants::DEFAULT_TIMEZONE;
use crate::domain::publish::models::{PublishMode, PublishRequest};
use crate::services::error::ApiError;

/// Canonical identity of one publish operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishIdentity {
    /// Ledger key: `force:<token>`, `explicit:<dedupeKey>`, or
    /// `fingerprint:<hash>`
    pub key: String,
    /// Hash compared against the ledger row to detect key reuse with
    /// different content
    pub request_hash: String,
    /// Pure content fingerprint, independent of key derivation
    pub fingerprint: String,
    pub forced: bool,
}

/// Reject structurally invalid requests before any ledger row is written.
pub fn validate(req: &PublishRequest) -> Result<(), ApiError> {
    if req.video_url.trim().is_empty() {
        return Err(ApiError::bad_request("videoUrl is required"));
    }
    if req.platforms.is_empty() {
        return Err(ApiError::bad_request(
            "At least one platform target is required",
        ));
    }
    if req.publish_mode == PublishMode::Schedule && req.scheduled_for.is_none() {
        return Err(ApiError::bad_request(
            "scheduledFor is required when publishMode is \"schedule\"",
        ));
    }
    if req.force_repost && req.force_token.as_deref().unwrap_or("").is_empty() {
        return Err(ApiError::bad_request(
            "forceToken is required when forceRepost is set",
        ));
    }
    Ok(())
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Content fingerprint over {videoUrl, trimmed caption, mode, scheduledFor,
/// timezone, sorted unique platform:accountId set}. Target order and
/// duplicate targets do not change the result.
pub fn content_fingerprint(req: &PublishRequest) -> String {
    let mut accounts: Vec<String> = req
        .platforms
        .iter()
        .map(|t| format!("{}:{}", t.platform, t.account_id))
        .collect();
    accounts.sort();
    accounts.dedup();

    let canonical = serde_json::json!({
        "videoUrl": req.video_url,
        "caption": req.caption.trim(),
        "publishMode": req.publish_mode.as_str(),
        "scheduledFor": req.scheduled_for,
        "timezone": req.timezone.as_deref().unwrap_or(DEFAULT_TIMEZONE),
        "accounts": accounts,
    });

    sha256_hex(&canonical.to_string())
}

/// Derive the identity key and request hash.
///
/// Precedence: force token, then explicit dedupe key, then pure
/// content-addressed identity. A fresh force token always yields a fresh
/// identity even for identical content; reusing a token dedupes.
pub fn build_identity(req: &PublishRequest) -> PublishIdentity {
    let fingerprint = content_fingerprint(req);

    if req.force_repost {
        let token = req.force_token.as_deref().unwrap_or("");
        return PublishIdentity {
            key: format!("force:{}", token),
            request_hash: sha256_hex(&format!("{}{}", fingerprint, token)),
            fingerprint,
            forced: true,
        };
    }

    if let Some(dedupe_key) = req.dedupe_key.as_deref().filter(|k| !k.is_empty()) {
        return PublishIdentity {
            key: format!("explicit:{}", dedupe_key),
            request_hash: fingerprint.clone(),
            fingerprint,
            forced: false,
        };
    }

    PublishIdentity {
        key: format!("fingerprint:{}", fingerprint),
        request_hash: fingerprint.clone(),
        fingerprint,
        forced: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::publish::models::{Platform, PlatformTarget};
    use chrono::{TimeZone, Utc};

    fn target(platform: Platform, account: &str) -> PlatformTarget {
        PlatformTarget {
            platform,
            account_id: account.to_string(),
            api_key_index: 0,
        }
    }

    fn base_request() -> PublishRequest {
        PublishRequest {
            video_url: "https://cdn.example.com/v1.mp4".to_string(),
            caption: "hello".to_string(),
            platforms: vec![
                target(Platform::Tiktok, "A"),
                target(Platform::Instagram, "B"),
            ],
            publish_mode: PublishMode::Now,
            scheduled_for: None,
            timezone: None,
            job_id: None,
            dedupe_key: None,
            force_repost: false,
            force_token: None,
        }
    }

    #[test]
    fn identical_requests_share_a_fingerprint() {
        assert_eq!(
            content_fingerprint(&base_request()),
            content_fingerprint(&base_request())
        );
    }

    #[test]
    fn target_order_and_duplicates_are_irrelevant() {
        let mut reordered = base_request();
        reordered.platforms = vec![
            target(Platform::Instagram, "B"),
            target(Platform::Tiktok, "A"),
            target(Platform::Tiktok, "A"),
        ];
        assert_eq!(
            content_fingerprint(&base_request()),
            content_fingerprint(&reordered)
        );
    }

    #[test]
    fn caption_is_trimmed_before_hashing() {
        let mut padded = base_request();
        padded.caption = "  hello \n".to_string();
        assert_eq!(
            content_fingerprint(&base_request()),
            content_fingerprint(&padded)
        );
    }

    #[test]
    fn schedule_fields_change_the_fingerprint() {
        let mut scheduled = base_request();
        scheduled.publish_mode = PublishMode::Schedule;
        scheduled.scheduled_for = Some(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        assert_ne!(
            content_fingerprint(&base_request()),
            content_fingerprint(&scheduled)
        );
    }

    #[test]
    fn content_addressed_key_by_default() {
        let identity = build_identity(&base_request());
        assert_eq!(identity.key, format!("fingerprint:{}", identity.fingerprint));
        assert_eq!(identity.request_hash, identity.fingerprint);
        assert!(!identity.forced);
    }

    #[test]
    fn explicit_dedupe_key_overrides_content_addressing() {
        let mut req = base_request();
        req.dedupe_key = Some("job-42".to_string());
        let identity = build_identity(&req);
        assert_eq!(identity.key, "explicit:job-42");
        assert_eq!(identity.request_hash, identity.fingerprint);
    }

    #[test]
    fn force_token_scopes_the_identity() {
        let mut forced = base_request();
        forced.force_repost = true;
        forced.force_token = Some("t1".to_string());
        let id1 = build_identity(&forced);
        assert_eq!(id1.key, "force:t1");
        assert!(id1.forced);
        assert_ne!(id1.request_hash, id1.fingerprint);

        // A fresh token yields a fresh identity for identical content;
        // reusing one reproduces it.
        forced.force_token = Some("t2".to_string());
        let id2 = build_identity(&forced);
        assert_ne!(id1.key, id2.key);
        assert_ne!(id1.request_hash, id2.request_hash);
        forced.force_token = Some("t1".to_string());
        assert_eq!(build_identity(&forced).request_hash, id1.request_hash);
    }

    #[test]
    fn validation_rejects_missing_fields() {
        let mut no_url = base_request();
        no_url.video_url = "  ".to_string();
        assert!(validate(&no_url).is_err());

        let mut no_targets = base_request();
        no_targets.platforms.clear();
        assert!(validate(&no_targets).is_err());

        let mut schedule_without_date = base_request();
        schedule_without_date.publish_mode = PublishMode::Schedule;
        assert!(validate(&schedule_without_date).is_err());

        let mut force_without_token = base_request();
        force_without_token.force_repost = true;
        assert!(validate(&force_without_token).is_err());

        assert!(validate(&base_request()).is_ok());
    }
}
