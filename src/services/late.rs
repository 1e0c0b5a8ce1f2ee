//! Late publishing API client: presigned uploads and multi-platform post
//! creation.
//!
//! One API key per credential shard; a target's `apiKeyIndex` selects which
//! key (and therefore which rate-limit domain) its shard group uses.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::UPLOAD_TIMEOUT_SECS;

#[derive(Clone)]
pub struct LateClient {
    base_url: String,
    api_keys: Vec<String>,
    http: Client,
}

#[derive(Debug)]
pub enum LateError {
    Http(reqwest::Error),
    /// Non-2xx from the Late API; status and raw body are kept so the caller
    /// can forward them
    Api {
        status: u16,
        body: String,
    },
    /// The binary upload exceeded its deadline. Distinct from other upload
    /// failures so callers can report it as such.
    UploadTimeout,
    /// No credential configured for the requested shard index
    MissingApiKey(usize),
}

impl From<reqwest::Error> for LateError {
    fn from(e: reqwest::Error) -> Self {
        LateError::Http(e)
    }
}

impl std::fmt::Display for LateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LateError::Http(e) => write!(f, "HTTP error: {}", e),
            LateError::Api { status, body } => {
                write!(f, "Late API error ({}): {}", status, body)
            }
            LateError::UploadTimeout => {
                write!(f, "upload timed out after {}s", UPLOAD_TIMEOUT_SECS)
            }
            LateError::MissingApiKey(index) => {
                write!(f, "no Late API key configured for shard index {}", index)
            }
        }
    }
}

impl std::error::Error for LateError {}

/// Presigned upload slot
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    pub upload_url: String,
    pub public_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub media_type: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformPayload {
    pub platform: String,
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_specific_data: Option<serde_json::Value>,
}

/// Create-post payload. Exactly one timing directive is set, derived from the
/// request's publish mode.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub content: String,
    pub media_items: Vec<MediaItem>,
    pub platforms: Vec<PlatformPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_now: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_to_queue: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_draft: Option<bool>,
}

/// Per-(platform, account) sub-result inside an external post
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPlatformResult {
    pub platform: String,
    pub account_id: String,
    pub status: String,
    pub published_at: Option<DateTime<Utc>>,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
    pub error: Option<String>,
}

/// Late's representation of a multi-account post
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPost {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub platforms: Vec<ExternalPlatformResult>,
}

#[derive(Debug, Deserialize)]
struct CreatePostResponse {
    post: ExternalPost,
}

impl LateClient {
    pub fn new(base_url: &str, api_keys: Vec<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_keys,
            http: Client::new(),
        }
    }

    fn key_for(&self, index: usize) -> Result<&str, LateError> {
        self.api_keys
            .get(index)
            .map(String::as_str)
            .ok_or(LateError::MissingApiKey(index))
    }

    /// Single point translating a non-2xx Late response into our taxonomy;
    /// the vendor's error schema never leaks past this function.
    async fn api_error(resp: reqwest::Response) -> LateError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        LateError::Api { status, body }
    }

    /// Request a presigned upload slot for a video file.
    pub async fn presign(
        &self,
        api_key_index: usize,
        filename: &str,
        content_type: &str,
    ) -> Result<PresignResponse, LateError> {
        let key = self.key_for(api_key_index)?;
        let url = format!("{}/v1/uploads/presign", self.base_url);

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", key))
            .json(&serde_json::json!({
                "filename": filename,
                "contentType": content_type,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        let presign: PresignResponse = resp.json().await?;
        Ok(presign)
    }

    /// PUT the raw video bytes to a presigned slot, bounded by the upload
    /// timeout.
    pub async fn upload(
        &self,
        upload_url: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), LateError> {
        self.upload_with_timeout(
            upload_url,
            data,
            content_type,
            Duration::from_secs(UPLOAD_TIMEOUT_SECS),
        )
        .await
    }

    pub async fn upload_with_timeout(
        &self,
        upload_url: &str,
        data: Bytes,
        content_type: &str,
        timeout: Duration,
    ) -> Result<(), LateError> {
        let length = data.len();
        let request = self
            .http
            .put(upload_url)
            .header("Content-Type", content_type)
            .header("Content-Length", length)
            .body(data)
            .send();

        let resp = match tokio::time::timeout(timeout, request).await {
            Ok(result) => result?,
            Err(_) => return Err(LateError::UploadTimeout),
        };

        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        Ok(())
    }

    /// Create one post covering every (platform, account) in a shard group.
    pub async fn create_post(
        &self,
        api_key_index: usize,
        request: &CreatePostRequest,
    ) -> Result<ExternalPost, LateError> {
        let key = self.key_for(api_key_index)?;
        let url = format!("{}/v1/posts", self.base_url);

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", key))
            .json(request)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        let wrapper: CreatePostResponse = resp.json().await?;
        Ok(wrapper.post)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::Server) -> LateClient {
        LateClient::new(&server.url(), vec!["test-key".to_string()])
    }

    #[tokio::test]
    async fn presign_sends_bearer_key_and_parses_slot() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/uploads/presign")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"uploadUrl":"https://up.example.com/slot","publicUrl":"https://cdn.example.com/v.mp4"}"#,
            )
            .create_async()
            .await;

        let presign = client_for(&server)
            .presign(0, "v.mp4", "video/mp4")
            .await
            .unwrap();

        assert_eq!(presign.upload_url, "https://up.example.com/slot");
        assert_eq!(presign.public_url, "https://cdn.example.com/v.mp4");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_2xx_becomes_api_error_with_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/posts")
            .with_status(422)
            .with_body(r#"{"message":"invalid platform"}"#)
            .create_async()
            .await;

        let request = CreatePostRequest {
            content: "caption".to_string(),
            media_items: vec![],
            platforms: vec![],
            publish_now: Some(true),
            scheduled_for: None,
            timezone: None,
            add_to_queue: None,
            is_draft: None,
        };

        match client_for(&server).create_post(0, &request).await {
            Err(LateError::Api { status, body }) => {
                assert_eq!(status, 422);
                assert!(body.contains("invalid platform"));
            }
            other => panic!("expected Api error, got {:?}", other.map(|p| p.id)),
        }
    }

    #[tokio::test]
    async fn create_post_unwraps_the_post_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/posts")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"post":{"id":"lp_1","status":"pending","platforms":[
                    {"platform":"tiktok","accountId":"A","status":"published",
                     "publishedAt":"2025-06-01T12:00:00Z",
                     "platformPostId":"tt_9","platformPostUrl":"https://t.example/9"}
                ]}}"#,
            )
            .create_async()
            .await;

        let request = CreatePostRequest {
            content: "caption".to_string(),
            media_items: vec![MediaItem {
                media_type: "video".to_string(),
                url: "https://cdn.example.com/v.mp4".to_string(),
            }],
            platforms: vec![PlatformPayload {
                platform: "tiktok".to_string(),
                account_id: "A".to_string(),
                platform_specific_data: None,
            }],
            publish_now: Some(true),
            scheduled_for: None,
            timezone: None,
            add_to_queue: None,
            is_draft: None,
        };

        let post = client_for(&server).create_post(0, &request).await.unwrap();
        assert_eq!(post.id, "lp_1");
        assert_eq!(post.platforms.len(), 1);
        assert_eq!(post.platforms[0].status, "published");
        assert_eq!(post.platforms[0].platform_post_id.as_deref(), Some("tt_9"));
    }

    #[tokio::test]
    async fn upload_puts_bytes_with_content_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/slot")
            .match_header("content-type", "video/mp4")
            .with_status(200)
            .create_async()
            .await;

        let url = format!("{}/slot", server.url());
        client_for(&server)
            .upload(&url, Bytes::from_static(b"video-bytes"), "video/mp4")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upload_deadline_maps_to_the_distinct_timeout_error() {
        // A listener that accepts and never responds
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let client = LateClient::new("http://unused.invalid", vec!["k".to_string()]);
        let result = client
            .upload_with_timeout(
                &format!("http://{}/slot", addr),
                Bytes::from_static(b"video-bytes"),
                "video/mp4",
                Duration::from_millis(50),
            )
            .await;

        assert!(matches!(result, Err(LateError::UploadTimeout)));
        hold.abort();
    }

    #[tokio::test]
    async fn missing_shard_key_is_rejected_before_any_call() {
        let client = LateClient::new("http://unused.invalid", vec!["only-key".to_string()]);
        match client.presign(3, "v.mp4", "video/mp4").await {
            Err(LateError::MissingApiKey(3)) => {}
            other => panic!("expected MissingApiKey, got {:?}", other.map(|p| p.upload_url)),
        }
    }
}
