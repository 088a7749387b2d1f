//! Pooled client bound to a single credential, talking to a generic
//! third-party wall API over HTTP+JSON. Downstream code never inspects the
//! raw upstream payload — everything is decoded into `RemotePost` here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::UpstreamError;

const API_VERSION: &str = "5.199";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BASE_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const MAX_TRANSPORT_RETRIES: u32 = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct RemotePost {
    pub owner_id: i64,
    pub post_id: i64,
    #[serde(default)]
    pub text: String,
    pub published_at: i64,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub reposts: u64,
    #[serde(default)]
    pub comments: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Attachment {
    Photo { id: String },
    Video { id: String },
    Link { url: String },
    Doc { id: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupInfo {
    pub group_id: i64,
    pub name: String,
    #[serde(default)]
    pub is_closed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialInfo {
    pub user_id: i64,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Ok { response: T },
    Err { error: RemoteError },
}

#[derive(Deserialize)]
struct RemoteError {
    error_code: i64,
    error_msg: String,
}

/// Pooled HTTP client bound to one credential. Pool limits (total <= 10,
/// per-host <= 5) are enforced by capping idle connections per host and
/// relying on callers to route through at most two hosts per credential
/// (the wall API host and its CDN).
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    credential_name: String,
    secret: String,
    requests_total: AtomicU64,
    errors_total: AtomicU64,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, credential_name: impl Into<String>, secret: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(300))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client builder should not fail with static config");

        Self {
            http,
            base_url: base_url.into(),
            credential_name: credential_name.into(),
            secret: secret.into(),
            requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
        }
    }

    pub fn credential_name(&self) -> &str {
        &self.credential_name
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn errors_total(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    /// Fraction of requests that ended in a transport or remote error, in
    /// `[0, 1]`. `0.0` if no requests have been made yet.
    pub fn error_rate(&self) -> f64 {
        let total = self.requests_total();
        if total == 0 {
            0.0
        } else {
            self.errors_total() as f64 / total as f64
        }
    }

    pub async fn fetch_wall_posts(
        &self,
        owner_id: i64,
        count: u32,
        offset: u32,
    ) -> Result<Vec<RemotePost>, UpstreamError> {
        let count = count.min(100);
        let params = [
            ("owner_id", owner_id.to_string()),
            ("count", count.to_string()),
            ("offset", offset.to_string()),
        ];
        with_retry(|| self.get::<Vec<RemotePost>>("wall.get", &params)).await
    }

    pub async fn fetch_post(&self, owner_id: i64, post_id: i64) -> Result<RemotePost, UpstreamError> {
        let params = [
            ("owner_id", owner_id.to_string()),
            ("post_id", post_id.to_string()),
        ];
        with_retry(|| self.get::<RemotePost>("wall.getById", &params)).await
    }

    pub async fn fetch_group_info(&self, group_id: i64) -> Result<GroupInfo, UpstreamError> {
        let params = [("group_id", group_id.to_string())];
        with_retry(|| self.get::<GroupInfo>("groups.getById", &params)).await
    }

    pub async fn fetch_groups_batch(&self, group_ids: &[i64]) -> Result<Vec<GroupInfo>, UpstreamError> {
        let ids = group_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
        let params = [("group_ids", ids)];
        with_retry(|| self.get::<Vec<GroupInfo>>("groups.getById", &params)).await
    }

    pub async fn validate_credential(&self) -> Result<CredentialInfo, UpstreamError> {
        with_retry(|| self.get::<CredentialInfo>("users.get", &[])).await
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let url = format!("{}/{}", self.base_url, method);
        let mut query: Vec<(&str, String)> = vec![
            ("access_token", self.secret.clone()),
            ("v", API_VERSION.to_string()),
        ];
        query.extend(params.iter().cloned());

        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let result = self.get_inner::<T>(&url, &query).await;
        if result.is_err() {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn get_inner<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let response = self.http.get(url).query(query).send().await?;
        let body: Envelope<T> = response.json().await?;

        match body {
            Envelope::Ok { response } => Ok(response),
            Envelope::Err { error } => Err(classify_remote_error(error)),
        }
    }
}

fn classify_remote_error(error: RemoteError) -> UpstreamError {
    match error.error_code {
        // Upstream-specific codes meaning "rate limit exceeded".
        6 | 9 => UpstreamError::RateLimited { retry_after_secs: 1 },
        // Upstream-specific codes meaning "auth failed" / "token revoked".
        5 | 27 | 28 => UpstreamError::Auth { message: error.error_msg },
        _ => UpstreamError::Remote(format!("[{}] {}", error.error_code, error.error_msg)),
    }
}

/// Retries on rate-limit and transport errors; auth and remote-decoding
/// errors propagate immediately since retrying them can't help.
async fn with_retry<F, Fut, T>(operation: F) -> Result<T, UpstreamError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(UpstreamError::RateLimited { retry_after_secs }) => {
                info!(retry_after_secs, "upstream rate limited, waiting before retry");
                tokio::time::sleep(Duration::from_secs(retry_after_secs.max(1))).await;
                // Rate-limit waits don't count against the transport retry budget.
            }
            Err(UpstreamError::Transport(err)) if attempt < MAX_TRANSPORT_RETRIES => {
                attempt += 1;
                let backoff = BASE_BACKOFF.saturating_mul(1 << attempt).min(MAX_BACKOFF);
                warn!(attempt, backoff_secs = backoff.as_secs(), %err, "transport error, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_codes() {
        let err = classify_remote_error(RemoteError { error_code: 6, error_msg: "Too many requests".into() });
        assert!(matches!(err, UpstreamError::RateLimited { .. }));
    }

    #[test]
    fn classifies_auth_codes() {
        let err = classify_remote_error(RemoteError { error_code: 5, error_msg: "invalid token".into() });
        assert!(matches!(err, UpstreamError::Auth { .. }));
    }

    #[test]
    fn classifies_unknown_codes_as_remote() {
        let err = classify_remote_error(RemoteError { error_code: 100, error_msg: "bad param".into() });
        assert!(matches!(err, UpstreamError::Remote(_)));
    }

    #[tokio::test]
    async fn with_retry_returns_immediately_on_success() {
        let result: Result<i32, UpstreamError> = with_retry(|| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn with_retry_propagates_auth_errors_without_retry() {
        let result: Result<i32, UpstreamError> =
            with_retry(|| async { Err(UpstreamError::Auth { message: "nope".into() }) }).await;
        assert!(matches!(result, Err(UpstreamError::Auth { .. })));
    }

    #[test]
    fn error_rate_is_zero_before_any_requests() {
        let client = UpstreamClient::new("https://example.invalid", "cred-a", "secret");
        assert_eq!(client.error_rate(), 0.0);
        assert_eq!(client.requests_total(), 0);
    }
}
