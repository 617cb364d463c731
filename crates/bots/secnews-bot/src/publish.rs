use std::fmt;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::USER_AGENT;
use crate::compose::truncate_chars;
use crate::timestamp::Timestamp;

const LOG_TARGET: &str = "secnews_bot::publish";

pub const DEFAULT_X_API_BASE: &str = "https://api.x.com";
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);
pub const HISTORY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PublishError {
    #[snafu(display("Rate limited by the platform"))]
    RateLimited { reset_at: Option<Timestamp> },
    #[snafu(display("Platform server error ({status})"))]
    Server { status: u16 },
    #[snafu(display("Platform rejected the request ({status}): {detail}"))]
    Rejected { status: u16, detail: String },
    #[snafu(display("Request to the platform failed"))]
    Transport { source: reqwest::Error },
    #[snafu(display("Unexpected response from the platform"))]
    InvalidResponse { source: serde_json::Error },
}

impl PublishError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PublishError::RateLimited { .. })
    }
}

pub type PublishResult<T> = std::result::Result<T, PublishError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostId(pub String);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A post already on the account's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemotePost {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// The social network the bot posts to.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, text: &str) -> PublishResult<PostId>;
}

/// Read access to what the account already posted.
#[async_trait::async_trait]
pub trait PostHistory: Send + Sync {
    /// Most recent posts of the account, newest first, at most `limit`.
    async fn recent_posts(&self, limit: usize) -> PublishResult<Vec<RemotePost>>;
}

/// X API v2 client authenticated with an OAuth 2.0 user access token.
pub struct XClient {
    http: Client,
    base_url: String,
    access_token: String,
    user_id: OnceCell<String>,
}

impl XClient {
    pub fn new(base_url: &str, access_token: impl Into<String>) -> PublishResult<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context(TransportSnafu)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            user_id: OnceCell::new(),
        })
    }

    /// Skip the `users/me` lookup when the account id is known.
    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        if let Some(id) = user_id {
            self.user_id = OnceCell::new_with(Some(id));
        }
        self
    }

    fn request(&self, builder: RequestBuilder, timeout: Duration) -> RequestBuilder {
        builder.bearer_auth(&self.access_token).timeout(timeout)
    }

    async fn send(&self, builder: RequestBuilder) -> PublishResult<String> {
        let response = builder.send().await.context(TransportSnafu)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.context(TransportSnafu)?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(error_for_status(status, &headers, &body))
        }
    }

    async fn user_id(&self) -> PublishResult<&str> {
        let id = self
            .user_id
            .get_or_try_init(|| async {
                let url = format!("{}/2/users/me", self.base_url);
                let body = self
                    .send(self.request(self.http.get(url), HISTORY_TIMEOUT))
                    .await?;
                let me: DataEnvelope<UserData> =
                    serde_json::from_str(&body).context(InvalidResponseSnafu)?;
                debug!(target: LOG_TARGET, user_id = %me.data.id, "Resolved account id");
                Ok::<_, PublishError>(me.data.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait::async_trait]
impl Publisher for XClient {
    async fn publish(&self, text: &str) -> PublishResult<PostId> {
        let url = format!("{}/2/tweets", self.base_url);
        let body = self
            .send(
                self.request(self.http.post(url), PUBLISH_TIMEOUT)
                    .json(&serde_json::json!({ "text": text })),
            )
            .await?;
        let id = parse_created_post(&body)?;
        info!(target: LOG_TARGET, post_id = %id, "Post created");
        Ok(id)
    }
}

#[async_trait::async_trait]
impl PostHistory for XClient {
    async fn recent_posts(&self, limit: usize) -> PublishResult<Vec<RemotePost>> {
        let user_id = self.user_id().await?;
        let url = format!("{}/2/users/{user_id}/tweets", self.base_url);
        // The endpoint only accepts 5..=100
        let max_results = limit.clamp(5, 100).to_string();
        let body = self
            .send(
                self.request(self.http.get(url), HISTORY_TIMEOUT).query(&[
                    ("max_results", max_results.as_str()),
                    ("tweet.fields", "created_at"),
                ]),
            )
            .await?;

        let mut posts = parse_timeline(&body)?;
        posts.truncate(limit);
        Ok(posts)
    }
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct UserData {
    id: String,
}

#[derive(Deserialize)]
struct CreatedPost {
    id: String,
}

#[derive(Deserialize)]
struct Timeline {
    /// Absent when the account has no posts.
    #[serde(default)]
    data: Vec<RemotePost>,
}

#[derive(Deserialize)]
struct ApiProblem {
    detail: Option<String>,
    title: Option<String>,
}

pub fn parse_created_post(body: &str) -> PublishResult<PostId> {
    let created: DataEnvelope<CreatedPost> =
        serde_json::from_str(body).context(InvalidResponseSnafu)?;
    Ok(PostId(created.data.id))
}

pub fn parse_timeline(body: &str) -> PublishResult<Vec<RemotePost>> {
    let timeline: Timeline = serde_json::from_str(body).context(InvalidResponseSnafu)?;
    Ok(timeline.data)
}

/// Map a non-success response to the matching error kind.
pub fn error_for_status(status: StatusCode, headers: &HeaderMap, body: &str) -> PublishError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let reset_at = headers
            .get("x-rate-limit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Timestamp::from);
        return PublishError::RateLimited { reset_at };
    }
    if status.is_server_error() {
        return PublishError::Server {
            status: status.as_u16(),
        };
    }

    let detail = serde_json::from_str::<ApiProblem>(body)
        .ok()
        .and_then(|p| p.detail.or(p.title))
        .unwrap_or_else(|| truncate_chars(body.trim(), 200));
    PublishError::Rejected {
        status: status.as_u16(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn created_post_id_is_extracted() {
        let body = r#"{"data":{"id":"1445880548472328192","text":"hello"}}"#;
        assert_eq!(
            parse_created_post(body).unwrap(),
            PostId("1445880548472328192".into())
        );
        assert!(matches!(
            parse_created_post(r#"{"errors":[]}"#),
            Err(PublishError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn timeline_parses_posts_and_empty_accounts() {
        let body = r#"{
            "data": [
                {"id": "2", "text": "Newest https://t.co/abc", "created_at": "2023-11-14T22:00:00.000Z"},
                {"id": "1", "text": "Older", "edit_history_tweet_ids": ["1"]}
            ],
            "meta": {"result_count": 2}
        }"#;

        let posts = parse_timeline(body).unwrap();

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].text, "Newest https://t.co/abc");
        assert_eq!(posts[0].created_at.as_deref(), Some("2023-11-14T22:00:00.000Z"));
        assert_eq!(posts[1].created_at, None);

        assert!(parse_timeline(r#"{"meta":{"result_count":0}}"#).unwrap().is_empty());
    }

    #[test]
    fn too_many_requests_is_rate_limited_with_reset() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-reset", HeaderValue::from_static("1700000900"));

        let err = error_for_status(StatusCode::TOO_MANY_REQUESTS, &headers, "");

        assert!(err.is_rate_limited());
        assert!(matches!(
            err,
            PublishError::RateLimited { reset_at: Some(t) } if t == Timestamp::from(1_700_000_900)
        ));
    }

    #[test]
    fn server_and_client_errors_are_not_rate_limits() {
        let headers = HeaderMap::new();

        let server = error_for_status(StatusCode::BAD_GATEWAY, &headers, "oops");
        assert!(matches!(server, PublishError::Server { status: 502 }));
        assert!(!server.is_rate_limited());

        let rejected = error_for_status(
            StatusCode::FORBIDDEN,
            &headers,
            r#"{"title":"Forbidden","detail":"You are not allowed to create a Tweet with duplicate content.","status":403}"#,
        );
        match rejected {
            PublishError::Rejected { status, detail } => {
                assert_eq!(status, 403);
                assert!(detail.contains("duplicate content"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
