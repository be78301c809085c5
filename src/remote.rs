//! X API client
//!
//! The delivery side of the system talks to the outside world through the
//! [`RemoteService`] trait so the orchestrator can be exercised against mocks.
//! `XApiClient` is the production implementation over the X v2 API.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{RemoteError, RemoteErrorKind};

const X_API_URL: &str = "https://api.x.com/2";

/// Remote fetch/deliver contract.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Fetch the text of a post. `Ok(None)` means the post exists but has no
    /// readable text.
    async fn fetch(&self, post_id: &str) -> Result<Option<String>, RemoteError>;

    /// Deliver one reply to a post.
    async fn deliver(&self, post_id: &str, text: &str) -> Result<(), RemoteError>;

    /// Rebuild the underlying connection after an auth failure.
    async fn reconnect(&self) -> Result<(), RemoteError>;
}

/// X v2 API client.
pub struct XApiClient {
    /// Rebuilt on `reconnect`, hence the mutex.
    client: Mutex<Client>,
    bearer_token: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct TweetResponse {
    data: Option<TweetData>,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateTweetRequest<'a> {
    text: &'a str,
    reply: ReplyTarget<'a>,
}

#[derive(Debug, Serialize)]
struct ReplyTarget<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateTweetResponse {
    data: Option<serde_json::Value>,
}

impl XApiClient {
    pub fn new(bearer_token: String, access_token: String) -> Self {
        Self {
            client: Mutex::new(Client::new()),
            bearer_token,
            access_token,
        }
    }

    fn http(&self) -> Client {
        self.client.lock().clone()
    }

    /// Map a non-success HTTP response into a structured error. The only
    /// text inspection in the whole pipeline happens here, where the wire
    /// gives us nothing better: X reports duplicate content as a 403.
    async fn error_from_response(response: reqwest::Response) -> RemoteError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        let detail = if body.is_empty() {
            status.to_string()
        } else {
            body.chars().take(200).collect()
        };

        let mut error = match status {
            StatusCode::TOO_MANY_REQUESTS => RemoteError::rate_limited(detail),
            StatusCode::UNAUTHORIZED => RemoteError::auth(detail),
            StatusCode::FORBIDDEN => {
                if body.to_lowercase().contains("duplicate") {
                    RemoteError::duplicate(detail)
                } else {
                    RemoteError::forbidden(detail)
                }
            }
            s if s.is_server_error() => RemoteError::server(s.as_u16(), detail),
            s => RemoteError::new(RemoteErrorKind::Other, Some(s.as_u16()), detail),
        };
        if let Some(secs) = retry_after {
            error = error.with_retry_after(secs);
        }
        error
    }

    fn transport_error(err: reqwest::Error) -> RemoteError {
        RemoteError::network(err.to_string())
    }
}

#[async_trait]
impl RemoteService for XApiClient {
    async fn fetch(&self, post_id: &str) -> Result<Option<String>, RemoteError> {
        debug!("Fetching post {}", post_id);

        let response = self
            .http()
            .get(format!("{}/tweets/{}", X_API_URL, post_id))
            .bearer_auth(&self.bearer_token)
            .query(&[("tweet.fields", "author_id,created_at,text")])
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let parsed: TweetResponse = response.json().await.map_err(Self::transport_error)?;
        Ok(parsed.data.and_then(|d| d.text))
    }

    async fn deliver(&self, post_id: &str, text: &str) -> Result<(), RemoteError> {
        debug!("Posting reply to {}", post_id);

        let request = CreateTweetRequest {
            text,
            reply: ReplyTarget {
                in_reply_to_tweet_id: post_id,
            },
        };

        let response = self
            .http()
            .post(format!("{}/tweets", X_API_URL))
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            let error = Self::error_from_response(response).await;
            warn!("Deliver failed for {}: {}", post_id, error);
            return Err(error);
        }

        let parsed: CreateTweetResponse = response.json().await.map_err(Self::transport_error)?;
        if parsed.data.is_none() {
            return Err(RemoteError::other("create response carried no data"));
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), RemoteError> {
        info!("Rebuilding X API connection");
        *self.client.lock() = Client::new();
        Ok(())
    }
}
