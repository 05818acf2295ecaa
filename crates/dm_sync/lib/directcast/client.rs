use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use herocast_core::models::{
    ApiErrorBody, ConversationCategory, ConversationListResult, GroupListResult,
    MessageListResult, Paginated, SendMessageResult,
};
use herocast_core::segmenter::MAX_MESSAGE_LENGTH;
use nonzero_ext::nonzero;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{log_transport_diagnostics, DirectCastError};
use crate::credentials::CredentialStore;

pub const DEFAULT_API_URL: &str = "https://api.farcaster.xyz";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(19);
pub const DEFAULT_PAGE_LIMIT: u32 = 25;
pub const MAX_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_REQUESTS_PER_MINUTE: NonZeroU32 = nonzero!(120u32);

const CONVERSATION_LIST: &str = "/fc/conversation-list";
const GROUP_LIST: &str = "/fc/group-list";
const MESSAGE_LIST: &str = "/fc/message-list";
const MESSAGE: &str = "/fc/message";

/// Process-wide request budget shared by every DirectCast call, retries included.
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

pub fn build_rate_limiter(requests_per_minute: NonZeroU32) -> GlobalRateLimiter {
    Arc::new(RateLimiter::direct(Quota::per_minute(requests_per_minute)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub base_url: String,
    pub account_id: String,
    pub requests_per_minute: NonZeroU32,
    pub timeout: Duration,
}

impl ClientSettings {
    pub fn new(base_url: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            account_id: account_id.into(),
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            timeout: REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub category: Option<ConversationCategory>,
    pub cursor: Option<String>,
    pub limit: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            category: None,
            cursor: None,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl ListQuery {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("limit", self.limit.clamp(1, MAX_PAGE_LIMIT).to_string())];
        if let Some(category) = self.category {
            pairs.push(("category", category.to_string()));
        }
        if let Some(cursor) = &self.cursor {
            pairs.push(("cursor", cursor.clone()));
        }
        pairs
    }
}

/// Thread a message list or send call is aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageTarget {
    Conversation(String),
    Group(String),
}

impl MessageTarget {
    fn query_key(&self) -> &'static str {
        match self {
            Self::Conversation(_) => "conversationId",
            Self::Group(_) => "groupId",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Conversation(id) | Self::Group(id) => id,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Conversation(id) => format!("conversation:{id}"),
            Self::Group(id) => format!("group:{id}"),
        }
    }
}

/// Body of `PUT /fc/message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to_message_id: Option<String>,
    /// Sent as the `idempotency-key` header so a retried send is delivered once.
    #[serde(skip)]
    pub idempotency_key: String,
}

impl SendMessage {
    pub fn new(target: &MessageTarget, message: impl Into<String>) -> Self {
        let (conversation_id, group_id) = match target {
            MessageTarget::Conversation(id) => (Some(id.clone()), None),
            MessageTarget::Group(id) => (None, Some(id.clone())),
        };
        Self {
            conversation_id,
            group_id,
            message: message.into(),
            in_reply_to_message_id: None,
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }

    pub fn in_reply_to(self, message_id: impl Into<String>) -> Self {
        Self {
            in_reply_to_message_id: Some(message_id.into()),
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), DirectCastError> {
        if self.conversation_id.is_none() && self.group_id.is_none() {
            return Err(DirectCastError::InvalidRequest(
                "either a conversation or a group id must be provided".to_string(),
            ));
        }
        if self.message.trim().is_empty() {
            return Err(DirectCastError::InvalidRequest(
                "message must not be empty".to_string(),
            ));
        }
        let length = self.message.chars().count();
        if length > MAX_MESSAGE_LENGTH {
            return Err(DirectCastError::InvalidRequest(format!(
                "message is {length} characters, maximum is {MAX_MESSAGE_LENGTH}"
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct SendEnvelope {
    #[serde(default)]
    result: Option<SendMessageResult>,
}

/// Bearer-authenticated DirectCast REST client for one account.
pub struct DirectCastClient {
    http: reqwest::Client,
    base_url: String,
    account_id: String,
    credentials: CredentialStore,
    rate_limiter: GlobalRateLimiter,
}

impl DirectCastClient {
    pub fn new(
        settings: ClientSettings,
        credentials: CredentialStore,
    ) -> Result<Self, DirectCastError> {
        let rate_limiter = build_rate_limiter(settings.requests_per_minute);
        Self::with_rate_limiter(settings, credentials, rate_limiter)
    }

    /// Builds a client that draws from an existing budget, so several accounts share one limit.
    pub fn with_rate_limiter(
        settings: ClientSettings,
        credentials: CredentialStore,
        rate_limiter: GlobalRateLimiter,
    ) -> Result<Self, DirectCastError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("dm_sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            account_id: settings.account_id,
            credentials,
            rate_limiter,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub async fn conversation_list(
        &self,
        query: &ListQuery,
    ) -> Result<Paginated<ConversationListResult>, DirectCastError> {
        let request = self.http.get(self.url(CONVERSATION_LIST)).query(&query.pairs());
        self.execute(CONVERSATION_LIST, request).await
    }

    pub async fn group_list(
        &self,
        query: &ListQuery,
    ) -> Result<Paginated<GroupListResult>, DirectCastError> {
        let request = self.http.get(self.url(GROUP_LIST)).query(&query.pairs());
        self.execute(GROUP_LIST, request).await
    }

    pub async fn message_list(
        &self,
        target: &MessageTarget,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Paginated<MessageListResult>, DirectCastError> {
        let mut pairs = vec![
            (target.query_key(), target.id().to_string()),
            ("limit", limit.clamp(1, MAX_PAGE_LIMIT).to_string()),
        ];
        if let Some(cursor) = cursor {
            pairs.push(("cursor", cursor.to_string()));
        }
        let request = self.http.get(self.url(MESSAGE_LIST)).query(&pairs);
        self.execute(MESSAGE_LIST, request).await
    }

    /// Sends one message. Callers that retry must reuse the same `SendMessage` so the
    /// idempotency key stays stable.
    pub async fn send_message(
        &self,
        message: &SendMessage,
    ) -> Result<SendMessageResult, DirectCastError> {
        message.validate()?;
        let request = self
            .http
            .request(Method::PUT, self.url(MESSAGE))
            .header("idempotency-key", message.idempotency_key.as_str())
            .json(message);
        let envelope: SendEnvelope = self.execute(MESSAGE, request).await?;
        Ok(envelope.result.unwrap_or_default())
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<T, DirectCastError> {
        let api_key =
            self.credentials
                .get(&self.account_id)
                .ok_or_else(|| DirectCastError::MissingApiKey {
                    account_id: self.account_id.clone(),
                })?;

        self.rate_limiter.until_ready().await;

        let response = request
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|err| {
                log_transport_diagnostics(endpoint, &err);
                DirectCastError::Transport(err)
            })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|err| {
                log_transport_diagnostics(endpoint, &err);
                DirectCastError::Transport(err)
            });
        }

        let header_retry_after = parse_retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();
        let error = api_error(status.as_u16(), &body, header_retry_after);
        tracing::debug!(
            event = "directcast_api_error",
            endpoint,
            status = status.as_u16(),
            error = %error,
            "DirectCast returned an error response"
        );
        Err(error)
    }
}

/// Builds `DirectCastError::Api` from a non-2xx response body.
///
/// The body's `retryAfter` (milliseconds) is used only when the `Retry-After` header is absent.
fn api_error(status: u16, body: &str, header_retry_after: Option<Duration>) -> DirectCastError {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .best_message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("API request failed with status {status}"));
    DirectCastError::Api {
        status,
        message,
        code: parsed.code.clone(),
        retry_after: header_retry_after.or(parsed.retry_after.map(Duration::from_millis)),
    }
}

/// Reads a delta-seconds `Retry-After`. HTTP-date values are ignored.
fn parse_retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn error_body_message_and_code_are_extracted() {
        let error = api_error(
            429,
            r#"{"error":"Rate limited","code":"RATE_LIMITED","retryAfter":1500}"#,
            None,
        );
        match error {
            DirectCastError::Api {
                status,
                message,
                code,
                retry_after,
            } => {
                assert_eq!(status, 429);
                assert_eq!(message, "Rate limited");
                assert_eq!(code.as_deref(), Some("RATE_LIMITED"));
                assert_eq!(retry_after, Some(Duration::from_millis(1500)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn header_retry_after_wins_over_body() {
        let error = api_error(
            429,
            r#"{"retryAfter":1500}"#,
            Some(Duration::from_secs(4)),
        );
        assert!(matches!(
            error,
            DirectCastError::Api { retry_after: Some(wait), .. } if wait == Duration::from_secs(4)
        ));
    }

    #[test]
    fn non_json_body_falls_back_to_status_message() {
        let error = api_error(502, "<html>Bad Gateway</html>", None);
        assert_eq!(
            error.to_string(),
            "DirectCast returned HTTP 502: API request failed with status 502"
        );
    }

    #[test]
    fn retry_after_header_parses_delta_seconds_only() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(
            parse_retry_after_header(&headers),
            Some(Duration::from_secs(12))
        );

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after_header(&headers), None);
    }

    #[test]
    fn send_message_validation() {
        let target = MessageTarget::Conversation("1-2".to_string());
        assert!(SendMessage::new(&target, "gm").validate().is_ok());
        assert!(SendMessage::new(&target, "   ").validate().is_err());
        assert!(SendMessage::new(&target, "é".repeat(MAX_MESSAGE_LENGTH))
            .validate()
            .is_ok());
        assert!(SendMessage::new(&target, "x".repeat(MAX_MESSAGE_LENGTH + 1))
            .validate()
            .is_err());
    }

    #[test]
    fn send_message_serializes_target_and_skips_key() {
        let message = SendMessage::new(&MessageTarget::Group("g1".to_string()), "hello")
            .in_reply_to("m0");
        let body = serde_json::to_value(&message).expect("serializable");

        assert_eq!(
            body,
            serde_json::json!({ "groupId": "g1", "message": "hello", "inReplyToMessageId": "m0" })
        );
        assert_eq!(message.idempotency_key.len(), 36);
    }

    #[test]
    fn list_query_clamps_limit() {
        let query = ListQuery {
            category: Some(ConversationCategory::Request),
            cursor: Some("abc".to_string()),
            limit: 500,
        };
        assert_eq!(
            query.pairs(),
            vec![
                ("limit", "100".to_string()),
                ("category", "request".to_string()),
                ("cursor", "abc".to_string()),
            ]
        );
    }
}
