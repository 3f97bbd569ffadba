//! HTTP implementation of the durable API
//!
//! Failures are classified from the transport error or the response status
//! and structured error body, never from message text:
//!
//! | Failure                                         | Class              |
//! |-------------------------------------------------|--------------------|
//! | connect, timeout, request build/send            | `TransientNetwork` |
//! | 409, or body `code` of a duplicate-key race     | `WriteConflict`    |
//! | other 5xx                                       | `Server`           |
//! | other 4xx                                       | `Rejected`         |
//! | success with an undecodable body                | `Decode`           |

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use huddle_core::{
    ApiConfig, ApiError, GroupId, GroupRecord, GroupUpdate, HuddleError, HuddleResult,
    MessageDraft, MessageRecord, NewGroup, Page, RoomId, RoomSummaryRecord, UserId,
};

use super::{ApiResult, DurableApi};

/// Structured error codes reported for write races
const CONFLICT_CODES: &[&str] = &["write_conflict", "duplicate_key"];

// ----------------------------------------------------------------------------
// Wire Bodies
// ----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct PrivateRoomRequest<'a> {
    user_a: &'a UserId,
    user_b: &'a UserId,
}

#[derive(Debug, Deserialize)]
struct CreatedRoom {
    id: RoomId,
}

#[derive(Debug, Serialize)]
struct ReadReceipt<'a> {
    user: &'a UserId,
}

/// Classify a non-success response
pub fn classify_response(status: StatusCode, body: &str) -> ApiError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.error)
        .unwrap_or_else(|| body.trim().to_string());

    let conflict_code = parsed
        .code
        .as_deref()
        .is_some_and(|code| CONFLICT_CODES.contains(&code));

    if status == StatusCode::CONFLICT || conflict_code {
        ApiError::conflict(message)
    } else if status.is_server_error() {
        ApiError::server(status.as_u16(), message)
    } else {
        ApiError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

// ----------------------------------------------------------------------------
// HTTP Client
// ----------------------------------------------------------------------------

/// `reqwest` client of the REST surface, authenticated with a bearer token
#[derive(Debug, Clone)]
pub struct HttpDurableApi {
    client: Client,
    base: Url,
    credential: String,
}

impl HttpDurableApi {
    pub fn new(config: &ApiConfig, credential: impl Into<String>) -> HuddleResult<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            HuddleError::config_error(format!("invalid api.base_url '{}': {}", config.base_url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(HuddleError::config_error(format!(
                "api.base_url '{}' cannot carry a path",
                config.base_url
            )));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| HuddleError::config_error(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base,
            credential: credential.into(),
        })
    }

    fn url(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::network("base url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute(&self, request: RequestBuilder) -> ApiResult<Response> {
        let response = request
            .bearer_auth(&self.credential)
            .send()
            .await
            .map_err(|e| ApiError::network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let error = classify_response(status, &body);
        warn!("Request failed with {}: {}", status, error);
        Err(error)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = self.execute(request).await?;
        let bytes = response.bytes().await.map_err(|e| ApiError::Decode {
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode {
            reason: e.to_string(),
        })
    }

    fn page_query(page: Page) -> [(&'static str, u32); 2] {
        [("page", page.index), ("limit", page.size)]
    }
}

#[async_trait]
impl DurableApi for HttpDurableApi {
    async fn create_private_room(&self, user_a: &UserId, user_b: &UserId) -> ApiResult<RoomId> {
        let url = self.url(&["rooms", "private"])?;
        let created: CreatedRoom = self
            .fetch(self.client.post(url).json(&PrivateRoomRequest { user_a, user_b }))
            .await?;
        debug!("Private room {} for {} and {}", created.id, user_a, user_b);
        Ok(created.id)
    }

    async fn list_rooms(&self, user: &UserId) -> ApiResult<Vec<RoomSummaryRecord>> {
        let url = self.url(&["rooms"])?;
        self.fetch(self.client.get(url).query(&[("user", user.as_str())]))
            .await
    }

    async fn list_messages(&self, room: &RoomId, page: Page) -> ApiResult<Vec<MessageRecord>> {
        let url = self.url(&["rooms", room.as_str(), "messages"])?;
        self.fetch(self.client.get(url).query(&Self::page_query(page)[..]))
            .await
    }

    async fn create_message(&self, draft: &MessageDraft) -> ApiResult<MessageRecord> {
        let url = self.url(&["rooms", draft.room.as_str(), "messages"])?;
        self.fetch(self.client.post(url).json(draft)).await
    }

    async fn list_groups(&self, member: &UserId) -> ApiResult<Vec<GroupRecord>> {
        let url = self.url(&["groups"])?;
        self.fetch(self.client.get(url).query(&[("member", member.as_str())]))
            .await
    }

    async fn create_group(&self, group: &NewGroup) -> ApiResult<GroupRecord> {
        let url = self.url(&["groups"])?;
        self.fetch(self.client.post(url).json(group)).await
    }

    async fn update_group(&self, group: &GroupId, update: &GroupUpdate) -> ApiResult<GroupRecord> {
        let url = self.url(&["groups", group.as_str()])?;
        self.fetch(self.client.patch(url).json(update)).await
    }

    async fn delete_group(&self, group: &GroupId) -> ApiResult<()> {
        let url = self.url(&["groups", group.as_str()])?;
        self.execute(self.client.delete(url)).await.map(|_| ())
    }

    async fn list_group_messages(
        &self,
        group: &GroupId,
        page: Page,
    ) -> ApiResult<Vec<MessageRecord>> {
        let url = self.url(&["groups", group.as_str(), "messages"])?;
        self.fetch(self.client.get(url).query(&Self::page_query(page)[..]))
            .await
    }

    async fn create_group_message(
        &self,
        group: &GroupId,
        draft: &MessageDraft,
    ) -> ApiResult<MessageRecord> {
        let url = self.url(&["groups", group.as_str(), "messages"])?;
        self.fetch(self.client.post(url).json(draft)).await
    }

    async fn add_member(&self, group: &GroupId, user: &UserId) -> ApiResult<()> {
        let url = self.url(&["groups", group.as_str(), "members", user.as_str()])?;
        self.execute(self.client.put(url)).await.map(|_| ())
    }

    async fn remove_member(&self, group: &GroupId, user: &UserId) -> ApiResult<()> {
        let url = self.url(&["groups", group.as_str(), "members", user.as_str()])?;
        self.execute(self.client.delete(url)).await.map(|_| ())
    }

    async fn mark_read(&self, room: &RoomId, user: &UserId) -> ApiResult<()> {
        let url = self.url(&["rooms", room.as_str(), "read"])?;
        self.execute(self.client.post(url).json(&ReadReceipt { user }))
            .await
            .map(|_| ())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
