//! Durable request/response API
//!
//! The persistence store is the source of truth for messages, rooms and
//! groups. Every failure is reported as a classified [`ApiError`] so the
//! dispatch engine can pick the matching retry policy.

pub mod http;

use async_trait::async_trait;

use huddle_core::{
    ApiError, GroupId, GroupRecord, GroupUpdate, MessageDraft, MessageRecord, NewGroup, Page,
    RoomId, RoomSummaryRecord, UserId,
};

pub use http::HttpDurableApi;

pub type ApiResult<T> = core::result::Result<T, ApiError>;

/// Client of the durable store
#[async_trait]
pub trait DurableApi: Send + Sync + 'static {
    /// Create or fetch the private room shared by two users
    async fn create_private_room(&self, user_a: &UserId, user_b: &UserId) -> ApiResult<RoomId>;

    /// Private rooms of `user`
    async fn list_rooms(&self, user: &UserId) -> ApiResult<Vec<RoomSummaryRecord>>;

    /// One history page of a room, newest first
    async fn list_messages(&self, room: &RoomId, page: Page) -> ApiResult<Vec<MessageRecord>>;

    /// Persist a message in a private room
    async fn create_message(&self, draft: &MessageDraft) -> ApiResult<MessageRecord>;

    /// Groups `member` belongs to
    async fn list_groups(&self, member: &UserId) -> ApiResult<Vec<GroupRecord>>;

    async fn create_group(&self, group: &NewGroup) -> ApiResult<GroupRecord>;

    async fn update_group(&self, group: &GroupId, update: &GroupUpdate) -> ApiResult<GroupRecord>;

    async fn delete_group(&self, group: &GroupId) -> ApiResult<()>;

    /// One history page of a group, newest first
    async fn list_group_messages(
        &self,
        group: &GroupId,
        page: Page,
    ) -> ApiResult<Vec<MessageRecord>>;

    /// Persist a message in a group
    async fn create_group_message(
        &self,
        group: &GroupId,
        draft: &MessageDraft,
    ) -> ApiResult<MessageRecord>;

    async fn add_member(&self, group: &GroupId, user: &UserId) -> ApiResult<()>;

    async fn remove_member(&self, group: &GroupId, user: &UserId) -> ApiResult<()>;

    /// Record that `user` has read `room`
    async fn mark_read(&self, room: &RoomId, user: &UserId) -> ApiResult<()>;
}
