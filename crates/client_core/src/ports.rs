use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use shared::{
    domain::{Message, MessageKind, Room, RoomId, UserId},
    error::ChatError,
};

/// Batches emitted by the live subscription. An `Err` item surfaces a
/// subscription failure without tearing down history already merged.
pub type LiveMessages = BoxStream<'static, Result<Vec<Message>, ChatError>>;

/// The "member left" payload attached to a system message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeftUser {
    pub user_id: UserId,
    pub nickname: String,
}

/// Device-local message cache. Write-back of newly observed messages and
/// read-cursor updates is the caller's responsibility, not the engine's.
#[async_trait]
pub trait MessageCache: Send + Sync {
    async fn load(&self, room_id: &RoomId) -> Result<Vec<Message>, ChatError>;
}

/// Remote room/message repository. Server-side transactions are atomic and
/// opaque; `create_and_send` variants create the room together with its
/// first message in one call.
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// `Ok(None)` means the room was never created, which is a valid
    /// outcome, not an error.
    async fn resolve_room(
        &self,
        room_id: &RoomId,
        member_id: &UserId,
        counterpart_id: Option<&UserId>,
    ) -> Result<Option<Room>, ChatError>;

    async fn create_and_send(
        &self,
        room_id: &RoomId,
        member_ids: &[UserId],
        sender_id: &UserId,
        content: &str,
    ) -> Result<(), ChatError>;

    async fn create_group_and_send(
        &self,
        room_id: &RoomId,
        member_ids: &[UserId],
        sender_id: &UserId,
        content: &str,
    ) -> Result<(), ChatError>;

    async fn rejoin(&self, room_id: &RoomId, member_id: &UserId) -> Result<(), ChatError>;

    async fn send(
        &self,
        room_id: &RoomId,
        sender_id: &UserId,
        content: &str,
    ) -> Result<(), ChatError>;

    async fn send_media(
        &self,
        room_id: &RoomId,
        sender_id: &UserId,
        kind: MessageKind,
        urls: &[String],
    ) -> Result<(), ChatError>;

    /// Messages strictly older than `before`, at most `limit`.
    async fn fetch_older(
        &self,
        room_id: &RoomId,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, ChatError>;

    /// Messages strictly newer than `after`, at most `limit`.
    async fn fetch_newer(
        &self,
        room_id: &RoomId,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, ChatError>;

    async fn observe_live(&self, room_id: &RoomId) -> Result<LiveMessages, ChatError>;

    async fn invite(&self, room_id: &RoomId, member_ids: &[UserId]) -> Result<(), ChatError>;

    async fn send_system_message(
        &self,
        room_id: &RoomId,
        content: &str,
        left_user: Option<LeftUser>,
    ) -> Result<(), ChatError>;
}
