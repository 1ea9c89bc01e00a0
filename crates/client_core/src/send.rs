use std::sync::Arc;

use shared::{
    domain::{MessageKind, RoomKind, UserId},
    error::ChatError,
};
use tracing::info;

use crate::{InFlight, RoomSyncEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn message_kind(self) -> MessageKind {
        match self {
            MediaKind::Image => MessageKind::Image,
            MediaKind::Video => MessageKind::Video,
        }
    }
}

/// One completed upload out of a concurrently-uploaded media batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub kind: MediaKind,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingPayload {
    Text(String),
    Media(Vec<MediaUpload>),
}

/// A message about to be handed to the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMedia {
    pub kind: MessageKind,
    pub urls: Vec<String>,
}

/// Batch composition rule: all images coalesce into a single message
/// carrying every image URL in upload order, while each video becomes its
/// own message. Output order follows the position of each item's first
/// occurrence of its type in the batch. Independent of send routing.
pub fn compose_media_messages(batch: &[MediaUpload]) -> Vec<OutgoingMedia> {
    let mut positioned: Vec<(usize, OutgoingMedia)> = Vec::new();
    let mut image_slot: Option<usize> = None;

    for (position, upload) in batch.iter().enumerate() {
        match upload.kind {
            MediaKind::Image => match image_slot {
                Some(slot) => positioned[slot].1.urls.push(upload.url.clone()),
                None => {
                    image_slot = Some(positioned.len());
                    positioned.push((
                        position,
                        OutgoingMedia {
                            kind: MessageKind::Image,
                            urls: vec![upload.url.clone()],
                        },
                    ));
                }
            },
            MediaKind::Video => {
                positioned.push((
                    position,
                    OutgoingMedia {
                        kind: MessageKind::Video,
                        urls: vec![upload.url.clone()],
                    },
                ));
            }
        }
    }

    positioned.sort_by_key(|(position, _)| *position);
    positioned.into_iter().map(|(_, media)| media).collect()
}

/// Which repository operation an outgoing payload routes to, decided from
/// the current sync state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SendRoute {
    CreateDirect,
    CreateGroup(Vec<UserId>),
    RejoinThenSend,
    Direct,
}

/// Routes an outgoing message or media batch to the correct repository
/// operation: lazy room creation for a room that does not exist yet,
/// rejoin-before-send for a room the member left, plain send otherwise.
pub struct SendCoordinator {
    engine: Arc<RoomSyncEngine>,
}

impl SendCoordinator {
    pub fn new(engine: Arc<RoomSyncEngine>) -> Self {
        Self { engine }
    }

    pub async fn send(&self, payload: OutgoingPayload) -> Result<(), ChatError> {
        let route = {
            let mut state = self.engine.inner.lock().await;
            if state.sending {
                return Err(ChatError::Conflict("a send is already in flight".into()));
            }
            state.sending = true;

            if state.room.is_none() {
                match self.engine.kind() {
                    RoomKind::Direct => SendRoute::CreateDirect,
                    RoomKind::Group => match state.pending_creation_members.clone() {
                        Some(members) => SendRoute::CreateGroup(members),
                        None => {
                            state.sending = false;
                            return Err(ChatError::Conflict(
                                "group room missing and no creation members were provided".into(),
                            ));
                        }
                    },
                }
            } else if state.needs_rejoin {
                SendRoute::RejoinThenSend
            } else {
                SendRoute::Direct
            }
        };

        let result = self.run_route(route, payload).await;
        match result {
            Ok(()) => {
                let mut state = self.engine.inner.lock().await;
                state.sending = false;
                Ok(())
            }
            Err(err) => {
                // State is otherwise untouched so a retry reuses the same
                // route (a failed lazy create keeps its creation members).
                self.engine.fail_step("send", &err, InFlight::Sending).await;
                Err(err)
            }
        }
    }

    async fn run_route(&self, route: SendRoute, payload: OutgoingPayload) -> Result<(), ChatError> {
        let repo = Arc::clone(self.engine.repo());
        let room_id = self.engine.room_id().clone();
        let sender_id = self.engine.member_id().clone();

        match route {
            SendRoute::CreateDirect => {
                let counterpart = self
                    .engine
                    .counterpart_id()
                    .cloned()
                    .ok_or_else(|| {
                        ChatError::Conflict("direct room requires a counterpart id".into())
                    })?;
                let members = vec![sender_id.clone(), counterpart];
                info!(room_id = %room_id, "send: lazy direct room creation");
                match &payload {
                    OutgoingPayload::Text(content) => {
                        repo.create_and_send(&room_id, &members, &sender_id, content)
                            .await?;
                    }
                    OutgoingPayload::Media(_) => {
                        // The atomic create call only carries text; the
                        // composed media messages follow immediately.
                        repo.create_and_send(&room_id, &members, &sender_id, "")
                            .await?;
                        self.deliver(&payload).await?;
                    }
                }
                self.engine.record_created_room(&members).await;
                self.engine.enter_live().await?;
                Ok(())
            }
            SendRoute::CreateGroup(members) => {
                info!(room_id = %room_id, members = members.len(), "send: lazy group room creation");
                match &payload {
                    OutgoingPayload::Text(content) => {
                        repo.create_group_and_send(&room_id, &members, &sender_id, content)
                            .await?;
                    }
                    OutgoingPayload::Media(_) => {
                        repo.create_group_and_send(&room_id, &members, &sender_id, "")
                            .await?;
                        self.deliver(&payload).await?;
                    }
                }
                self.engine.record_created_room(&members).await;
                self.engine.enter_live().await?;
                Ok(())
            }
            SendRoute::RejoinThenSend => {
                info!(room_id = %room_id, "send: rejoin before send");
                repo.rejoin(&room_id, &sender_id).await?;
                {
                    let mut state = self.engine.inner.lock().await;
                    state.needs_rejoin = false;
                }
                self.engine
                    .apply_membership_added(std::slice::from_ref(&sender_id))
                    .await;
                // Cancel-then-resubscribe; a stale subscription from before
                // the leave must not linger.
                self.engine.enter_live().await?;
                self.deliver(&payload).await
            }
            SendRoute::Direct => self.deliver(&payload).await,
        }
    }

    async fn deliver(&self, payload: &OutgoingPayload) -> Result<(), ChatError> {
        let repo = self.engine.repo();
        let room_id = self.engine.room_id();
        let sender_id = self.engine.member_id();

        match payload {
            OutgoingPayload::Text(content) => repo.send(room_id, sender_id, content).await,
            OutgoingPayload::Media(batch) => {
                for media in compose_media_messages(batch) {
                    repo.send_media(room_id, sender_id, media.kind, &media.urls)
                        .await?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/send_tests.rs"]
mod tests;
