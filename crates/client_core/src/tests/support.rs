use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{Message, MessageId, MessageKind, Room, RoomId, RoomKind, UserId},
    error::ChatError,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    ports::{LeftUser, LiveMessages, MessageCache, RoomRepository},
    RoomSyncEngine, RoomSyncOptions,
};

pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub(crate) fn member(id: &str) -> UserId {
    UserId::new(id)
}

pub(crate) fn msg(id: &str, index: Option<i64>, secs: i64) -> Message {
    Message {
        id: MessageId::new(id),
        index,
        sender_id: member("peer"),
        kind: MessageKind::Text,
        content: Some(format!("content-{id}")),
        media_urls: Vec::new(),
        created_at: ts(secs),
        left_user_id: None,
        left_user_nickname: None,
    }
}

/// Messages `m<start>..m<end>` with matching index and timestamp.
pub(crate) fn msgs(start: i64, end: i64) -> Vec<Message> {
    (start..=end)
        .map(|i| msg(&format!("m{i}"), Some(i), i))
        .collect()
}

pub(crate) fn room_with_members(
    id: &str,
    kind: RoomKind,
    active: &[&str],
    left: &[&str],
) -> Room {
    let active_users: HashMap<UserId, DateTime<Utc>> =
        active.iter().map(|id| (member(id), ts(0))).collect();
    let user_history = active
        .iter()
        .chain(left.iter())
        .map(|id| member(id))
        .collect();
    Room {
        id: RoomId::new(id),
        kind,
        last_message: None,
        last_message_at: None,
        index: 0,
        user_history,
        active_users,
    }
}

pub(crate) struct InMemoryCache {
    messages: Vec<Message>,
    fail: bool,
}

impl InMemoryCache {
    pub(crate) fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            fail: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            messages: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl MessageCache for InMemoryCache {
    async fn load(&self, _room_id: &RoomId) -> Result<Vec<Message>, ChatError> {
        if self.fail {
            return Err(ChatError::transport("cache store unavailable"));
        }
        Ok(self.messages.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RepoCall {
    Resolve,
    CreateAndSend {
        member_ids: Vec<UserId>,
        content: String,
    },
    CreateGroupAndSend {
        member_ids: Vec<UserId>,
        content: String,
    },
    Rejoin {
        member_id: UserId,
    },
    Send {
        content: String,
    },
    SendMedia {
        kind: MessageKind,
        urls: Vec<String>,
    },
    FetchOlder {
        limit: usize,
    },
    FetchNewer {
        limit: usize,
    },
    ObserveLive,
    Invite {
        member_ids: Vec<UserId>,
    },
    SystemMessage {
        content: String,
        left_user: Option<LeftUser>,
    },
}

/// Scripted repository double recording every call: pages are queued up
/// front, failures are keyed per operation, and the live stream is fed
/// through an mpsc sender the test keeps hold of.
pub(crate) struct MockRepository {
    resolve_result: Mutex<Result<Option<Room>, ChatError>>,
    older_pages: Mutex<VecDeque<Vec<Message>>>,
    newer_pages: Mutex<VecDeque<Vec<Message>>>,
    failures: Mutex<HashMap<&'static str, ChatError>>,
    pub(crate) live_tx: Mutex<Option<mpsc::Sender<Result<Vec<Message>, ChatError>>>>,
    pub(crate) calls: Mutex<Vec<RepoCall>>,
}

impl MockRepository {
    pub(crate) fn new() -> Self {
        Self {
            resolve_result: Mutex::new(Ok(None)),
            older_pages: Mutex::new(VecDeque::new()),
            newer_pages: Mutex::new(VecDeque::new()),
            failures: Mutex::new(HashMap::new()),
            live_tx: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_room(self, room: Room) -> Self {
        *self.resolve_result.lock().unwrap() = Ok(Some(room));
        self
    }

    pub(crate) fn with_newer_pages(self, pages: Vec<Vec<Message>>) -> Self {
        *self.newer_pages.lock().unwrap() = pages.into();
        self
    }

    pub(crate) fn with_older_pages(self, pages: Vec<Vec<Message>>) -> Self {
        *self.older_pages.lock().unwrap() = pages.into();
        self
    }

    pub(crate) fn failing(self, op: &'static str, err: ChatError) -> Self {
        self.failures.lock().unwrap().insert(op, err);
        self
    }

    fn check(&self, op: &'static str) -> Result<(), ChatError> {
        match self.failures.lock().unwrap().get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn record(&self, call: RepoCall) {
        self.calls.lock().unwrap().push(call);
    }

    pub(crate) fn recorded(&self) -> Vec<RepoCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) async fn push_live(&self, batch: Vec<Message>) -> Result<(), ChatError> {
        let tx = {
            let guard = self.live_tx.lock().unwrap();
            guard.clone().expect("no live subscriber")
        };
        tx.send(Ok(batch))
            .await
            .map_err(|_| ChatError::transport("live receiver dropped"))
    }

    pub(crate) async fn push_live_error(&self, err: ChatError) {
        let tx = {
            let guard = self.live_tx.lock().unwrap();
            guard.clone().expect("no live subscriber")
        };
        let _ = tx.send(Err(err)).await;
    }
}

#[async_trait]
impl RoomRepository for MockRepository {
    async fn resolve_room(
        &self,
        _room_id: &RoomId,
        _member_id: &UserId,
        _counterpart_id: Option<&UserId>,
    ) -> Result<Option<Room>, ChatError> {
        self.record(RepoCall::Resolve);
        self.check("resolve_room")?;
        self.resolve_result.lock().unwrap().clone()
    }

    async fn create_and_send(
        &self,
        _room_id: &RoomId,
        member_ids: &[UserId],
        _sender_id: &UserId,
        content: &str,
    ) -> Result<(), ChatError> {
        self.record(RepoCall::CreateAndSend {
            member_ids: member_ids.to_vec(),
            content: content.to_string(),
        });
        self.check("create_and_send")
    }

    async fn create_group_and_send(
        &self,
        _room_id: &RoomId,
        member_ids: &[UserId],
        _sender_id: &UserId,
        content: &str,
    ) -> Result<(), ChatError> {
        self.record(RepoCall::CreateGroupAndSend {
            member_ids: member_ids.to_vec(),
            content: content.to_string(),
        });
        self.check("create_group_and_send")
    }

    async fn rejoin(&self, _room_id: &RoomId, member_id: &UserId) -> Result<(), ChatError> {
        self.record(RepoCall::Rejoin {
            member_id: member_id.clone(),
        });
        self.check("rejoin")
    }

    async fn send(
        &self,
        _room_id: &RoomId,
        _sender_id: &UserId,
        content: &str,
    ) -> Result<(), ChatError> {
        self.record(RepoCall::Send {
            content: content.to_string(),
        });
        self.check("send")
    }

    async fn send_media(
        &self,
        _room_id: &RoomId,
        _sender_id: &UserId,
        kind: MessageKind,
        urls: &[String],
    ) -> Result<(), ChatError> {
        self.record(RepoCall::SendMedia {
            kind,
            urls: urls.to_vec(),
        });
        self.check("send_media")
    }

    async fn fetch_older(
        &self,
        _room_id: &RoomId,
        _before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, ChatError> {
        self.record(RepoCall::FetchOlder { limit });
        self.check("fetch_older")?;
        Ok(self
            .older_pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn fetch_newer(
        &self,
        _room_id: &RoomId,
        _after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, ChatError> {
        self.record(RepoCall::FetchNewer { limit });
        self.check("fetch_newer")?;
        Ok(self
            .newer_pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn observe_live(&self, _room_id: &RoomId) -> Result<LiveMessages, ChatError> {
        self.record(RepoCall::ObserveLive);
        self.check("observe_live")?;
        let (tx, rx) = mpsc::channel(16);
        *self.live_tx.lock().unwrap() = Some(tx);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn invite(&self, _room_id: &RoomId, member_ids: &[UserId]) -> Result<(), ChatError> {
        self.record(RepoCall::Invite {
            member_ids: member_ids.to_vec(),
        });
        self.check("invite")
    }

    async fn send_system_message(
        &self,
        _room_id: &RoomId,
        content: &str,
        left_user: Option<LeftUser>,
    ) -> Result<(), ChatError> {
        self.record(RepoCall::SystemMessage {
            content: content.to_string(),
            left_user,
        });
        self.check("send_system_message")
    }
}

pub(crate) fn direct_engine(
    repo: Arc<MockRepository>,
    cached: Vec<Message>,
) -> Arc<RoomSyncEngine> {
    RoomSyncEngine::new(
        RoomSyncOptions {
            room_id: RoomId::new("alice_bob"),
            kind: RoomKind::Direct,
            member_id: member("alice"),
            counterpart_id: Some(member("bob")),
            pending_creation_members: None,
        },
        Arc::new(InMemoryCache::new(cached)),
        repo,
    )
}

pub(crate) fn group_engine(
    repo: Arc<MockRepository>,
    cached: Vec<Message>,
    pending_creation_members: Option<Vec<UserId>>,
) -> Arc<RoomSyncEngine> {
    RoomSyncEngine::new(
        RoomSyncOptions {
            room_id: RoomId::new("group-7"),
            kind: RoomKind::Group,
            member_id: member("alice"),
            counterpart_id: None,
            pending_creation_members,
        },
        Arc::new(InMemoryCache::new(cached)),
        repo,
    )
}
