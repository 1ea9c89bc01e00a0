use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use shared::{
    domain::{Message, MessageId, Room, RoomId, RoomKind, UserId},
    error::ChatError,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub mod invite;
pub mod pagination;
pub mod ports;
pub mod reconcile;
pub mod resolver;
pub mod send;

pub use invite::{InviteCoordinator, InvitedMember};
pub use ports::{LeftUser, LiveMessages, MessageCache, RoomRepository};
pub use resolver::RoomResolution;
pub use send::{MediaKind, MediaUpload, OutgoingPayload, SendCoordinator};

/// Page size for user-triggered backward pagination.
pub const OLDER_PAGE: usize = 30;
/// Page size for the first forward catch-up page.
pub const NEWER_FIRST_PAGE: usize = 30;
/// Page size for every forward catch-up page after the first.
pub const NEWER_PAGE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    LoadingCache,
    ResolvingRoom,
    /// The room does not exist server-side yet; the first send creates it.
    AwaitingFirstSend,
    /// The member left the room earlier; the next send rejoins first.
    AwaitingRejoinOrSend,
    CatchingUpForward,
    Live,
    Closed,
}

/// Per-room engine-owned state. Created when a room screen opens, advanced
/// only by the engine and the two coordinators, discarded on close.
#[derive(Debug)]
pub struct RoomSyncState {
    pub phase: SyncPhase,
    pub cache_loaded: bool,
    pub room: Option<Room>,
    pub joined_at: Option<DateTime<Utc>>,
    pub needs_rejoin: bool,
    pub has_more_older: bool,
    pub has_more_newer: bool,
    pub unread_divider_message_id: Option<MessageId>,
    /// Non-nil only for a group room awaiting its first message.
    pub pending_creation_members: Option<Vec<UserId>>,
    pub messages: Vec<Message>,
    pub loading: bool,
    pub sending: bool,
    pub inviting: bool,
    pub last_error: Option<String>,
}

impl RoomSyncState {
    fn new(pending_creation_members: Option<Vec<UserId>>) -> Self {
        Self {
            phase: SyncPhase::Idle,
            cache_loaded: false,
            room: None,
            joined_at: None,
            needs_rejoin: false,
            has_more_older: true,
            has_more_newer: false,
            unread_divider_message_id: None,
            pending_creation_members,
            messages: Vec::new(),
            loading: false,
            sending: false,
            inviting: false,
            last_error: None,
        }
    }
}

/// Copy of the UI-facing state, taken under the state lock.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub phase: SyncPhase,
    pub messages: Vec<Message>,
    pub has_more_older: bool,
    pub has_more_newer: bool,
    pub unread_divider_message_id: Option<MessageId>,
    pub needs_rejoin: bool,
    pub loading: bool,
    pub sending: bool,
    pub inviting: bool,
    pub last_error: Option<String>,
    pub active_users: Vec<UserId>,
}

#[derive(Debug, Clone)]
pub enum RoomEvent {
    PhaseChanged(SyncPhase),
    TimelineUpdated(Vec<Message>),
    MembershipUpdated(Vec<UserId>),
    Error(String),
}

/// Which in-flight flag a failing step owns; only that flag is cleared.
#[derive(Debug, Clone, Copy)]
pub(crate) enum InFlight {
    Loading,
    Sending,
    Inviting,
}

#[derive(Debug, Clone)]
pub struct RoomSyncOptions {
    pub room_id: RoomId,
    pub kind: RoomKind,
    pub member_id: UserId,
    /// Required for a direct room; unused for groups.
    pub counterpart_id: Option<UserId>,
    /// Member list for a group room created client-side and not yet
    /// persisted; seeds the lazy-creation path.
    pub pending_creation_members: Option<Vec<UserId>>,
}

/// The per-room synchronization state machine. Sequences cache load, room
/// resolution, forward catch-up and the live subscription; owns the one
/// cancellable resource, the live task.
pub struct RoomSyncEngine {
    room_id: RoomId,
    kind: RoomKind,
    member_id: UserId,
    counterpart_id: Option<UserId>,
    cache: Arc<dyn MessageCache>,
    repo: Arc<dyn RoomRepository>,
    pub(crate) inner: Mutex<RoomSyncState>,
    live_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<RoomEvent>,
}

impl RoomSyncEngine {
    pub fn new(
        options: RoomSyncOptions,
        cache: Arc<dyn MessageCache>,
        repo: Arc<dyn RoomRepository>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            room_id: options.room_id,
            kind: options.kind,
            member_id: options.member_id,
            counterpart_id: options.counterpart_id,
            cache,
            repo,
            inner: Mutex::new(RoomSyncState::new(options.pending_creation_members)),
            live_task: Mutex::new(None),
            events,
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    pub fn member_id(&self) -> &UserId {
        &self.member_id
    }

    pub fn counterpart_id(&self) -> Option<&UserId> {
        self.counterpart_id.as_ref()
    }

    pub(crate) fn repo(&self) -> &Arc<dyn RoomRepository> {
        &self.repo
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        let state = self.inner.lock().await;
        RoomSnapshot {
            phase: state.phase,
            messages: state.messages.clone(),
            has_more_older: state.has_more_older,
            has_more_newer: state.has_more_newer,
            unread_divider_message_id: state.unread_divider_message_id.clone(),
            needs_rejoin: state.needs_rejoin,
            loading: state.loading,
            sending: state.sending,
            inviting: state.inviting,
            last_error: state.last_error.clone(),
            active_users: state
                .room
                .as_ref()
                .map(|room| {
                    let mut users: Vec<UserId> = room.active_users.keys().cloned().collect();
                    users.sort();
                    users
                })
                .unwrap_or_default(),
        }
    }

    /// Room-open sequence: cache load, room resolution, then one of the
    /// resolution branches, then forward catch-up and the live stream.
    pub async fn open(self: &Arc<Self>, initial_unread_count: u32) -> Result<(), ChatError> {
        self.set_phase(SyncPhase::LoadingCache).await;
        {
            let mut state = self.inner.lock().await;
            state.loading = true;
        }

        let cached = match self.cache.load(&self.room_id).await {
            Ok(cached) => cached,
            Err(err) => {
                self.fail_step("cache load", &err, InFlight::Loading).await;
                return Err(err);
            }
        };
        {
            let mut state = self.inner.lock().await;
            state.messages = reconcile::merge(&cached, &[]);
            state.cache_loaded = true;
        }
        info!(room_id = %self.room_id, cached = cached.len(), "sync: cache loaded");
        self.emit_timeline().await;

        self.set_phase(SyncPhase::ResolvingRoom).await;
        let resolution = match resolver::resolve(
            self.repo.as_ref(),
            &self.room_id,
            &self.member_id,
            self.counterpart_id.as_ref(),
        )
        .await
        {
            Ok(resolution) => resolution,
            Err(err) => {
                self.fail_step("room resolution", &err, InFlight::Loading)
                    .await;
                return Err(err);
            }
        };

        match resolution {
            RoomResolution::NotFound => {
                if self.kind == RoomKind::Group {
                    let has_creation_members = {
                        let state = self.inner.lock().await;
                        state.pending_creation_members.is_some()
                    };
                    if !has_creation_members {
                        let err = ChatError::Conflict(
                            "group room missing and no creation members were provided".into(),
                        );
                        self.fail_step("room resolution", &err, InFlight::Loading)
                            .await;
                        return Err(err);
                    }
                }
                {
                    let mut state = self.inner.lock().await;
                    state.has_more_older = false;
                    state.has_more_newer = false;
                    state.loading = false;
                }
                info!(room_id = %self.room_id, "sync: room not created yet, awaiting first send");
                self.set_phase(SyncPhase::AwaitingFirstSend).await;
            }
            RoomResolution::FoundButLeft { room } => {
                {
                    let mut state = self.inner.lock().await;
                    state.room = Some(room);
                    state.needs_rejoin = true;
                    state.loading = false;
                }
                info!(room_id = %self.room_id, "sync: member left this room, rejoin pending");
                self.set_phase(SyncPhase::AwaitingRejoinOrSend).await;
            }
            RoomResolution::Found { room, joined_at } => {
                {
                    let mut state = self.inner.lock().await;
                    state.room = Some(room);
                    state.joined_at = joined_at;
                    state.needs_rejoin = false;
                }
                if initial_unread_count > 0 {
                    self.set_phase(SyncPhase::CatchingUpForward).await;
                    self.catch_up_forward().await?;
                }
                {
                    let mut state = self.inner.lock().await;
                    state.loading = false;
                }
                self.enter_live().await?;
            }
        }

        Ok(())
    }

    /// Repeated "newer than cursor" fetches bridging the gap between the
    /// cached high-water mark and the live edge. The unread divider anchors
    /// at the first message of the first batch and never moves afterwards.
    async fn catch_up_forward(self: &Arc<Self>) -> Result<(), ChatError> {
        let mut first_batch = true;
        loop {
            let loaded = {
                let state = self.inner.lock().await;
                state.messages.clone()
            };
            let limit = if first_batch {
                NEWER_FIRST_PAGE
            } else {
                NEWER_PAGE
            };

            let outcome =
                match pagination::fetch_newer_page(self.repo.as_ref(), &self.room_id, &loaded, limit)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        self.fail_step("forward catch-up", &err, InFlight::Loading)
                            .await;
                        return Err(err);
                    }
                };

            let has_more = {
                let mut state = self.inner.lock().await;
                if first_batch && state.unread_divider_message_id.is_none() {
                    state.unread_divider_message_id =
                        outcome.messages.first().map(|message| message.id.clone());
                }
                state.messages = reconcile::merge(&state.messages, &[outcome.messages]);
                state.has_more_newer = outcome.has_more;
                state.has_more_newer
            };
            self.emit_timeline().await;

            first_batch = false;
            if !has_more {
                break;
            }
        }
        info!(room_id = %self.room_id, "sync: forward catch-up complete");
        Ok(())
    }

    /// Subscribe to the live message stream, replacing any previous
    /// subscription. The spawned reader task is the engine's one
    /// cancellable resource.
    pub(crate) async fn enter_live(self: &Arc<Self>) -> Result<(), ChatError> {
        let mut stream = match self.repo.observe_live(&self.room_id).await {
            Ok(stream) => stream,
            Err(err) => {
                self.fail_step("live subscription", &err, InFlight::Loading)
                    .await;
                return Err(err);
            }
        };

        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(batch) => {
                        {
                            let mut state = engine.inner.lock().await;
                            state.messages = reconcile::merge(&state.messages, &[batch]);
                        }
                        engine.emit_timeline().await;
                    }
                    Err(err) => {
                        // Keep already-merged history; only the stream dies.
                        warn!(room_id = %engine.room_id, "sync: live stream failed: {err}");
                        let mut state = engine.inner.lock().await;
                        state.last_error = Some(format!("live subscription failed: {err}"));
                        drop(state);
                        let _ = engine
                            .events
                            .send(RoomEvent::Error(format!("live subscription failed: {err}")));
                        break;
                    }
                }
            }
        });

        let previous = {
            let mut live = self.live_task.lock().await;
            live.replace(task)
        };
        if let Some(previous) = previous {
            previous.abort();
        }

        info!(room_id = %self.room_id, "sync: live subscription active");
        self.set_phase(SyncPhase::Live).await;
        Ok(())
    }

    /// User-triggered backward pagination. Available in any phase once the
    /// cache is loaded; independent of the forward sequence and of the
    /// unread divider.
    pub async fn load_older(&self) -> Result<(), ChatError> {
        let loaded = {
            let mut state = self.inner.lock().await;
            if !state.cache_loaded {
                let err = ChatError::Conflict("cache not loaded yet".into());
                state.last_error = Some(err.to_string());
                return Err(err);
            }
            if state.loading {
                // One in-flight fetch per room; callers may retry later.
                return Ok(());
            }
            state.loading = true;
            state.messages.clone()
        };

        let outcome = match pagination::fetch_older_page(
            self.repo.as_ref(),
            &self.room_id,
            &loaded,
            OLDER_PAGE,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                self.fail_step("backward pagination", &err, InFlight::Loading)
                    .await;
                return Err(err);
            }
        };

        {
            let mut state = self.inner.lock().await;
            state.has_more_older = outcome.has_more;
            state.messages = reconcile::merge(&state.messages, &[outcome.messages]);
            state.loading = false;
        }
        self.emit_timeline().await;
        Ok(())
    }

    /// Room-close: cancel the live subscription and stop advancing. The
    /// state is discarded with the engine; nothing is persisted here.
    pub async fn close(&self) {
        let task = {
            let mut live = self.live_task.lock().await;
            live.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        self.set_phase(SyncPhase::Closed).await;
        info!(room_id = %self.room_id, "sync: closed");
    }

    /// Installs the locally-built room after a successful lazy creation.
    pub(crate) async fn record_created_room(&self, members: &[UserId]) {
        let now = Utc::now();
        let mut state = self.inner.lock().await;
        state.room = Some(Room {
            id: self.room_id.clone(),
            kind: self.kind,
            last_message: None,
            last_message_at: None,
            index: 0,
            user_history: members.iter().cloned().collect(),
            active_users: members.iter().cloned().map(|id| (id, now)).collect(),
        });
        state.joined_at = Some(now);
        state.pending_creation_members = None;
    }

    /// Optimistic membership append shared by invite, reinvite and rejoin,
    /// so the UI need not wait for the next room snapshot.
    pub(crate) async fn apply_membership_added(&self, member_ids: &[UserId]) {
        let active = {
            let mut state = self.inner.lock().await;
            let Some(room) = state.room.as_mut() else {
                return;
            };
            let now = Utc::now();
            for member_id in member_ids {
                room.user_history.insert(member_id.clone());
                room.active_users.entry(member_id.clone()).or_insert(now);
            }
            let mut users: Vec<UserId> = room.active_users.keys().cloned().collect();
            users.sort();
            users
        };
        let _ = self.events.send(RoomEvent::MembershipUpdated(active));
    }

    pub(crate) async fn fail_step(&self, step: &str, err: &ChatError, flag: InFlight) {
        warn!(room_id = %self.room_id, "sync: {step} failed: {err}");
        {
            let mut state = self.inner.lock().await;
            match flag {
                InFlight::Loading => state.loading = false,
                InFlight::Sending => state.sending = false,
                InFlight::Inviting => state.inviting = false,
            }
            state.last_error = Some(format!("{step} failed: {err}"));
        }
        let _ = self
            .events
            .send(RoomEvent::Error(format!("{step} failed: {err}")));
    }

    async fn set_phase(&self, phase: SyncPhase) {
        {
            let mut state = self.inner.lock().await;
            state.phase = phase;
        }
        let _ = self.events.send(RoomEvent::PhaseChanged(phase));
    }

    async fn emit_timeline(&self) {
        let messages = {
            let state = self.inner.lock().await;
            state.messages.clone()
        };
        let _ = self.events.send(RoomEvent::TimelineUpdated(messages));
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
