use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(RoomId);
id_newtype!(MessageId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Direct,
    Group,
}

/// A single chat message. `index` is the server-assigned per-room sequence
/// number and is absent until a send has been acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    pub sender_id: UserId,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_user_nickname: Option<String>,
}

impl Message {
    /// The "member left" payload of a system message, the reinvite target.
    pub fn left_member(&self) -> Option<(&UserId, &str)> {
        match (&self.left_user_id, &self.left_user_nickname) {
            (Some(user_id), Some(nickname)) => Some((user_id, nickname.as_str())),
            _ => None,
        }
    }
}

/// Display order for the timeline: server `index` when both sides carry one,
/// `created_at` otherwise, with `created_at` then `id` as tie-breaks so the
/// result is deterministic.
pub fn timeline_cmp(a: &Message, b: &Message) -> Ordering {
    let primary = match (a.index, b.index) {
        (Some(left), Some(right)) => left.cmp(&right),
        _ => a.created_at.cmp(&b.created_at),
    };
    primary
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub kind: RoomKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    pub index: i64,
    /// Every member who ever joined; `active_users` keys are a subset.
    pub user_history: HashSet<UserId>,
    /// Current membership, member id to joined-at.
    pub active_users: HashMap<UserId, DateTime<Utc>>,
}

impl Room {
    /// Deterministic id for a two-party room: the sorted member pair.
    pub fn direct_id(a: &UserId, b: &UserId) -> RoomId {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        RoomId(format!("{}_{}", first.0, second.0))
    }

    /// Opaque client-generated token for a group room, minted before the
    /// room is persisted.
    pub fn group_id() -> RoomId {
        RoomId(Uuid::new_v4().to_string())
    }

    pub fn joined_at(&self, member_id: &UserId) -> Option<DateTime<Utc>> {
        self.active_users.get(member_id).copied()
    }

    pub fn has_left(&self, member_id: &UserId) -> bool {
        self.user_history.contains(member_id) && !self.active_users.contains_key(member_id)
    }
}
