use chrono::{DateTime, Utc};
use shared::{
    domain::{Room, RoomId, UserId},
    error::ChatError,
};

use crate::ports::RoomRepository;

/// Outcome of a room existence/membership lookup. Read-only; transport
/// failures propagate, an absent room does not.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomResolution {
    /// The room was never created server-side.
    NotFound,
    /// The room exists; `joined_at` is present when the member is in
    /// `active_users`.
    Found {
        room: Room,
        joined_at: Option<DateTime<Utc>>,
    },
    /// The member joined at some point and has since left; sending requires
    /// a rejoin first.
    FoundButLeft { room: Room },
}

pub async fn resolve(
    repo: &dyn RoomRepository,
    room_id: &RoomId,
    member_id: &UserId,
    counterpart_id: Option<&UserId>,
) -> Result<RoomResolution, ChatError> {
    let Some(room) = repo.resolve_room(room_id, member_id, counterpart_id).await? else {
        return Ok(RoomResolution::NotFound);
    };

    if room.has_left(member_id) {
        return Ok(RoomResolution::FoundButLeft { room });
    }

    let joined_at = room.joined_at(member_id);
    Ok(RoomResolution::Found { room, joined_at })
}
