use std::sync::Arc;

use shared::{domain::UserId, error::ChatError};
use tracing::info;

use crate::{InFlight, RoomSyncEngine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitedMember {
    pub user_id: UserId,
    pub nickname: String,
}

fn joined_notice(nickname: &str) -> String {
    format!("{nickname} joined the room")
}

/// Adds members to a group room: one repository invite call for the whole
/// id list, then one "member joined" system message per member, then an
/// optimistic append to the in-memory membership view so the UI does not
/// wait for the next room snapshot.
pub struct InviteCoordinator {
    engine: Arc<RoomSyncEngine>,
}

impl InviteCoordinator {
    pub fn new(engine: Arc<RoomSyncEngine>) -> Self {
        Self { engine }
    }

    pub async fn invite(&self, members: &[InvitedMember]) -> Result<(), ChatError> {
        self.invite_members(members).await
    }

    /// Single-member path driven by a "member left" system message, which
    /// carries the id and nickname needed for a one-tap rejoin-by-invite.
    /// Same mechanics as the bulk path, including the membership append.
    pub async fn reinvite(&self, member: InvitedMember) -> Result<(), ChatError> {
        self.invite_members(std::slice::from_ref(&member)).await
    }

    async fn invite_members(&self, members: &[InvitedMember]) -> Result<(), ChatError> {
        {
            let mut state = self.engine.inner.lock().await;
            if state.inviting {
                return Err(ChatError::Conflict("an invite is already in flight".into()));
            }
            state.inviting = true;
        }

        let result = self.run_invite(members).await;
        match result {
            Ok(()) => {
                let mut state = self.engine.inner.lock().await;
                state.inviting = false;
                Ok(())
            }
            Err(err) => {
                self.engine
                    .fail_step("invite", &err, InFlight::Inviting)
                    .await;
                Err(err)
            }
        }
    }

    async fn run_invite(&self, members: &[InvitedMember]) -> Result<(), ChatError> {
        let repo = self.engine.repo();
        let room_id = self.engine.room_id();
        let member_ids: Vec<UserId> = members.iter().map(|m| m.user_id.clone()).collect();

        repo.invite(room_id, &member_ids).await?;

        // One system message per invitee, not a batched mention list.
        for member in members {
            repo.send_system_message(room_id, &joined_notice(&member.nickname), None)
                .await?;
        }

        self.engine.apply_membership_added(&member_ids).await;
        info!(room_id = %room_id, invited = member_ids.len(), "invite: membership appended");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/invite_tests.rs"]
mod tests;
