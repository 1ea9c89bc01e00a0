use chrono::{DateTime, Utc};
use shared::{
    domain::{Message, RoomId},
    error::ChatError,
};

use crate::ports::RoomRepository;

/// Result of one page fetch together with the exhaustion flag derived from
/// it. Backward and forward fetches use different exhaustion rules on
/// purpose: a user-triggered backward fetch can stop on the first empty
/// page, while forward catch-up keeps going as long as pages come back
/// full, so a page landing exactly on the boundary costs one extra fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// `created_at` is the pagination cursor; the timeline is kept sorted
/// ascending, so the oldest loaded message is the first element.
fn backward_cursor(loaded: &[Message]) -> DateTime<Utc> {
    loaded
        .first()
        .map(|message| message.created_at)
        .unwrap_or_else(Utc::now)
}

fn forward_cursor(loaded: &[Message]) -> DateTime<Utc> {
    loaded
        .last()
        .map(|message| message.created_at)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Fetch one page strictly older than the oldest loaded message.
/// `has_more` stays set until a fetch comes back empty.
pub async fn fetch_older_page(
    repo: &dyn RoomRepository,
    room_id: &RoomId,
    loaded: &[Message],
    limit: usize,
) -> Result<PageOutcome, ChatError> {
    let before = backward_cursor(loaded);
    let messages = repo.fetch_older(room_id, before, limit).await?;
    let has_more = !messages.is_empty();
    Ok(PageOutcome { messages, has_more })
}

/// Fetch one page strictly newer than the newest loaded message.
/// `has_more` is set when the page came back full.
pub async fn fetch_newer_page(
    repo: &dyn RoomRepository,
    room_id: &RoomId,
    loaded: &[Message],
    limit: usize,
) -> Result<PageOutcome, ChatError> {
    let after = forward_cursor(loaded);
    let messages = repo.fetch_newer(room_id, after, limit).await?;
    let has_more = messages.len() == limit;
    Ok(PageOutcome { messages, has_more })
}
