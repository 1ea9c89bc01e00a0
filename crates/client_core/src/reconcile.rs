use std::collections::HashMap;

use shared::domain::{timeline_cmp, Message, MessageId};

/// Merge-by-identity: build an id map from `base`, upsert each batch in
/// argument order (a later batch overwrites an earlier copy with the same
/// id, so a live edit supersedes a cached or paginated one), then sort
/// ascending by the timeline ordering key.
///
/// Invoked identically for cache normalization, pagination merging and live
/// merging. Idempotent; which duplicate wins is last-batch-wins.
pub fn merge(base: &[Message], batches: &[Vec<Message>]) -> Vec<Message> {
    let mut by_id: HashMap<MessageId, Message> = base
        .iter()
        .map(|message| (message.id.clone(), message.clone()))
        .collect();

    for batch in batches {
        for message in batch {
            by_id.insert(message.id.clone(), message.clone());
        }
    }

    let mut merged: Vec<Message> = by_id.into_values().collect();
    merged.sort_by(timeline_cmp);
    merged
}
