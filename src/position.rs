//! Checkpoint position data for published messages.
//!
//! A [`PositionData`] snapshot records, per topic, the offset of the next
//! message the broker will assign, together with the upstream position info
//! carried by the last acknowledged messages. Callers persist it to resume
//! their upstream source without losing or duplicating more than the last
//! unacknowledged batch.

use crate::message::EncodedMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Next offset per topic, as reported by a broker.
pub type TopicOffsets = BTreeMap<String, i64>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionData {
    /// Sequence of the last message acknowledged by the broker.
    pub last_published_sequence: Option<u64>,
    /// Upstream position info of the last acknowledged message.
    pub last_published_message_position_info: Option<Value>,
    /// Upstream position info of the last acknowledged message in each topic.
    pub topic_to_last_position_info_map: BTreeMap<String, Value>,
    /// Offset of the next message to be published in each topic.
    pub topic_to_offset_map: TopicOffsets,
}

impl PositionData {
    /// Builds the snapshot that follows `self` once `batch` has been
    /// acknowledged with `ack`.
    ///
    /// Topics missing from the batch keep their previous values. Offsets
    /// never move backwards.
    pub fn acknowledge(&self, batch: &[EncodedMessage], ack: &TopicOffsets) -> PositionData {
        let mut next = self.clone();

        for message in batch {
            next.last_published_sequence = Some(message.sequence);
            next.last_published_message_position_info = message.upstream_position_info.clone();
            if let Some(info) = &message.upstream_position_info {
                next.topic_to_last_position_info_map
                    .insert(message.topic.clone(), info.clone());
            }
        }

        next.merge_offsets(ack);
        next
    }

    pub(crate) fn merge_offsets(&mut self, offsets: &TopicOffsets) {
        for (topic, &offset) in offsets {
            let entry = self.topic_to_offset_map.entry(topic.clone()).or_insert(offset);
            if offset < *entry {
                warn!(
                    topic = %topic,
                    current = *entry,
                    acknowledged = offset,
                    "Broker acknowledged an offset behind the tracked position, keeping current"
                );
            } else {
                *entry = offset;
            }
        }
    }

    pub fn offset(&self, topic: &str) -> Option<i64> {
        self.topic_to_offset_map.get(topic).copied()
    }
}

/// Holds the current [`PositionData`] snapshot.
///
/// The snapshot is only ever replaced as a whole, so a reader holding an
/// `Arc` from [`current`](Self::current) never observes a partial update.
#[derive(Debug, Default)]
pub struct PositionTracker {
    current: Arc<PositionData>,
}

impl PositionTracker {
    pub fn new(initial: PositionData) -> Self {
        Self {
            current: Arc::new(initial),
        }
    }

    pub fn current(&self) -> Arc<PositionData> {
        Arc::clone(&self.current)
    }

    pub fn advance(&mut self, snapshot: PositionData) {
        debug!(
            last_sequence = ?snapshot.last_published_sequence,
            topics = snapshot.topic_to_offset_map.len(),
            "Advancing position data"
        );
        self.current = Arc::new(snapshot);
    }
}
