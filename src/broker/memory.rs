use super::Broker;
use crate::message::EncodedMessage;
use crate::position::TopicOffsets;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    logs: BTreeMap<String, Vec<EncodedMessage>>,
    batch_sizes: Vec<usize>,
    send_attempts: usize,
    failures_remaining: usize,
}

/// In-process broker keeping one append-only log per topic.
///
/// Clones share the same logs, so a test can keep a handle while the
/// producer owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `send` fail without storing anything.
    pub fn fail_next_sends(&self, count: usize) {
        self.state.lock().failures_remaining = count;
    }

    /// Everything stored in `topic`, in offset order.
    pub fn messages(&self, topic: &str) -> Vec<EncodedMessage> {
        self.state
            .lock()
            .logs
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Sizes of the batches acknowledged so far, in send order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.lock().batch_sizes.clone()
    }

    /// Calls to `send`, including failed ones.
    pub fn send_attempts(&self) -> usize {
        self.state.lock().send_attempts
    }
}

impl Broker for MemoryBroker {
    async fn send(&self, batch: &[EncodedMessage]) -> Result<TopicOffsets> {
        let mut state = self.state.lock();
        state.send_attempts += 1;

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(Error::Publish {
                message: format!("memory broker rejected batch of {} messages", batch.len()),
            });
        }

        let mut ack = TopicOffsets::new();
        for message in batch {
            let log = state.logs.entry(message.topic.clone()).or_default();
            log.push(message.clone());
            ack.insert(message.topic.clone(), log.len() as i64);
        }
        state.batch_sizes.push(batch.len());

        debug!(count = batch.len(), topics = ack.len(), "Memory broker stored batch");
        Ok(ack)
    }

    async fn latest_offsets(&self, topics: &[String]) -> Result<TopicOffsets> {
        let state = self.state.lock();
        Ok(topics
            .iter()
            .map(|topic| {
                let next = state.logs.get(topic).map_or(0, |log| log.len() as i64);
                (topic.clone(), next)
            })
            .collect())
    }
}
