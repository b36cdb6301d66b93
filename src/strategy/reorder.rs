use crate::message::EncodedMessage;
use crate::Result;
use std::collections::BTreeMap;
use tracing::warn;

/// Puts encode results coming back from the worker pool into publish order.
///
/// Results are held by sequence number until every lower sequence has been
/// handed out, so a fast worker can never overtake a slow one.
#[derive(Debug)]
pub struct ReorderBuffer {
    held: BTreeMap<u64, Result<EncodedMessage>>,
    next: u64,
}

impl ReorderBuffer {
    /// `first` is the sequence number of the first message that will be
    /// dispatched.
    pub fn new(first: u64) -> Self {
        Self {
            held: BTreeMap::new(),
            next: first,
        }
    }

    pub fn insert(&mut self, sequence: u64, result: Result<EncodedMessage>) {
        if sequence < self.next {
            warn!(sequence, next = self.next, "Dropping result for an already released sequence");
            return;
        }
        self.held.insert(sequence, result);
    }

    /// Hands out the result for the next expected sequence, if it has
    /// arrived. A failed result releases its sequence like a successful one.
    pub fn next_ready(&mut self) -> Option<Result<EncodedMessage>> {
        let ready = self.held.remove(&self.next)?;
        self.next += 1;
        Some(ready)
    }

    pub fn next_expected(&self) -> u64 {
        self.next
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
