//! Serialization strategies.
//!
//! [`Strategy::Inline`] encodes on the publishing task. [`Strategy::Pooled`]
//! hands encoding to worker threads and restores publish order before
//! anything reaches the buffer.

pub mod inline;
pub mod pooled;
pub mod reorder;

pub use inline::InlineStrategy;
pub use pooled::PooledStrategy;
pub use reorder::ReorderBuffer;

use crate::buffer::MessageBuffer;
use crate::config::ProducerConfig;
use crate::encoding::MessageEncoder;
use crate::message::{EncodedMessage, Message};
use crate::{Error, Result};
use std::sync::Arc;

pub enum Strategy {
    Inline(InlineStrategy),
    Pooled(PooledStrategy),
}

impl Strategy {
    pub fn start(
        config: &ProducerConfig,
        encoder: Arc<dyn MessageEncoder>,
        first_sequence: u64,
    ) -> Result<Self> {
        if config.use_worker_pool {
            PooledStrategy::start(
                encoder,
                config.worker_pool_size,
                config.dispatch_queue_capacity,
                first_sequence,
            )
            .map(Strategy::Pooled)
        } else {
            Ok(Strategy::Inline(InlineStrategy::new(encoder)))
        }
    }

    pub async fn submit(
        &mut self,
        sequence: u64,
        message: Message,
        buffer: &mut MessageBuffer,
    ) -> Result<()> {
        match self {
            Strategy::Inline(inline) => inline.submit(sequence, message, buffer),
            Strategy::Pooled(pooled) => pooled.submit(sequence, message, buffer).await,
        }
    }

    pub fn collect_ready(&mut self, buffer: &mut MessageBuffer) -> Result<()> {
        match self {
            Strategy::Inline(_) => Ok(()),
            Strategy::Pooled(pooled) => pooled.collect_ready(buffer),
        }
    }

    pub async fn drain(&mut self, buffer: &mut MessageBuffer) -> Result<()> {
        match self {
            Strategy::Inline(_) => Ok(()),
            Strategy::Pooled(pooled) => pooled.drain(buffer).await,
        }
    }

    pub fn pending(&self) -> usize {
        match self {
            Strategy::Inline(_) => 0,
            Strategy::Pooled(pooled) => pooled.pending(),
        }
    }

    pub fn shutdown(&mut self) {
        if let Strategy::Pooled(pooled) = self {
            pooled.shutdown();
        }
    }

    /// Like [`shutdown`](Self::shutdown), but work still queued is dropped.
    pub fn abort(&mut self) {
        if let Strategy::Pooled(pooled) = self {
            pooled.abort();
        }
    }
}

/// Encodes `message` and stamps the result with `sequence`, so encoders do
/// not have to carry it through themselves.
pub(crate) fn encode_one(
    encoder: &dyn MessageEncoder,
    message: &Message,
    sequence: u64,
) -> Result<EncodedMessage> {
    match encoder.encode(message) {
        Ok(mut encoded) => {
            encoded.sequence = sequence;
            Ok(encoded)
        }
        Err(Error::Serialization { message, .. }) => Err(Error::Serialization { sequence, message }),
        Err(other) => Err(Error::Serialization {
            sequence,
            message: other.to_string(),
        }),
    }
}
