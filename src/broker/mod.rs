//! The boundary between the producer and the system that stores messages.
//!
//! A [`Broker`] receives whole batches and either acknowledges all of them,
//! reporting the next offset of every topic it wrote to, or fails the batch
//! as a unit. [`MemoryBroker`] keeps everything in process;
//! [`KafkaBroker`](crate::kafka::KafkaBroker) writes to Kafka.

pub mod memory;

pub use memory::MemoryBroker;

use crate::message::EncodedMessage;
use crate::position::TopicOffsets;
use crate::Result;
use std::future::Future;

pub trait Broker: Send + Sync {
    /// Sends `batch` in order and waits for the acknowledgment.
    ///
    /// On success the returned map holds, for every topic in the batch, the
    /// offset the next message in that topic will receive. Failures should
    /// be reported as [`Error::Publish`](crate::Error::Publish) and mean that
    /// the batch must be sent again.
    fn send(&self, batch: &[EncodedMessage]) -> impl Future<Output = Result<TopicOffsets>> + Send;

    /// Next offset per topic as currently stored by the broker. Topics the
    /// broker has never seen report offset 0.
    fn latest_offsets(&self, topics: &[String]) -> impl Future<Output = Result<TopicOffsets>> + Send;
}
