#![allow(dead_code)]

use pipeline_producer::broker::MemoryBroker;
use pipeline_producer::config::ProducerConfig;
use pipeline_producer::encoding::{JsonSerializer, MessageEncoder, SerializationFormat};
use pipeline_producer::{EncodedMessage, Error, Message, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;

/// Inline producer config that only flushes on the count threshold unless a
/// test lowers the others.
pub fn inline_config(count_threshold: usize) -> ProducerConfig {
    ProducerConfig {
        name: "test-producer".to_string(),
        count_threshold,
        byte_threshold: usize::MAX,
        time_threshold_ms: 60_000,
        ..Default::default()
    }
}

pub fn pooled_config(count_threshold: usize, workers: usize, queue_capacity: usize) -> ProducerConfig {
    ProducerConfig {
        use_worker_pool: true,
        worker_pool_size: workers,
        dispatch_queue_capacity: queue_capacity,
        ..inline_config(count_threshold)
    }
}

pub fn message(topic: &str, n: u64) -> Message {
    Message::json(topic, json!({ "n": n })).with_upstream_position_info(json!({ "row": n }))
}

/// Sequence numbers stored by the broker for `topic`, in offset order.
pub fn stored_sequences(broker: &MemoryBroker, topic: &str) -> Vec<u64> {
    broker.messages(topic).iter().map(|m| m.sequence).collect()
}

/// Encoder that sleeps a random amount before encoding, so pool workers
/// finish out of order.
pub struct JitterEncoder {
    inner: JsonSerializer,
    seed: u64,
    max_delay: Duration,
}

impl JitterEncoder {
    pub fn new(seed: u64, max_delay: Duration) -> Self {
        Self {
            inner: JsonSerializer::new(SerializationFormat::JsonCompact),
            seed,
            max_delay,
        }
    }
}

impl MessageEncoder for JitterEncoder {
    fn encode(&self, message: &Message) -> Result<EncodedMessage> {
        let sequence = message.sequence().unwrap_or_default();
        let mut rng = StdRng::seed_from_u64(self.seed ^ sequence.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let max_micros = self.max_delay.as_micros() as u64;
        std::thread::sleep(Duration::from_micros(rng.random_range(0..=max_micros)));
        self.inner.encode(message)
    }
}

/// Encoder that fails for the given sequence numbers. Failing messages are
/// slow, so later messages are done first.
pub struct FailingEncoder {
    inner: JsonSerializer,
    failing: BTreeSet<u64>,
}

impl FailingEncoder {
    pub fn new(failing: impl IntoIterator<Item = u64>) -> Self {
        Self {
            inner: JsonSerializer::default(),
            failing: failing.into_iter().collect(),
        }
    }
}

impl MessageEncoder for FailingEncoder {
    fn encode(&self, message: &Message) -> Result<EncodedMessage> {
        let sequence = message.sequence().unwrap_or_default();
        if self.failing.contains(&sequence) {
            std::thread::sleep(Duration::from_millis(50));
            return Err(Error::Serialization {
                sequence,
                message: "corrupt payload".to_string(),
            });
        }
        self.inner.encode(message)
    }
}

/// Encoder that blocks every encode until the test hands it a permit.
pub struct GatedEncoder {
    inner: JsonSerializer,
    permits: flume::Receiver<()>,
}

impl GatedEncoder {
    /// Returns the encoder and the sender used to release one encode per
    /// message.
    pub fn new() -> (Self, flume::Sender<()>) {
        let (release, permits) = flume::unbounded();
        let encoder = Self {
            inner: JsonSerializer::default(),
            permits,
        };
        (encoder, release)
    }
}

impl MessageEncoder for GatedEncoder {
    fn encode(&self, message: &Message) -> Result<EncodedMessage> {
        // A dropped sender opens the gate for good
        let _ = self.permits.recv();
        self.inner.encode(message)
    }
}
